// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Download job orchestration: download, personal archive, team copies,
//! then a success notification.

use crate::error::AppError;
use crate::models::ArchivalDestination;
use crate::services::archive::ArchivalRouter;
use crate::services::credentials::CredentialManager;
use crate::services::downloader::{DownloadEngine, DownloadOutcome};
use crate::services::notifier::Notifier;
use std::path::PathBuf;

/// Where a processed recording ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub filename: String,
    /// Location after personal archival (or the download path if none)
    pub final_path: PathBuf,
    pub personal_path: Option<PathBuf>,
    /// Path the team copies were made from
    pub team_source: Option<PathBuf>,
    pub team_paths: Vec<PathBuf>,
    pub destination: ArchivalDestination,
    /// True when the download was skipped because the file already existed
    pub already_present: bool,
}

/// Runs a download job end to end.
#[derive(Clone)]
pub struct ArchivePipeline {
    credentials: CredentialManager,
    engine: DownloadEngine,
    router: ArchivalRouter,
    notifier: Notifier,
}

impl ArchivePipeline {
    pub fn new(
        credentials: CredentialManager,
        engine: DownloadEngine,
        router: ArchivalRouter,
        notifier: Notifier,
    ) -> Self {
        Self {
            credentials,
            engine,
            router,
            notifier,
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Process one recording. Errors are logged and reported to the owner
    /// where they can act on them; `None` means nothing was archived.
    pub async fn process(
        &self,
        owner_id: &str,
        meeting_id: Option<&str>,
        object_token: &str,
    ) -> Option<PipelineReport> {
        let owner = match self.credentials.lookup(owner_id).await {
            Ok(Some(owner)) => owner,
            Ok(None) => {
                tracing::warn!(owner_id, meeting_id, "No credential for owner, requesting authorization");
                self.notifier.notify_auth_failure(owner_id, meeting_id).await;
                return None;
            }
            Err(e) => {
                tracing::error!(owner_id, error = %e, "Credential lookup failed");
                return None;
            }
        };

        let job = self.engine.prepare_job(object_token, &owner, meeting_id).await;

        let outcome = match self.engine.download(&job).await {
            Ok(outcome) => outcome,
            Err(AppError::AuthFailure(msg)) => {
                tracing::error!(owner_id, meeting_id, error = %msg, "Download blocked on authorization");
                self.notifier.notify_auth_failure(owner_id, meeting_id).await;
                return None;
            }
            Err(e) => {
                tracing::error!(owner_id, object_token, error = %e, "Download failed");
                return None;
            }
        };

        if let DownloadOutcome::AlreadyPresent(path) = outcome {
            self.notifier
                .notify_success(owner_id, &job.resolved_filename, None, &[])
                .await;
            return Some(PipelineReport {
                filename: job.resolved_filename,
                final_path: path,
                personal_path: None,
                team_source: None,
                team_paths: Vec::new(),
                destination: ArchivalDestination::default(),
                already_present: true,
            });
        }

        let mut current = outcome.path().to_path_buf();
        let mut destination = ArchivalDestination::default();

        // Personal: move
        let mut personal_path = None;
        match self.router.personal_folder(&job.owner_name, owner_id).await {
            Some(folder) => {
                match self.router.archive_personal(&current, &folder).await {
                    Ok(dest) => {
                        current = dest.clone();
                        personal_path = Some(dest);
                    }
                    Err(e) => {
                        tracing::warn!(owner_id, folder = %folder, error = %e, "Personal archival failed, keeping download path");
                    }
                }
                destination.personal_folder = Some(folder);
            }
            None => {
                tracing::warn!(owner_id, name = %job.owner_name, "No personal folder matched, skipping");
            }
        }

        // Team: copy from wherever the file is now
        let mut team_source = None;
        let mut team_paths = Vec::new();
        match self.credentials.get_service_credential().await {
            Ok(service_token) => {
                // The download may have rotated the user token.
                let user_token = match self.credentials.lookup(owner_id).await {
                    Ok(Some(fresh)) => fresh.access_token,
                    _ => owner.access_token.clone(),
                };
                destination.team_folders = self
                    .router
                    .team_folders(owner_id, meeting_id, &user_token, &service_token)
                    .await;
                if !destination.team_folders.is_empty() {
                    team_paths = self.router.archive_team(&current, &destination.team_folders).await;
                    team_source = Some(current.clone());
                }
            }
            Err(e) => {
                tracing::warn!(owner_id, error = %e, "Skipping team archival");
            }
        }

        let personal_display = personal_path.as_ref().map(|p| p.display().to_string());
        let team_display: Vec<String> = team_paths.iter().map(|p| p.display().to_string()).collect();
        self.notifier
            .notify_success(
                owner_id,
                &job.resolved_filename,
                personal_display.as_deref(),
                &team_display,
            )
            .await;

        tracing::info!(
            owner_id,
            meeting_id,
            path = %current.display(),
            team_copies = team_paths.len(),
            "Recording archived"
        );

        Some(PipelineReport {
            filename: job.resolved_filename,
            final_path: current,
            personal_path,
            team_source,
            team_paths,
            destination,
            already_present: false,
        })
    }
}
