// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Recording download engine.
//!
//! Handles the core workflow:
//! 1. Resolve a readable filename from meeting and owner metadata
//! 2. Skip the transfer if the destination already holds the recording
//! 3. Obtain a signed media URL (refreshing the user token once if needed)
//! 4. Stream the body into `<dest>.downloading` and rename on success

use crate::error::AppError;
use crate::models::{DownloadJob, UserCredential};
use crate::services::credentials::CredentialManager;
use crate::services::feishu::{FeishuClient, MediaUrl};
use crate::time_utils::format_file_timestamp;
use chrono::FixedOffset;
use futures_util::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Extension of every downloaded recording.
pub const MEDIA_EXTENSION: &str = "mp4";

/// Topic used when the meeting has none.
const UNTITLED_TOPIC: &str = "Untitled";

/// Result of a successful `download`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The file was fetched and is now at this path.
    Downloaded(PathBuf),
    /// A non-empty file was already at the destination; nothing was fetched.
    AlreadyPresent(PathBuf),
}

impl DownloadOutcome {
    pub fn path(&self) -> &Path {
        match self {
            DownloadOutcome::Downloaded(p) | DownloadOutcome::AlreadyPresent(p) => p,
        }
    }
}

/// Filename stem plus the owner name it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFilename {
    pub stem: String,
    pub owner_name: String,
}

/// Fetches recordings into the download directory.
#[derive(Clone)]
pub struct DownloadEngine {
    client: FeishuClient,
    credentials: CredentialManager,
    download_dir: PathBuf,
    filename_offset: FixedOffset,
}

impl DownloadEngine {
    pub fn new(
        client: FeishuClient,
        credentials: CredentialManager,
        download_dir: PathBuf,
        filename_offset: FixedOffset,
    ) -> Self {
        Self {
            client,
            credentials,
            download_dir,
            filename_offset,
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Build the download job for a recording owned by `owner`.
    pub async fn prepare_job(
        &self,
        object_token: &str,
        owner: &UserCredential,
        meeting_id: Option<&str>,
    ) -> DownloadJob {
        let resolved = self.resolve_filename(meeting_id, owner, object_token).await;
        let resolved_filename = format!("{}.{}", resolved.stem, MEDIA_EXTENSION);

        DownloadJob {
            object_token: object_token.to_string(),
            owner_user_id: owner.user_id.clone(),
            meeting_id: meeting_id.map(str::to_string),
            owner_name: resolved.owner_name,
            destination_path: self.download_dir.join(&resolved_filename),
            resolved_filename,
        }
    }

    /// Compose `{name}_{topic}_{yyyyMMdd_HHmm}`, falling back to the object token.
    ///
    /// Best effort: metadata failures are logged and never fail the download.
    pub async fn resolve_filename(
        &self,
        meeting_id: Option<&str>,
        owner: &UserCredential,
        object_token: &str,
    ) -> ResolvedFilename {
        let owner_name = self.owner_name(owner).await;

        let stem = match meeting_id {
            Some(meeting_id) => match self
                .credentials
                .with_auto_refresh(&owner.user_id, |token| async move {
                    self.client.get_meeting(&token, meeting_id, false).await
                })
                .await
            {
                Ok(meeting) => {
                    let start = meeting
                        .start_time
                        .as_deref()
                        .and_then(|s| s.trim().parse::<i64>().ok())
                        .and_then(|ts| format_file_timestamp(ts, &self.filename_offset));
                    match start {
                        Some(start) => {
                            let topic = meeting
                                .topic
                                .as_deref()
                                .map(sanitize_component)
                                .filter(|t| !t.is_empty())
                                .unwrap_or_else(|| UNTITLED_TOPIC.to_string());
                            format!("{}_{}_{}", sanitize_component(&owner_name), topic, start)
                        }
                        None => {
                            tracing::warn!(meeting_id, "Meeting has no start time, naming by object token");
                            object_token.to_string()
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(meeting_id, error = %e, "Meeting lookup failed, naming by object token");
                    object_token.to_string()
                }
            },
            None => object_token.to_string(),
        };

        tracing::debug!(object_token, stem = %stem, "Resolved filename");
        ResolvedFilename { stem, owner_name }
    }

    /// Owner display name: profile lookup, then the stored name, then the user ID.
    async fn owner_name(&self, owner: &UserCredential) -> String {
        let info = self
            .credentials
            .with_auto_refresh(&owner.user_id, |token| async move {
                self.client.get_user_info(&token).await
            })
            .await;
        match info {
            Ok(info) => {
                if let Some(name) = info.name.filter(|n| !n.trim().is_empty()) {
                    return name.trim().to_string();
                }
            }
            Err(e) => {
                tracing::debug!(user_id = %owner.user_id, error = %e, "User info lookup failed");
            }
        }

        owner
            .display_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| owner.user_id.clone())
    }

    /// Ask the platform for the signed media URL.
    pub async fn get_media_url(&self, object_token: &str, access_token: &str) -> MediaUrl {
        self.client.get_media_url(access_token, object_token).await
    }

    /// Download the job's recording to its destination exactly once.
    pub async fn download(&self, job: &DownloadJob) -> Result<DownloadOutcome, AppError> {
        let dest = &job.destination_path;

        if let Ok(meta) = tokio::fs::metadata(dest).await {
            if meta.is_file() && meta.len() > 0 {
                tracing::info!(path = %dest.display(), "File already present, skipping download");
                return Ok(DownloadOutcome::AlreadyPresent(dest.clone()));
            }
        }

        let url = self
            .credentials
            .with_auto_refresh(&job.owner_user_id, |token| {
                let object_token = job.object_token.as_str();
                async move {
                    match self.get_media_url(object_token, &token).await {
                        MediaUrl::Url(url) => Ok(Some(url)),
                        MediaUrl::RenewToken => Err(AppError::token_rejected("media export")),
                        MediaUrl::Unavailable => Ok(None),
                    }
                }
            })
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("media for object {}", job.object_token))
            })?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::DownloadFailed(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        tracing::info!(object_token = %job.object_token, path = %dest.display(), "Downloading recording");

        let response = self.client.open_media(&url).await?;
        let bytes = persist_stream(response.bytes_stream(), &job.temp_path(), dest).await?;

        tracing::info!(path = %dest.display(), bytes, "Download complete");
        Ok(DownloadOutcome::Downloaded(dest.clone()))
    }
}

/// Write a byte stream to `temp`, then rename it to `dest`.
///
/// `dest` only ever names a complete file. On any error the temp file is
/// removed (best effort) and `DownloadFailed` is returned.
pub async fn persist_stream<S, B, E>(stream: S, temp: &Path, dest: &Path) -> Result<u64, AppError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    match write_stream(stream, temp).await {
        Ok(bytes) => match tokio::fs::rename(temp, dest).await {
            Ok(()) => Ok(bytes),
            Err(e) => {
                remove_quietly(temp).await;
                Err(AppError::DownloadFailed(format!(
                    "Failed to move {} into place: {}",
                    temp.display(),
                    e
                )))
            }
        },
        Err(e) => {
            remove_quietly(temp).await;
            Err(AppError::DownloadFailed(e))
        }
    }
}

async fn write_stream<S, B, E>(stream: S, temp: &Path) -> Result<u64, String>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut file = tokio::fs::File::create(temp)
        .await
        .map_err(|e| format!("Failed to create {}: {}", temp.display(), e))?;

    let mut stream = std::pin::pin!(stream);
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| format!("Stream error: {}", e))?;
        let chunk = chunk.as_ref();
        file.write_all(chunk)
            .await
            .map_err(|e| format!("Write error: {}", e))?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(|e| format!("Flush error: {}", e))?;
    file.sync_all().await.map_err(|e| format!("Sync error: {}", e))?;
    Ok(written)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial download");
        }
    }
}

/// Keep alphanumerics, space, hyphen and underscore; trim the result.
pub fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>()
        .trim()
        .to_string()
}
