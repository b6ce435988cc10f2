// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

#![allow(dead_code)]

use meeting_archiver::config::Config;
use meeting_archiver::db::{FolderMapping, MemoryStore};
use meeting_archiver::models::UserCredential;
use meeting_archiver::routes::create_router;
use meeting_archiver::services::{
    ArchivalRouter, ArchivePipeline, DownloadEngine, Notifier, ScheduledJob, Scheduler,
};
use meeting_archiver::AppState;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

/// Scheduler that queues jobs until the test runs them.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<VecDeque<ScheduledJob>>,
    delays: Mutex<Vec<Duration>>,
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, job: ScheduledJob) {
        self.delays.lock().unwrap().push(delay);
        self.queue.lock().unwrap().push_back(job);
    }
}

impl ManualScheduler {
    /// Jobs waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Every delay requested so far, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }

    /// Run the oldest queued job to completion. Returns false if none.
    pub async fn run_next(&self) -> bool {
        let job = self.queue.lock().unwrap().pop_front();
        match job {
            Some(job) => {
                job.await;
                true
            }
            None => false,
        }
    }

    /// Run jobs (including ones they schedule) until the queue is empty.
    pub async fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next().await {
            ran += 1;
        }
        ran
    }
}

/// Platform success envelope around `data`.
pub fn ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "code": 0,
        "msg": "success",
        "data": data,
    }))
}

pub async fn mount_tenant_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/v3/tenant_access_token/internal"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "msg": "ok",
            "tenant_access_token": "t-service",
            "expire": 7200,
        })))
        .mount(server)
        .await;
}

pub async fn mount_messages(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/im/v1/messages"))
        .respond_with(ok(json!({ "message_id": "om_1" })))
        .mount(server)
        .await;
}

/// Requests the mock server received on `route`.
pub async fn requests_to(server: &MockServer, route: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == route)
        .collect()
}

/// Message bodies sent through the messaging endpoint.
pub async fn sent_messages(server: &MockServer) -> Vec<String> {
    requests_to(server, "/im/v1/messages")
        .await
        .into_iter()
        .map(|r| String::from_utf8_lossy(&r.body).into_owned())
        .collect()
}

/// A wired application against a mock platform and temporary storage.
pub struct TestEnv {
    pub server: MockServer,
    pub root: TempDir,
    pub store: MemoryStore,
    pub scheduler: Arc<ManualScheduler>,
    pub state: Arc<AppState>,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut Config)) -> Self {
        let server = MockServer::start().await;
        let root = tempfile::tempdir().unwrap();

        let mut config = Config::test_default();
        config.api_base_url = server.uri();
        config.download_dir = root.path().join("downloads");
        config.archive_root = root.path().join("archive");
        config.token_file = root.path().join("user_tokens.json");
        config.folder_mapping_file = root.path().join("nas_mapping.json");
        customize(&mut config);

        std::fs::create_dir_all(&config.download_dir).unwrap();
        std::fs::create_dir_all(&config.archive_root).unwrap();

        let store = MemoryStore::new();
        let scheduler = Arc::new(ManualScheduler::default());
        let state = Arc::new(AppState::new(
            config,
            Arc::new(store.clone()),
            scheduler.clone(),
            None,
        ));

        Self {
            server,
            root,
            store,
            scheduler,
            state,
        }
    }

    pub fn router(&self) -> axum::Router {
        create_router(self.state.clone())
    }

    pub fn downloads(&self) -> &Path {
        &self.state.config.download_dir
    }

    pub fn archive(&self) -> &Path {
        &self.state.config.archive_root
    }

    /// Create a directory under the archive root.
    pub fn archive_dir(&self, relative: &str) -> PathBuf {
        let dir = self.archive().join(relative);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub async fn authorize(&self, credential: UserCredential) {
        use meeting_archiver::db::CredentialStore;
        self.store.save(&credential).await.unwrap();
    }

    pub fn engine(&self) -> DownloadEngine {
        let config = &self.state.config;
        DownloadEngine::new(
            self.state.client.clone(),
            self.state.credentials.clone(),
            config.download_dir.clone(),
            config.filename_offset,
        )
    }

    pub fn archival_router(&self) -> ArchivalRouter {
        let config = &self.state.config;
        ArchivalRouter::new(
            self.state.client.clone(),
            config.archive_root.clone(),
            FolderMapping::new(config.folder_mapping_file.clone()),
            None,
            config.sentinel_department.clone(),
        )
    }

    /// A pipeline built from the same parts as the poller's.
    pub fn pipeline(&self) -> ArchivePipeline {
        let config = &self.state.config;
        ArchivePipeline::new(
            self.state.credentials.clone(),
            self.engine(),
            self.archival_router(),
            Notifier::new(
                self.state.client.clone(),
                self.state.credentials.clone(),
                config.external_url.clone(),
            ),
        )
    }
}
