// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Meeting-Archiver: automatic meeting recording acquisition and archival
//!
//! When a meeting ends, the service polls for its cloud recording, downloads
//! it on the owner's behalf, files it into the owner's personal folder and
//! the relevant department folders, and tells the owner where it went.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::{CredentialStore, FolderMapping};
use services::{
    ArchivalRouter, ArchivePipeline, CredentialManager, DownloadEngine, FeishuClient, Notifier,
    OwnerLookup, PollPolicy, RecordingPoller, Scheduler,
};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub client: FeishuClient,
    pub credentials: CredentialManager,
    pub poller: RecordingPoller,
}

impl AppState {
    /// Wire every service from the configuration.
    pub fn new(
        config: Config,
        store: Arc<dyn CredentialStore>,
        scheduler: Arc<dyn Scheduler>,
        owners: Option<Arc<dyn OwnerLookup>>,
    ) -> Self {
        let client = FeishuClient::new(config.api_base_url.clone());
        let credentials = CredentialManager::new(
            client.clone(),
            store,
            config.app_id.clone(),
            config.app_secret.clone(),
        );

        let engine = DownloadEngine::new(
            client.clone(),
            credentials.clone(),
            config.download_dir.clone(),
            config.filename_offset,
        );
        let router = ArchivalRouter::new(
            client.clone(),
            config.archive_root.clone(),
            FolderMapping::new(config.folder_mapping_file.clone()),
            owners,
            config.sentinel_department.clone(),
        );
        let notifier = Notifier::new(
            client.clone(),
            credentials.clone(),
            config.external_url.clone(),
        );
        let pipeline = ArchivePipeline::new(credentials.clone(), engine, router, notifier);

        let policy = PollPolicy {
            initial_delay: config.poll_initial_delay,
            dense_interval: config.poll_dense_interval,
            sparse_interval: config.poll_sparse_interval,
        };
        let poller = RecordingPoller::new(
            client.clone(),
            credentials.clone(),
            pipeline,
            scheduler,
            policy,
        );

        Self {
            config,
            client,
            credentials,
            poller,
        }
    }
}
