// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod archive;
pub mod credentials;
pub mod downloader;
pub mod feishu;
pub mod notifier;
pub mod pipeline;
pub mod poller;
pub mod scheduler;

pub use archive::{ArchivalRouter, OwnerLookup};
pub use credentials::CredentialManager;
pub use downloader::{DownloadEngine, DownloadOutcome};
pub use feishu::FeishuClient;
pub use notifier::Notifier;
pub use pipeline::{ArchivePipeline, PipelineReport};
pub use poller::{extract_object_token, PollPolicy, RecordingPoller};
pub use scheduler::{ScheduledJob, Scheduler, TokioScheduler};
