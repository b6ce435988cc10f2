// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod credential;
pub mod recording;

pub use credential::UserCredential;
pub use recording::{ArchivalDestination, DownloadJob, PollState, PollTrigger, RecordingTask};
