// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Recording retrieval models: polling tasks, download jobs, archive targets.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Lifecycle of a recording poll sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    Scheduled,
    Polling,
    /// Recording URL obtained and handed to the download pipeline.
    Downloaded,
    /// No usable credential for the owner.
    AuthBlocked,
    /// Attempt ceiling reached without a recording.
    TimedOut,
    /// The platform reported a recording URL without a recognizable object token.
    Unrecognized,
}

impl PollState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PollState::Scheduled | PollState::Polling)
    }
}

/// What started a poll sequence. Decides the delay before the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollTrigger {
    /// The meeting just ended; the recording is still being generated.
    MeetingEnded,
    /// The owner re-authorized after a failure; the recording is likely ready.
    Reauthorized,
}

/// One polling sequence for one meeting. Exists only in memory.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingTask {
    pub meeting_id: String,
    pub owner_user_id: String,
    /// Number of the next (or current) attempt, starting at 1.
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub state: PollState,
}

impl RecordingTask {
    pub fn new(meeting_id: impl Into<String>, owner_user_id: impl Into<String>) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            owner_user_id: owner_user_id.into(),
            attempt_count: 1,
            created_at: Utc::now(),
            state: PollState::Scheduled,
        }
    }
}

/// A recording ready to be fetched and archived.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    /// Opaque identifier of the recording artifact
    pub object_token: String,
    pub owner_user_id: String,
    pub meeting_id: Option<String>,
    /// Owner display name used for the filename and personal folder match
    pub owner_name: String,
    /// Filename including extension
    pub resolved_filename: String,
    pub destination_path: PathBuf,
}

impl DownloadJob {
    /// Sibling path the body is streamed into before the final rename.
    pub fn temp_path(&self) -> PathBuf {
        let mut name = self.destination_path.clone().into_os_string();
        name.push(".downloading");
        PathBuf::from(name)
    }
}

/// Where a downloaded recording should end up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchivalDestination {
    /// Folder name under the archive root
    pub personal_folder: Option<String>,
    /// Department names under `<archive root>/team/`
    pub team_folders: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_path_is_a_sibling() {
        let job = DownloadJob {
            object_token: "obcn1".to_string(),
            owner_user_id: "u1".to_string(),
            meeting_id: None,
            owner_name: "u1".to_string(),
            resolved_filename: "obcn1.mp4".to_string(),
            destination_path: PathBuf::from("/tmp/downloads/obcn1.mp4"),
        };
        assert_eq!(
            job.temp_path(),
            PathBuf::from("/tmp/downloads/obcn1.mp4.downloading")
        );
    }

    #[test]
    fn new_task_starts_at_first_attempt() {
        let task = RecordingTask::new("m1", "u1");
        assert_eq!(task.attempt_count, 1);
        assert_eq!(task.state, PollState::Scheduled);
        assert!(!task.state.is_terminal());
        assert!(PollState::TimedOut.is_terminal());
    }
}
