// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Recording readiness poller.
//!
//! A meeting-ended event starts a [`RecordingTask`]. Each attempt asks the
//! platform whether the recording exists yet; while it does not, the task is
//! rescheduled on a tiered interval (dense early, sparse later) until the
//! attempt ceiling is reached.
//!
//! Tasks live in an in-memory registry keyed by meeting ID. A second trigger
//! for a meeting that is already in flight is merged into the existing task.

use crate::error::AppError;
use crate::models::{PollState, PollTrigger, RecordingTask};
use crate::services::credentials::CredentialManager;
use crate::services::feishu::{FeishuClient, RecordingStatus};
use crate::services::pipeline::ArchivePipeline;
use crate::services::scheduler::Scheduler;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

/// Object tokens are `obcn` followed by alphanumerics.
static OBJECT_TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"obcn[A-Za-z0-9]+").unwrap());

/// Pull the recording's object token out of a recording URL.
///
/// A URL without a recognizable token yields `None`.
pub fn extract_object_token(url: &str) -> Option<String> {
    OBJECT_TOKEN_RE.find(url).map(|m| m.as_str().to_string())
}

/// Tiered polling intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait before the first attempt after a meeting ends
    pub initial_delay: Duration,
    /// Wait before attempts 2 through `DENSE_ATTEMPTS`
    pub dense_interval: Duration,
    /// Wait before later attempts, up to `MAX_ATTEMPTS`
    pub sparse_interval: Duration,
}

impl PollPolicy {
    pub const DENSE_ATTEMPTS: u32 = 5;
    pub const MAX_ATTEMPTS: u32 = 10;

    /// Delay before the attempt following `failed_attempt`, or `None` when the
    /// ceiling has been reached. The tier is chosen by the attempt about to run.
    pub fn next_delay(&self, failed_attempt: u32) -> Option<Duration> {
        let next = failed_attempt + 1;
        if next > Self::MAX_ATTEMPTS {
            None
        } else if next <= Self::DENSE_ATTEMPTS {
            Some(self.dense_interval)
        } else {
            Some(self.sparse_interval)
        }
    }

    /// Delay before the first attempt.
    pub fn first_delay(&self, trigger: PollTrigger) -> Duration {
        match trigger {
            PollTrigger::MeetingEnded => self.initial_delay,
            PollTrigger::Reauthorized => Duration::ZERO,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            dense_interval: Duration::from_secs(60),
            sparse_interval: Duration::from_secs(300),
        }
    }
}

/// Wait after a recording-ready event before fetching media.
pub const READY_GRACE: Duration = Duration::from_secs(60);

struct PollerInner {
    client: FeishuClient,
    credentials: CredentialManager,
    pipeline: ArchivePipeline,
    scheduler: Arc<dyn Scheduler>,
    policy: PollPolicy,
    tasks: DashMap<String, RecordingTask>,
}

/// Drives recording tasks to a terminal state.
#[derive(Clone)]
pub struct RecordingPoller {
    inner: Arc<PollerInner>,
}

impl RecordingPoller {
    pub fn new(
        client: FeishuClient,
        credentials: CredentialManager,
        pipeline: ArchivePipeline,
        scheduler: Arc<dyn Scheduler>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                client,
                credentials,
                pipeline,
                scheduler,
                policy,
                tasks: DashMap::new(),
            }),
        }
    }

    pub fn policy(&self) -> PollPolicy {
        self.inner.policy
    }

    /// Snapshot of the tasks currently in flight.
    pub fn in_flight(&self) -> Vec<RecordingTask> {
        self.inner
            .tasks
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// The in-flight task for a meeting, if any.
    pub fn task(&self, meeting_id: &str) -> Option<RecordingTask> {
        self.inner.tasks.get(meeting_id).map(|t| t.value().clone())
    }

    /// Start polling for a meeting's recording.
    ///
    /// Returns `false` (and does nothing) if the meeting already has a task.
    pub fn start_polling(&self, meeting_id: &str, owner_id: &str, trigger: PollTrigger) -> bool {
        if !self.register(meeting_id, owner_id) {
            tracing::info!(meeting_id, owner_id, "Meeting already in flight, merging trigger");
            return false;
        }

        let delay = self.inner.policy.first_delay(trigger);
        tracing::info!(
            meeting_id,
            owner_id,
            ?trigger,
            delay_secs = delay.as_secs(),
            "Recording poll scheduled"
        );
        self.schedule_attempt(meeting_id.to_string(), delay);
        true
    }

    /// Hand a recording announced as ready straight to the pipeline after a
    /// grace delay, without polling.
    pub fn accept_ready_recording(&self, meeting_id: &str, owner_id: &str, url: &str) -> bool {
        let Some(object_token) = extract_object_token(url) else {
            tracing::warn!(meeting_id, url, "Recording URL has no object token");
            return false;
        };

        if !self.register(meeting_id, owner_id) {
            tracing::info!(meeting_id, "Meeting already in flight, ignoring ready event");
            return false;
        }
        self.update(meeting_id, |task| task.state = PollState::Downloaded);

        tracing::info!(meeting_id, owner_id, object_token = %object_token, "Recording ready, download scheduled");

        let poller = self.clone();
        let meeting_id = meeting_id.to_string();
        let owner_id = owner_id.to_string();
        self.inner.scheduler.schedule(
            READY_GRACE,
            Box::pin(async move {
                poller
                    .inner
                    .pipeline
                    .process(&owner_id, Some(&meeting_id), &object_token)
                    .await;
                poller.finish(&meeting_id, PollState::Downloaded);
            }),
        );
        true
    }

    fn register(&self, meeting_id: &str, owner_id: &str) -> bool {
        match self.inner.tasks.entry(meeting_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(RecordingTask::new(meeting_id, owner_id));
                true
            }
        }
    }

    fn schedule_attempt(&self, meeting_id: String, delay: Duration) {
        let poller = self.clone();
        self.inner.scheduler.schedule(
            delay,
            Box::pin(async move {
                poller.run_attempt(&meeting_id).await;
            }),
        );
    }

    /// Apply `f` to the task and return a copy of the result.
    fn update(
        &self,
        meeting_id: &str,
        f: impl FnOnce(&mut RecordingTask),
    ) -> Option<RecordingTask> {
        let mut task = self.inner.tasks.get_mut(meeting_id)?;
        f(&mut task);
        Some(task.clone())
    }

    fn finish(&self, meeting_id: &str, state: PollState) {
        if let Some((_, task)) = self.inner.tasks.remove(meeting_id) {
            tracing::debug!(
                meeting_id,
                ?state,
                attempts = task.attempt_count,
                "Recording task finished"
            );
        }
    }

    async fn run_attempt(&self, meeting_id: &str) {
        let Some(task) = self.update(meeting_id, |task| task.state = PollState::Polling) else {
            tracing::warn!(meeting_id, "Scheduled attempt for unknown task");
            return;
        };
        let owner_id = task.owner_user_id.as_str();
        let inner = &self.inner;

        tracing::info!(meeting_id, owner_id, attempt = task.attempt_count, "Checking recording status");

        match inner.credentials.lookup(owner_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::error!(meeting_id, owner_id, "No credential for meeting owner");
                self.finish(meeting_id, PollState::AuthBlocked);
                inner
                    .pipeline
                    .notifier()
                    .notify_auth_failure(owner_id, Some(meeting_id))
                    .await;
                return;
            }
            Err(e) => {
                tracing::warn!(meeting_id, owner_id, error = %e, "Credential lookup failed");
                self.retry_later(&task);
                return;
            }
        }

        let status = inner
            .credentials
            .with_auto_refresh(owner_id, |token| async move {
                inner.client.get_recording(&token, meeting_id).await
            })
            .await;

        match status {
            Ok(RecordingStatus::Ready(url)) => match extract_object_token(&url) {
                Some(object_token) => {
                    self.update(meeting_id, |task| task.state = PollState::Downloaded);
                    tracing::info!(meeting_id, object_token = %object_token, "Recording ready");
                    inner
                        .pipeline
                        .process(owner_id, Some(meeting_id), &object_token)
                        .await;
                    self.finish(meeting_id, PollState::Downloaded);
                }
                None => {
                    tracing::warn!(meeting_id, url = %url, "Recording URL has no object token");
                    self.finish(meeting_id, PollState::Unrecognized);
                }
            },
            Ok(RecordingStatus::NotReady) => {
                tracing::info!(meeting_id, attempt = task.attempt_count, "Recording not ready yet");
                self.retry_later(&task);
            }
            Err(AppError::AuthFailure(msg)) => {
                tracing::error!(meeting_id, owner_id, error = %msg, "Authorization failed while polling");
                self.finish(meeting_id, PollState::AuthBlocked);
                inner
                    .pipeline
                    .notifier()
                    .notify_auth_failure(owner_id, Some(meeting_id))
                    .await;
            }
            Err(e) => {
                tracing::warn!(meeting_id, error = %e, "Recording status query failed");
                self.retry_later(&task);
            }
        }
    }

    fn retry_later(&self, task: &RecordingTask) {
        let meeting_id = task.meeting_id.as_str();
        match self.inner.policy.next_delay(task.attempt_count) {
            Some(delay) => {
                self.update(meeting_id, |task| {
                    task.attempt_count += 1;
                    task.state = PollState::Scheduled;
                });
                tracing::debug!(
                    meeting_id,
                    next_attempt = task.attempt_count + 1,
                    delay_secs = delay.as_secs(),
                    "Rescheduling recording poll"
                );
                self.schedule_attempt(meeting_id.to_string(), delay);
            }
            None => {
                self.update(meeting_id, |task| task.attempt_count += 1);
                tracing::warn!(
                    meeting_id,
                    owner_id = %task.owner_user_id,
                    attempts = task.attempt_count,
                    "Gave up waiting for recording"
                );
                self.finish(meeting_id, PollState::TimedOut);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_object_token() {
        assert_eq!(
            extract_object_token("https://meetings.feishu.cn/minutes/obcnABC123?from=vc").as_deref(),
            Some("obcnABC123")
        );
        assert_eq!(extract_object_token("https://meetings.feishu.cn/minutes/"), None);
        assert_eq!(extract_object_token(""), None);
    }

    #[test]
    fn tiered_policy() {
        let policy = PollPolicy::default();
        let delays: Vec<_> = (1..=10).map(|n| policy.next_delay(n)).collect();

        // Attempts 2-5 follow a dense wait, attempts 6-10 a sparse one.
        for d in &delays[..4] {
            assert_eq!(*d, Some(Duration::from_secs(60)));
        }
        for d in &delays[4..9] {
            assert_eq!(*d, Some(Duration::from_secs(300)));
        }
        assert_eq!(delays[9], None);
    }

    #[test]
    fn first_delay_depends_on_trigger() {
        let policy = PollPolicy::default();
        assert_eq!(policy.first_delay(PollTrigger::MeetingEnded), Duration::from_secs(30));
        assert_eq!(policy.first_delay(PollTrigger::Reauthorized), Duration::ZERO);
    }
}
