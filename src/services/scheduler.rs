// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Delayed job scheduling.
//!
//! The poller decides *what* runs next and *after how long*; a `Scheduler`
//! decides how the runtime wakes it up. Jobs are futures, so a waiting job
//! holds a timer, not a thread.

use futures_util::future::BoxFuture;
use std::time::Duration;

/// A unit of deferred work.
pub type ScheduledJob = BoxFuture<'static, ()>;

/// Runs jobs after a delay without blocking the caller.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, job: ScheduledJob);
}

/// Scheduler backed by the tokio runtime timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, job: ScheduledJob) {
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            job.await;
        });
    }
}
