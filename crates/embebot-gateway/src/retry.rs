//! Persisted verification worklist.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use embebot_core::ids::{ChannelId, MessageId};
use embebot_core::RestError;
use embebot_store::{RetryTask, RetryTaskRepo, StoreError};

/// Checks that a side effect took hold on the remote, and re-applies it when
/// it did not.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn check(&self, task: &RetryTask) -> Result<bool, RestError>;
    async fn correct(&self, task: &RetryTask) -> Result<(), RestError>;
}

/// Outcome counts of one drain pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub verified: usize,
    pub retried: usize,
    pub exhausted: usize,
    pub failed: usize,
    /// Tasks whose outcome could not be written; they stay queued.
    pub store_errors: usize,
    pub remaining: usize,
}

pub struct RetryQueue {
    repo: RetryTaskRepo,
    verifier: Arc<dyn Verifier>,
    max_attempts: u32,
}

impl RetryQueue {
    pub fn new(repo: RetryTaskRepo, verifier: Arc<dyn Verifier>, max_attempts: u32) -> Self {
        Self {
            repo,
            verifier,
            max_attempts,
        }
    }

    /// Returns false when a task for `target_id` is already queued.
    pub fn enqueue(&self, target_id: MessageId, channel_id: ChannelId) -> Result<bool, StoreError> {
        let added = self
            .repo
            .insert_if_absent(&RetryTask::new(target_id, channel_id))?;
        Ok(added)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        self.repo.count()
    }

    /// Verify every queued task once. A store failure on one task is logged
    /// and leaves that task queued for the next pass.
    pub async fn drain(&self) -> Result<DrainReport, StoreError> {
        let tasks = self.repo.list()?;
        let mut report = DrainReport::default();

        for task in tasks {
            match self.settle(&task).await {
                Ok(Outcome::Verified) => report.verified += 1,
                Ok(Outcome::Retried) => report.retried += 1,
                Ok(Outcome::Exhausted) => report.exhausted += 1,
                Ok(Outcome::Failed) => report.failed += 1,
                Err(e) => {
                    error!(target_id = %task.target_id, error = %e, "failed to record verification");
                    report.store_errors += 1;
                }
            }
        }

        report.remaining = report.retried + report.store_errors;
        if report != DrainReport::default() {
            info!(
                verified = report.verified,
                retried = report.retried,
                exhausted = report.exhausted,
                failed = report.failed,
                store_errors = report.store_errors,
                "retry queue drained"
            );
        }
        Ok(report)
    }

    async fn settle(&self, task: &RetryTask) -> Result<Outcome, StoreError> {
        match self.verifier.check(task).await {
            Ok(true) => {
                debug!(target_id = %task.target_id, attempts = task.attempts, "verified");
                self.repo.delete(&task.target_id)?;
                Ok(Outcome::Verified)
            }
            Ok(false) => {
                if let Err(e) = self.verifier.correct(task).await {
                    warn!(
                        target_id = %task.target_id,
                        error = %e,
                        kind = e.error_kind(),
                        "correction failed, dropping task"
                    );
                    self.repo.delete(&task.target_id)?;
                    return Ok(Outcome::Failed);
                }
                let attempts = task.attempts + 1;
                if attempts >= self.max_attempts {
                    warn!(target_id = %task.target_id, attempts, "giving up on verification");
                    self.repo.delete(&task.target_id)?;
                    Ok(Outcome::Exhausted)
                } else {
                    self.repo.update_attempts(&task.target_id, attempts)?;
                    Ok(Outcome::Retried)
                }
            }
            Err(e) => {
                warn!(
                    target_id = %task.target_id,
                    error = %e,
                    kind = e.error_kind(),
                    "verification check failed, dropping task"
                );
                self.repo.delete(&task.target_id)?;
                Ok(Outcome::Failed)
            }
        }
    }
}

enum Outcome {
    Verified,
    Retried,
    Exhausted,
    Failed,
}
