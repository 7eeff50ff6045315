use super::orchestrator::BatchOrchestrator;
use crate::domain::ports::Job;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Retry policy for failed orchestrator invocations.
///
/// Delay grows geometrically: `base_delay * 2^attempt`. After `max_attempts`
/// the job is dead-lettered with an error log and left for manual
/// intervention; items stuck PROCESSING without a reference stay eligible for
/// a future manual re-trigger.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Drains the job queue and drives orchestrator invocations.
///
/// The runner enforces no per-batch mutual exclusion: multiple workers may
/// execute the same batch concurrently, and safety comes entirely from the
/// item eligibility filter and terminal-status gates.
pub struct JobRunner {
    orchestrator: Arc<BatchOrchestrator>,
    policy: RetryPolicy,
}

impl JobRunner {
    pub fn new(orchestrator: Arc<BatchOrchestrator>, policy: RetryPolicy) -> Self {
        Self {
            orchestrator,
            policy,
        }
    }

    /// Spawns the runner loop on the current runtime. The loop ends when the
    /// queue's sender side is dropped.
    pub fn spawn(self, mut jobs: mpsc::UnboundedReceiver<Job>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(job) = jobs.recv().await {
                self.run_job(job).await;
            }
        })
    }

    /// Runs one job to completion or dead-letter.
    pub async fn run_job(&self, job: Job) {
        let Job::ProcessBatch(batch_id) = job;
        for attempt in 0..self.policy.max_attempts {
            match self.orchestrator.execute(batch_id).await {
                Ok(()) => {
                    info!(batch_id, attempt, "Batch processing pass succeeded");
                    return;
                }
                Err(error) if attempt + 1 < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        batch_id,
                        attempt,
                        %error,
                        delay_ms = delay.as_millis() as u64,
                        "Batch processing failed; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    error!(
                        batch_id,
                        attempts = self.policy.max_attempts,
                        %error,
                        "Batch processing exhausted retries; dead-lettered"
                    );
                }
            }
        }
    }
}
