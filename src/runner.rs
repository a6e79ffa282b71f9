//! Shared batch-loop machinery: poll-until-terminal, capped retry with
//! backoff, and cancellation-aware sleeps. Both batch sources (offset
//! audit, registry scan) drive their runs through here.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::pipeline::PipelineApi;
use crate::types::RunStatus;

/// Backoff schedule for transient status-check failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Consecutive failed polls tolerated before giving up.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the `attempt`-th consecutive failure
    /// (1-based): initial delay doubled per failure, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1 << exponent)
            .min(self.max_delay)
    }
}

/// Timing knobs for one batch drive.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub chunk_size: u64,
    pub poll_interval: Duration,
    /// Courtesy pause between batches, not an adaptive backoff.
    pub batch_delay: Duration,
    pub retry: RetryPolicy,
}

impl RunnerConfig {
    pub fn audit_defaults() -> Self {
        Self {
            chunk_size: 10,
            poll_interval: Duration::from_secs(2),
            batch_delay: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }

    pub fn registry_defaults() -> Self {
        Self {
            chunk_size: 5,
            poll_interval: Duration::from_secs(2),
            batch_delay: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}

/// Why a poll loop stopped.
#[derive(Debug)]
pub enum PollOutcome {
    Terminal(RunStatus),
    Cancelled,
}

/// Poll `run_id` until the run reaches a terminal state.
///
/// Transient failures back off per the retry policy and give up after
/// `max_attempts` consecutive misses; a successful poll resets the
/// counter. Once a terminal status is observed no further poll is
/// issued.
pub(crate) async fn poll_until_terminal<P: PipelineApi>(
    api: &P,
    run_id: &str,
    config: &RunnerConfig,
    cancel: &CancellationToken,
) -> Result<PollOutcome, String> {
    let mut failures: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Ok(PollOutcome::Cancelled);
        }

        match api.run_status(run_id).await {
            Ok(status) => {
                eprint!(
                    "\rstatus: {} | generated: {} | written: {}",
                    status.state,
                    tally(status.results.generated),
                    tally(status.results.written),
                );
                if status.state.is_terminal() {
                    eprintln!();
                    return Ok(PollOutcome::Terminal(status));
                }
                failures = 0;
                if sleep_or_cancel(config.poll_interval, cancel).await {
                    eprintln!();
                    return Ok(PollOutcome::Cancelled);
                }
            }
            Err(e) => {
                failures += 1;
                if failures >= config.retry.max_attempts {
                    return Err(format!(
                        "status check for run {run_id} failed {failures} times in a row, \
                         giving up: {e}"
                    ));
                }
                let delay = config.retry.delay_for(failures);
                eprintln!("status check failed ({e}), retrying in {}s", delay.as_secs());
                if sleep_or_cancel(delay, cancel).await {
                    return Ok(PollOutcome::Cancelled);
                }
            }
        }
    }
}

fn tally(count: Option<i64>) -> String {
    count.map_or_else(|| "-".to_string(), |n| n.to_string())
}

/// Sleep for `duration` unless cancelled first. Returns true on cancel.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
