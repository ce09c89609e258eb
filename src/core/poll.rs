//! Bounded polling for asynchronous provider operations
//!
//! Every long-running cloud operation is awaited through [`wait_for`], which
//! never blocks longer than the policy's timeout.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::{CloudError, WaitError};

/// Polling cadence and deadline for one kind of operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Short policy for tests and in-process providers
    pub fn immediate() -> Self {
        Self::new(Duration::from_millis(1), Duration::from_secs(5))
    }
}

/// Result of a single probe
#[derive(Debug)]
pub enum Probe<T> {
    /// Operation finished
    Ready(T),
    /// Still in progress
    Pending,
    /// Terminal failure reported by the provider
    Failed(String),
}

/// Poll `probe` until it is ready, fails, or the policy's timeout elapses
///
/// The probe runs at least once even with a zero timeout.
pub async fn wait_for<T, F, Fut>(
    what: &str,
    policy: PollPolicy,
    mut probe: F,
) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>, CloudError>>,
{
    let start = Instant::now();
    let mut polls: u32 = 0;

    loop {
        polls += 1;
        match probe().await? {
            Probe::Ready(value) => {
                tracing::debug!("{} ready after {} poll(s)", what, polls);
                return Ok(value);
            }
            Probe::Failed(reason) => {
                return Err(WaitError::Failed {
                    what: what.to_string(),
                    reason,
                });
            }
            Probe::Pending => {}
        }

        let elapsed = start.elapsed();
        if elapsed >= policy.timeout {
            return Err(WaitError::TimedOut {
                what: what.to_string(),
                elapsed,
            });
        }

        tracing::debug!("Waiting for {} ({}s elapsed)", what, elapsed.as_secs());
        tokio::time::sleep(policy.interval.min(policy.timeout - elapsed)).await;
    }
}
