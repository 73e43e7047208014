use std::{future::Future, time::Duration};

use crate::error::MirrorResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * 2^(attempt - 1)`
    Exponential { base: Duration },
    /// `step * attempt`
    Linear { step: Duration },
}

/// How many times a transient failure is retried, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Used for manifests and keys.
    pub fn exponential() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(100),
            },
            max_delay: Duration::from_secs(10),
        }
    }

    /// Used for segment bodies.
    pub fn linear() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::Linear {
                step: Duration::from_millis(500),
            },
            max_delay: Duration::from_secs(10),
        }
    }

    pub fn retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Exponential { base } => {
                let shift = attempt.saturating_sub(1).min(16);
                base.saturating_mul(1 << shift)
            }
            Backoff::Linear { step } => step.saturating_mul(attempt),
        };
        delay.min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// retries are used up. The last error is returned in the latter cases.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> MirrorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = MirrorResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        "Request failed, retry in {delay:?} ({attempt}/{}). {e}",
                        self.max_retries
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}
