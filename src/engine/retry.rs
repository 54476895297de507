//! Bounded retry with a fixed delay between attempts.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::schedule::Shutdown;
use crate::types::AgentError;

/// Default attempts per swap before the tick is abandoned.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `op` until it succeeds, `classify` rejects the error, or the
    /// attempts run out. `op` receives the 1-based attempt number.
    ///
    /// The delay between attempts is a cancellable sleep; on shutdown the
    /// last error is returned without further attempts.
    pub async fn run<T, F, Fut, C>(
        &self,
        shutdown: &Shutdown,
        classify: C,
        mut op: F,
    ) -> Result<T, AgentError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
        C: Fn(&AgentError) -> bool,
    {
        let mut attempt = 1;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !classify(&err) {
                debug!(attempt, error = %err, "Non-retryable error");
                return Err(err);
            }
            if attempt >= self.max_attempts {
                warn!(attempts = attempt, error = %err, "Giving up after retries");
                return Err(err);
            }

            warn!(attempt, max = self.max_attempts, error = %err, "Attempt failed, retrying");
            if !shutdown.sleep(self.delay).await {
                return Err(err);
            }
            attempt += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
