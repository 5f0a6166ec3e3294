//! Bounded retry with doubling backoff.
//!
//! One combinator serves every collaborator call; callers pass a predicate
//! saying which errors are worth retrying.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Backoff never grows past this.
pub const MAX_BACKOFF: Duration = Duration::from_millis(800);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    pub fn from_config(config: &crate::config::RetryConfig) -> Self {
        Self {
            max_attempts: config.effective_max_attempts(),
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }

    /// Runs `op` until it succeeds, attempts run out, or `transient` rules
    /// the error out. The final error is returned unchanged.
    pub async fn run_if<T, E, F, Fut, P>(&self, what: &str, transient: P, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut delay = self.base_delay;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && transient(&e) => {
                    debug!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what, attempt, attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_BACKOFF);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Retries every failure.
    pub async fn run<T, E, F, Fut>(&self, what: &str, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.run_if(what, |_| true, op).await
    }
}
