//! Exponential backoff retry for portal calls.
//!
//! Login, page fetches and phone lookups all share the same retry shape:
//! call, classify the error, and either give up or sleep and try again.
//! [`Backoff`] holds the schedule; [`Backoff::retry`] drives any async
//! operation through it.
//!
//! # Retry Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..=jitter)
//! ```
//!
//! Only errors the caller marks as transient are retried. Anything else is
//! returned immediately together with the number of attempts made.

use rand::{rng, Rng};
use std::fmt;
use std::future::Future;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, warn};

/// Retry schedule with exponential growth, a cap, and random jitter.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Maximum number of retries after the first attempt.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: StdDuration,
    /// Maximum delay cap to prevent excessive waiting.
    max_delay: StdDuration,
    /// Upper bound of the random jitter added to every delay.
    jitter: StdDuration,
}

/// The error that ended a retry loop and how many attempts were made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<E> {
    pub error: E,
    pub attempts: usize,
}

impl Backoff {
    /// # Example
    ///
    /// ```ignore
    /// let backoff = Backoff::new(3, Duration::from_secs(1));
    /// let html = backoff.retry("page", || portal.listing_page(&session, 4), RequestError::is_transient).await;
    /// ```
    pub fn new(max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
            jitter: base_delay.min(StdDuration::from_millis(250)),
        }
    }

    pub fn with_max_delay(mut self, max_delay: StdDuration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn delay_for(&self, attempt: usize) -> StdDuration {
        let shift = attempt.saturating_sub(1).min(31) as u32;
        let delay = self.base_delay.saturating_mul(1u32 << shift);
        delay.min(self.max_delay)
    }

    fn jittered(&self, attempt: usize) -> StdDuration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter_ms: u64 = if jitter_ms == 0 {
            0
        } else {
            rng().random_range(0..=jitter_ms)
        };
        self.delay_for(attempt) + StdDuration::from_millis(jitter_ms)
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    pub async fn retry<T, E, F, Fut>(
        &self,
        label: &str,
        mut op: F,
        is_transient: impl Fn(&E) -> bool,
    ) -> Result<T, Exhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if !is_transient(&e) {
                        return Err(Exhausted { error: e, attempts: attempt });
                    }

                    if attempt > self.max_retries {
                        error!(
                            label,
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "exhausted retries"
                        );
                        return Err(Exhausted { error: e, attempts: attempt });
                    }

                    let delay = self.jittered(attempt);
                    warn!(
                        label,
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backoff")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}
