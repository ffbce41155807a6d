//! Bounded retries with a fixed delay between attempts.
//!
//! Device activation, playback transfer and starting playback all retry the
//! same way: up to `max_attempts` tries, `delay` apart, for as long as the
//! failure is considered retryable. There is never an attempt past the bound,
//! and no delay after the last attempt.

use std::{future::Future, time::Duration};

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Runs `operation` until it succeeds, fails with an error that
    /// `is_retryable` rejects, or the attempts are exhausted.
    ///
    /// `operation` receives the attempt number, starting at 1.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt.
    pub async fn run<T, F, Fut, P>(&self, mut operation: F, is_retryable: P) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&Error) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt >= max_attempts {
                        debug!("giving up after {attempt} attempts: {e}");
                        return Err(e);
                    }

                    if !is_retryable(&e) {
                        debug!("not retrying after attempt {attempt}: {e}");
                        return Err(e);
                    }

                    debug!(
                        "attempt {attempt}/{max_attempts} failed, retrying in {}ms: {e}",
                        self.delay.as_millis()
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use tokio::time::Instant;

    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test(start_paused = true)]
    async fn stops_at_the_bound() {
        let calls = Cell::new(0);
        let started = Instant::now();

        let result: Result<()> = RetryPolicy::new(3, Duration::from_secs(1))
            .run(
                |_| {
                    calls.set(calls.get() + 1);
                    async { Err(Error::not_found("device")) }
                },
                |_| true,
            )
            .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::NotFound);
        assert_eq!(calls.get(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_rejected_errors() {
        let calls = Cell::new(0);

        let result: Result<()> = RetryPolicy::new(5, Duration::from_secs(1))
            .run(
                |_| {
                    calls.set(calls.get() + 1);
                    async { Err(Error::unauthenticated("expired")) }
                },
                |e| !e.kind.is_authorization(),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_first_success() {
        let started = Instant::now();

        let result = RetryPolicy::new(3, Duration::from_millis(500))
            .run(
                |attempt| async move {
                    if attempt < 2 {
                        Err(Error::unavailable("offline"))
                    } else {
                        Ok(attempt)
                    }
                },
                |_| true,
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }
}
