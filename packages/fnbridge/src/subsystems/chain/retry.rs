use std::{fmt::Display, future::Future, time::Duration};

use tokio_util::sync::CancellationToken;

/// Capped exponential backoff. `max_attempts: None` retries until cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: Option<usize>,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn unbounded(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: None,
            initial_delay,
            max_delay,
        }
    }

    pub const fn bounded(attempts: usize, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: Some(attempts),
            initial_delay,
            max_delay,
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.initial_delay.min(self.max_delay),
            max: self.max_delay,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    Exhausted { attempts: usize, last: E },
    Cancelled,
}

/// Runs `op` until it succeeds, the policy runs out of attempts, or `cancel` fires.
/// Every failure is logged with `label`.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut backoff = policy.backoff();
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        attempt += 1;
        let err = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            res = op(attempt) => match res {
                Ok(value) => return Ok(value),
                Err(err) => err,
            },
        };

        if policy.max_attempts.is_some_and(|max| attempt >= max) {
            tracing::warn!("{label}: attempt {attempt} failed, giving up: {err}");
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        let delay = backoff.next_delay();
        tracing::warn!("{label}: attempt {attempt} failed, retrying in {delay:?}: {err}");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
