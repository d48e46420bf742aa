//! The explicit cancellation/deadline handle threaded through every call.
//!
//! Unlike an ambient task-local, a [`RequestContext`] is passed as the first
//! argument of every `Store` and `KeyService` method. Call sites observe
//! cancellation by racing their work against [`RequestContext::cancelled`].

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::Error;

#[derive(Debug, Clone)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new() -> Self {
        RequestContext { token: CancellationToken::new(), deadline: None }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        RequestContext { token: CancellationToken::new(), deadline: Some(Instant::now() + timeout) }
    }

    /// Derive a child context sharing this one's cancellation token, with
    /// its own deadline layered on top (the earlier of the two applies).
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) => Some(existing.min(candidate)),
            None => Some(candidate),
        };
        RequestContext { token: self.token.clone(), deadline }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolve to `Err(Error::Cancelled)` once the token is cancelled or the
    /// deadline passes, otherwise pending forever. Meant to be raced via
    /// `tokio::select!` against the actual unit of work.
    pub async fn cancelled(&self) -> Error {
        if self.is_expired() {
            return Error::Cancelled;
        }
        match self.deadline {
            Some(deadline) => {
                let sleep = tokio::time::sleep_until(deadline.into());
                tokio::select! {
                    _ = self.token.cancelled() => Error::Cancelled,
                    _ = sleep => Error::Cancelled,
                }
            }
            None => {
                self.token.cancelled().await;
                Error::Cancelled
            }
        }
    }

    /// Check the context's current state without waiting, surfacing
    /// `Error::Cancelled` if it is already done.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() || self.is_expired() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_is_not_cancelled() {
        let ctx = RequestContext::new();
        assert!(ctx.check().is_ok());
    }

    #[test]
    fn cancel_makes_check_fail() {
        let ctx = RequestContext::new();
        ctx.cancel();
        assert_eq!(ctx.check(), Err(Error::Cancelled));
    }

    #[test]
    fn past_deadline_is_expired() {
        let ctx = RequestContext::with_timeout(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(ctx.is_expired());
        assert_eq!(ctx.check(), Err(Error::Cancelled));
    }

    #[tokio::test]
    async fn cancelled_resolves_once_token_cancelled() {
        let ctx = RequestContext::new();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        ctx.cancel();
        assert_eq!(handle.await.unwrap(), Error::Cancelled);
    }
}
