//! Async utilities for cancellation-aware futures.
//!
//! Provides the `OrCancelExt` trait for racing futures against tokio's
//! `CancellationToken`, plus `CancelScope`, a composite cancellation
//! handle that merges an externally supplied token with an internally
//! derived deadline and releases its timer on every exit path.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Error returned when a future is cancelled.
#[derive(Debug, PartialEq, Eq)]
pub enum CancelErr {
    Cancelled,
}

/// Extension trait for making futures cancellable.
///
/// Allows any future to race against a `CancellationToken`, returning
/// `Err(CancelErr::Cancelled)` if the token is cancelled before the
/// future completes.
#[async_trait]
pub trait OrCancelExt: Sized {
    type Output;

    /// Race this future against the cancellation token.
    ///
    /// Returns `Ok(output)` if the future completes first, or
    /// `Err(CancelErr::Cancelled)` if the token is cancelled.
    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, CancelErr>;
}

#[async_trait]
impl<F> OrCancelExt for F
where
    F: Future + Send,
    F::Output: Send,
{
    type Output = F::Output;

    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, CancelErr> {
        tokio::select! {
            _ = token.cancelled() => Err(CancelErr::Cancelled),
            res = self => Ok(res),
        }
    }
}

/// Which source tripped a `CancelScope`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// The externally supplied token was cancelled.
    External,
    /// The internally derived deadline elapsed.
    Deadline,
}

/// Composite cancellation scope for one unit of work.
///
/// Merges an optional external `CancellationToken` with an optional
/// deadline into a single token. The deadline is driven by a spawned
/// timer task that marks itself before cancelling, so `cause()` can
/// distinguish a deadline expiry from an external cancellation. The
/// timer task is aborted when the scope is dropped; no timer or
/// listener outlives the scope regardless of how the work ends.
///
/// The composite token is a child of the external token: cancelling it
/// never propagates back to the caller's token.
#[derive(Debug)]
pub struct CancelScope {
    token: CancellationToken,
    deadline_hit: Arc<AtomicBool>,
    timer: Option<JoinHandle<()>>,
}

impl CancelScope {
    /// Create a scope from an optional external token and an optional
    /// deadline. With neither, the scope never cancels on its own.
    ///
    /// Must be called within a tokio runtime when `deadline` is set.
    pub fn new(external: Option<&CancellationToken>, deadline: Option<Duration>) -> Self {
        let token = external.map_or_else(CancellationToken::new, CancellationToken::child_token);
        let deadline_hit = Arc::new(AtomicBool::new(false));
        let timer = deadline.map(|timeout| {
            let token = token.clone();
            let hit = Arc::clone(&deadline_hit);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                hit.store(true, Ordering::SeqCst);
                token.cancel();
            })
        });
        Self {
            token,
            deadline_hit,
            timer,
        }
    }

    /// The composite token to pass to `or_cancel` or `select!` arms.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Which source tripped the scope, or `None` if it has not tripped.
    ///
    /// If both sources fire close together the deadline wins, since its
    /// flag is set before the token is cancelled.
    pub fn cause(&self) -> Option<CancelCause> {
        if !self.token.is_cancelled() {
            None
        } else if self.deadline_hit.load(Ordering::SeqCst) {
            Some(CancelCause::Deadline)
        } else {
            Some(CancelCause::External)
        }
    }
}

impl Drop for CancelScope {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
