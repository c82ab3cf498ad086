//! Per-request cancellation and deadline signal.
//!
//! A [`RequestContext`] travels with every ledger call. Units of work race
//! their transaction body against [`RequestContext::done`] and roll back when
//! the context fires first.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};

use crate::wallet::{WalletError, WalletResult};

/// Cancellation and deadline carried by a single request
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
    cancelled: Option<watch::Receiver<bool>>,
}

/// Fires the cancellation signal of the context it was created with
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    /// Cancel every clone of the associated context
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

impl RequestContext {
    /// A context that never fires
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().with_deadline(Instant::now() + timeout)
    }

    /// Tighten the deadline; an earlier existing deadline wins
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Attach a cancellation signal
    pub fn cancellable(mut self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        self.cancelled = Some(rx);
        (self, CancelHandle(tx))
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Fail fast if the context has already fired
    pub fn check(&self) -> WalletResult<()> {
        if self.is_cancelled() {
            return Err(WalletError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(WalletError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Resolve once the context is cancelled or its deadline passes
    ///
    /// Never resolves for a background context. A dropped [`CancelHandle`]
    /// counts as "never cancelled".
    pub async fn done(&self) -> WalletError {
        let cancelled = async {
            if let Some(mut rx) = self.cancelled.clone() {
                let fired = rx.wait_for(|cancelled| *cancelled).await.is_ok();
                if fired {
                    return;
                }
            }
            std::future::pending::<()>().await
        };

        let expired = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = cancelled => WalletError::Cancelled,
            () = expired => WalletError::DeadlineExceeded,
        }
    }

    /// Await `fut` unless the context fires first, in which case `fut` is dropped
    pub async fn race<F, T>(&self, fut: F) -> WalletResult<T>
    where
        F: Future<Output = WalletResult<T>>,
    {
        tokio::select! {
            outcome = fut => outcome,
            err = self.done() => Err(err),
        }
    }
}
