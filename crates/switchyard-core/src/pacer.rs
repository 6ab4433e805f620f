//! Pacer — interruptible sleeps for polling loops.
//!
//! Every wait inside a deployment goes through a `Pacer`, which races the
//! wait against an explicit cancel signal and an optional overall
//! deadline. Time comes from tokio's clock, so tests running with a paused
//! runtime advance through hours of monitoring instantly.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a paced wait stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("cancelled by caller")]
    Cancelled,
    #[error("deployment deadline exceeded")]
    DeadlineExceeded,
}

/// Sender side of a pacer's cancel signal.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal cancellation to every pacer sharing this handle.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Cancellable, deadline-bounded pacing.
#[derive(Debug, Clone)]
pub struct Pacer {
    cancel: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

impl Pacer {
    /// A pacer that can never be cancelled and has no deadline.
    pub fn unbounded() -> Self {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        Self {
            cancel: rx,
            deadline: None,
        }
    }

    /// A pacer plus the handle that cancels it.
    pub fn cancellable() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (
            CancelHandle { tx },
            Self {
                cancel: rx,
                deadline: None,
            },
        )
    }

    /// Bound every wait by `timeout` from now. An earlier existing deadline wins.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Bound every wait by an absolute deadline. An earlier existing deadline wins.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fail fast if the pacer is already cancelled or past its deadline.
    pub fn check(&self) -> Result<(), Interrupted> {
        if *self.cancel.borrow() {
            return Err(Interrupted::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Interrupted::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Sleep for `duration`, waking early on cancellation or deadline.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        self.check()?;
        let wake = Instant::now() + duration;
        let until = match self.deadline {
            Some(deadline) if deadline < wake => deadline,
            _ => wake,
        };

        let mut cancel = self.cancel.clone();
        tokio::select! {
            _ = tokio::time::sleep_until(until) => {}
            _ = cancelled(&mut cancel) => return Err(Interrupted::Cancelled),
        }
        self.check()
    }

    /// Run `fut` to completion unless the pacer is interrupted first.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        self.check()?;
        let mut cancel = self.cancel.clone();
        let deadline = self.deadline;
        tokio::select! {
            out = fut => Ok(out),
            _ = cancelled(&mut cancel) => Err(Interrupted::Cancelled),
            _ = until_deadline(deadline) => Err(Interrupted::DeadlineExceeded),
        }
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Resolves once cancellation is signalled; never resolves if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
