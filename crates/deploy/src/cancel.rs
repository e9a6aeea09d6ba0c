//! Cancellation of a running orchestration.
//!
//! Every suspension point (mining, confirmation wait, backoff) is raced against a
//! [`CancelSignal`]. Cancelling never rolls anything back: executors stop waiting and report
//! whatever already reached the chain.

use std::{future::Future, time::Duration};

use tokio::{sync::watch, time::Instant};

use crate::DeployError;

/// Triggers cancellation of every [`CancelSignal`] created alongside it.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observes a cancellation request or an overall deadline.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

/// Create a connected handle and signal.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx, deadline: None })
}

impl CancelSignal {
    /// A signal that is never triggered (unless a timeout is attached).
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx, deadline: None }
    }

    /// Also cancel once `timeout` has elapsed from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Completes once cancellation has been requested or the deadline has passed.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let requested = async move {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                // The handle is gone, so only the deadline can fire now.
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        };

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = requested => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => requested.await,
        }
    }

    /// Drive `fut` to completion unless cancellation comes first.
    pub async fn run<F: Future>(&self, step: &str, fut: F) -> Result<F::Output, DeployError> {
        tokio::select! {
            biased;
            _ = self.cancelled() => {
                tracing::warn!(step, "Cancellation requested, abandoning wait");
                Err(DeployError::Cancelled { step: step.to_string() })
            }
            output = fut => Ok(output),
        }
    }
}
