//! Query context for cancellable database operations
//!
//! Every storage call takes a [`QueryContext`]. Cancelling its token, or
//! letting its deadline pass, aborts the statement in flight and surfaces as
//! `StorageError::Cancelled` / `StorageError::DeadlineExceeded`.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::StorageError;

/// Cancellation token plus optional deadline, passed to all database operations
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl QueryContext {
    /// A context that is never cancelled and has no deadline
    pub fn new() -> Self {
        Self::default()
    }

    /// Context bound to an existing token (e.g. a service shutdown token)
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self { cancel, deadline: None }
    }

    /// Same token, with a deadline `timeout` from now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// A context cancelled together with this one, but cancellable on its own
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Fails fast when the context is already finished.
    pub fn check(&self) -> Result<(), StorageError> {
        if self.cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(StorageError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> StorageError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancel.cancelled() => StorageError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => StorageError::DeadlineExceeded,
            },
            None => {
                self.cancel.cancelled().await;
                StorageError::Cancelled
            }
        }
    }

    /// Drive `fut` to completion unless the context finishes first, in which
    /// case `fut` is dropped.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            result = fut => result,
            err = self.done() => Err(err),
        }
    }
}

impl std::fmt::Display for QueryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.deadline {
            Some(deadline) => write!(
                f,
                "QueryContext(cancelled={}, remaining={:?})",
                self.cancel.is_cancelled(),
                deadline.saturating_duration_since(Instant::now())
            ),
            None => write!(f, "QueryContext(cancelled={})", self.cancel.is_cancelled()),
        }
    }
}
