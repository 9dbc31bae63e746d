use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Isolation requested for a transaction.
///
/// SQLite transactions are always serializable; the level decides when the write lock
/// is taken. `ReadCommitted` begins deferred, `Serializable` begins immediate so a
/// read-then-write body cannot be invalidated by a concurrent writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    Serializable,
}

/// Deadline and cancellation signal for one operation.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
    cancel: Option<CancellationToken>,
}

impl OpContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Applies `timeout` only when no deadline was set by the caller.
    #[must_use]
    pub fn or_timeout(self, timeout: Option<Duration>) -> Self {
        match (self.deadline, timeout) {
            (None, Some(t)) => self.with_timeout(t),
            _ => self,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
            || self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    pub fn check(&self) -> Result<()> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(Error::StoreUnavailable("operation cancelled".to_string()));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::StoreUnavailable("deadline exceeded".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
    pub context: OpContext,
}

impl TxOptions {
    #[must_use]
    pub fn new(context: OpContext) -> Self {
        Self {
            isolation: IsolationLevel::ReadCommitted,
            context,
        }
    }

    #[must_use]
    pub fn serializable(mut self) -> Self {
        self.isolation = IsolationLevel::Serializable;
        self
    }
}
