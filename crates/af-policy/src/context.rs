//! Cancellable execution context passed through policy chains.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::PolicyError;

/// Carries a cancellation token and an optional deadline.
///
/// Children derived with [`Context::with_timeout`] are cancelled when the
/// parent is, and never outlive the parent's deadline.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derive a child bounded by `timeout` from now (or the parent deadline, if sooner).
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < candidate => parent,
            _ => candidate,
        };

        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The error this context currently reports, if it is done.
    pub fn err(&self) -> Option<PolicyError> {
        if self.token.is_cancelled() {
            return Some(PolicyError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(PolicyError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> PolicyError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => PolicyError::Canceled,
                    _ = tokio::time::sleep_until(deadline) => PolicyError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                PolicyError::Canceled
            }
        }
    }
}
