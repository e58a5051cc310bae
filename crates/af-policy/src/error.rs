//! Policy Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolicyError {
    /// The caller's context was cancelled.
    #[error("context canceled")]
    Canceled,

    /// A deadline on the context (or one derived by a timeout policy) elapsed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The wrapped operation failed.
    #[error(transparent)]
    Operation(#[from] anyhow::Error),
}

impl PolicyError {
    /// Wrap a plain message as an operation failure.
    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        PolicyError::Operation(anyhow::Error::msg(message))
    }

    /// True for cancellation and deadline errors.
    pub fn is_context_error(&self) -> bool {
        matches!(self, PolicyError::Canceled | PolicyError::DeadlineExceeded)
    }
}

pub type Result<T> = std::result::Result<T, PolicyError>;
