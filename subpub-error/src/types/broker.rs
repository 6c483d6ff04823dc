use std::time::Duration;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Errors returned by the broker facade.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The broker has been closed. Returned by `subscribe` and `publish` only.
    #[error("broker is closed")]
    Closed,

    /// `close` gave up waiting for delivery workers. The workers keep running
    /// in the background, so this does not by itself mean messages were lost.
    #[error("shutdown timed out after {timeout:?} with {pending} delivery worker(s) still running")]
    ShutdownTimeout { timeout: Duration, pending: usize },

    #[error("subject must not be empty")]
    EmptySubject,
}

impl BrokerError {
    /// `true` for the closed-broker error.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl ErrorExt for BrokerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Closed => StatusCode::Unavailable,
            Self::ShutdownTimeout { .. } => StatusCode::Timeout,
            Self::EmptySubject => StatusCode::InvalidArgs,
        }
    }
}
