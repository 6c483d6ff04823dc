use std::error::Error;

use crate::StatusCode;

/// Extension trait for the crate's errors (object-safe).
///
/// Provides:
/// - a protocol status code,
/// - a message that is safe to send to a remote client,
/// - a detailed message for logs.
pub trait ErrorExt: Error + Send + Sync + 'static {
    /// Protocol status. Defaults to [`StatusCode::Internal`].
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }

    /// Message for the client. Internal errors never leak their details.
    fn client_message(&self) -> String {
        match self.status_code() {
            StatusCode::Internal => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Detailed message, for logs only.
    fn log_message(&self) -> String {
        format!("{self:?}")
    }
}
