//! Error taxonomy for dispatch, commit and async responses.
//!
//! Synchronous errors propagate to whoever called [`crate::dispatcher::Dispatcher::handle`].
//! Errors raised on the async path after the handling thread has returned are
//! logged and force completion of the exchange instead.

use std::io;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DispatchError>;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The application could not be resolved to a callable handler.
    #[error("No valid JSGI app: {0}")]
    InvalidApplication(String),

    /// The registry has no module under the requested id.
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    /// The handler returned nothing, or a descriptor missing status, headers or body.
    #[error("No valid JSGI response: {0}")]
    InvalidResponse(String),

    /// The response body cannot be iterated into chunks.
    #[error("Response body is not iterable: {0}")]
    BodyNotIterable(String),

    /// The request carries no transport environment.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// `start` was called on an async response that already sent its headers.
    #[error("Async response already started")]
    AlreadyStarted,

    /// The async response was closed, timed out or failed.
    #[error("Async response is closed")]
    ResponseClosed,

    #[error(transparent)]
    Io(#[from] io::Error),

    /// Error raised by the application handler itself.
    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

impl DispatchError {
    /// True for errors that describe a broken application or response shape
    /// rather than a runtime failure of the transport.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DispatchError::InvalidApplication(_) | DispatchError::ModuleNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_offending_value() {
        let err = DispatchError::InvalidApplication("app.main".to_string());
        assert_eq!(err.to_string(), "No valid JSGI app: app.main");
        let err = DispatchError::BodyNotIterable("42".to_string());
        assert_eq!(err.to_string(), "Response body is not iterable: 42");
    }

    #[test]
    fn test_handler_errors_are_transparent() {
        let err: DispatchError = anyhow::anyhow!("boom").into();
        assert_eq!(err.to_string(), "boom");
        assert!(!err.is_configuration());
        assert!(DispatchError::ModuleNotFound("x".into()).is_configuration());
    }
}
