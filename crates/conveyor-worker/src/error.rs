//! Worker error types.
//!
//! Errors carry a kind for categorization, a message and an optional
//! boxed source for error chaining.

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;

use conveyor_runtime::{ProcessingError, WorkflowError};

/// Boxed error source that can cross task boundaries.
pub type BoxedError = Box<dyn StdError + Send + Sync>;

/// Result type for worker operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Category of a worker error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid configuration or workflow definitions.
    Config,
    /// Broker or HTTP endpoint failure.
    External,
    /// Engine or task failure.
    Internal,
}

impl ErrorKind {
    /// Returns the error kind as a string for categorization.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::External => "external_service",
            Self::Internal => "internal_service",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker error with structured information.
#[derive(Debug, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: Cow<'static, str>,
    #[source]
    source: Option<BoxedError>,
}

impl Error {
    #[inline]
    fn new(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attaches a source error.
    #[inline]
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error kind.
    #[must_use]
    #[inline]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message.
    #[must_use]
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Creates a new configuration error.
    #[inline]
    pub fn config(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// Creates a new external service error.
    #[inline]
    pub fn external(
        service: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        let full_message = format!("{}: {}", service.into(), message.into());
        Self::new(ErrorKind::External, full_message)
    }

    /// Creates a new internal error.
    #[inline]
    pub fn internal(
        service: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        let full_message = format!("{}: {}", service.into(), message.into());
        Self::new(ErrorKind::Internal, full_message)
    }
}

impl From<conveyor_nats::Error> for Error {
    fn from(err: conveyor_nats::Error) -> Self {
        Error::external("nats", err.to_string()).with_source(err)
    }
}

impl From<WorkflowError> for Error {
    fn from(err: WorkflowError) -> Self {
        Error::config(err.to_string()).with_source(err)
    }
}

impl From<ProcessingError> for Error {
    fn from(err: ProcessingError) -> Self {
        Error::internal("coordinator", err.to_string()).with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = Error::config("max concurrent steps must be positive");
        assert_eq!(error.kind(), ErrorKind::Config);
        assert_eq!(error.message(), "max concurrent steps must be positive");
    }

    #[test]
    fn test_nats_error_keeps_source() {
        let error = Error::from(conveyor_nats::Error::ack("connection closed"));
        assert_eq!(error.kind(), ErrorKind::External);
        assert!(error.to_string().contains("nats"));
        assert!(StdError::source(&error).is_some());
    }

    #[test]
    fn test_workflow_error_is_config() {
        let error = Error::from(WorkflowError::MissingTrigger);
        assert_eq!(error.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_error_kind_as_str() {
        assert_eq!(ErrorKind::Config.as_str(), "config");
        assert_eq!(ErrorKind::External.as_str(), "external_service");
        assert_eq!(ErrorKind::Internal.as_str(), "internal_service");
    }
}
