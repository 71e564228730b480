//! Unified error handling for the ride-tcx library.
//!
//! Every fallible operation (stream decoding, conversion, document output,
//! and the optional HTTP collaborator) reports through [`ExportError`].

use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for ride-tcx operations.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Output path is occupied and overwrite was not requested
    #[error("File '{}' already exists", .path.display())]
    AlreadyExists { path: PathBuf },

    /// A channel required for conversion is absent from the stream
    #[error("Stream is missing required channel '{channel}'")]
    MissingChannel { channel: String },

    /// Channel lengths disagree with the sample count
    #[error("Channel '{channel}' has {actual} samples, expected {expected}")]
    MalformedStream {
        channel: String,
        expected: usize,
        actual: usize,
    },

    /// A value could not be coerced to the expected type
    #[error("Type mismatch in '{field}': {message}")]
    TypeMismatch { field: String, message: String },

    /// XML could not be parsed back into a document tree
    #[error("XML error: {message}")]
    Xml { message: String },

    /// Filesystem error while writing output
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP/API error from the telemetry source
    #[error("HTTP error{}: {message}", .status_code.map(|c| format!(" ({})", c)).unwrap_or_default())]
    Http {
        message: String,
        status_code: Option<u16>,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl ExportError {
    pub(crate) fn type_mismatch(field: &str, message: impl Into<String>) -> Self {
        ExportError::TypeMismatch {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn xml(message: impl std::fmt::Display) -> Self {
        ExportError::Xml {
            message: message.to_string(),
        }
    }
}

/// Result type alias for ride-tcx operations.
pub type Result<T> = std::result::Result<T, ExportError>;

/// Extension trait for converting Option to ExportError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a missing channel error.
    fn ok_or_missing_channel(self, channel: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_missing_channel(self, channel: &str) -> Result<T> {
        self.ok_or_else(|| ExportError::MissingChannel {
            channel: channel.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ExportError::MalformedStream {
            channel: "altitude".to_string(),
            expected: 3,
            actual: 2,
        };
        assert!(err.to_string().contains("altitude"));
        assert!(err.to_string().contains("2 samples"));
    }

    #[test]
    fn test_http_error_display() {
        let with_code = ExportError::Http {
            message: "not found".to_string(),
            status_code: Some(404),
        };
        assert_eq!(with_code.to_string(), "HTTP error (404): not found");

        let without_code = ExportError::Http {
            message: "connection reset".to_string(),
            status_code: None,
        };
        assert_eq!(without_code.to_string(), "HTTP error: connection reset");
    }

    #[test]
    fn test_option_ext() {
        let none: Option<i32> = None;
        let result = none.ok_or_missing_channel("latlng");
        assert!(matches!(
            result,
            Err(ExportError::MissingChannel { ref channel }) if channel == "latlng"
        ));
    }
}
