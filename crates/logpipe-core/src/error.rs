//! Error types for logpipe
//!
//! Only [`ConfigError`] ever reaches a caller: it is returned synchronously
//! while a pipeline is being built. Sink and enricher errors are caught inside
//! the pipeline, counted, and published on the diagnostic channel.

use std::path::PathBuf;

use thiserror::Error;

/// Invalid pipeline configuration, detected at construction time
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Level name not recognized
    #[error("Unknown level name: {0}")]
    UnknownLevel(String),

    /// A queue was configured with zero capacity
    #[error("Queue capacity must be greater than zero ({0})")]
    ZeroCapacity(&'static str),

    /// A periodic rolling file has no date token in its path template
    #[error("Path template {0:?} must contain the {{Date}} token for periodic rolling")]
    MissingDateToken(String),

    /// Path template does not name a file
    #[error("Path template {0:?} does not name a file")]
    InvalidPathTemplate(String),

    /// Size limit of zero bytes
    #[error("File size limit must be greater than zero")]
    ZeroSizeLimit,

    /// Output location cannot be created or opened for append
    #[error("Path {path:?} is not writable: {source}")]
    NotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Two sinks registered under the same name
    #[error("Duplicate sink name: {0}")]
    DuplicateSink(String),

    /// Background thread could not be started
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure inside a sink's write path
#[derive(Error, Debug)]
pub enum SinkError {
    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Event could not be rendered
    #[error("Format error: {0}")]
    Format(String),

    /// Current file is full and rolling on size is disabled
    #[error("File size limit of {limit} bytes reached for {path:?}")]
    FileSizeLimitReached { path: PathBuf, limit: u64 },

    /// Failure produced by a test or custom sink
    #[error("Sink failure: {0}")]
    Other(String),
}

/// Failure inside a single enricher
#[derive(Error, Debug, Clone)]
pub enum EnrichError {
    /// Enricher reported a failure
    #[error("{0}")]
    Failed(String),

    /// Enricher panicked
    #[error("enricher panicked: {0}")]
    Panicked(String),
}

/// A text log line that could not be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Line is missing the `<timestamp> [LVL] ` header
    #[error("Line has no header: {0:?}")]
    MissingHeader(String),

    /// Timestamp is not RFC 3339
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Level code is not one of the known codes
    #[error("Invalid level code: {0}")]
    InvalidLevel(String),
}

/// Result type alias using ConfigError
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::UnknownLevel("loud".to_string());
        assert_eq!(format!("{}", err), "Unknown level name: loud");

        let err = ConfigError::MissingDateToken("logs/app.log".to_string());
        assert!(err.to_string().contains("{Date}"));
    }

    #[test]
    fn test_sink_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let sink_err: SinkError = io_err.into();
        assert!(matches!(sink_err, SinkError::Io(_)));
    }
}
