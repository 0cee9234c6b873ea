//! Error types for the finops crate.

use thiserror::Error;

/// Errors raised while executing a control-plane call.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The provider tooling could not be started.
    #[error("Failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The call ran but exited unsuccessfully.
    #[error("{operation} failed (exit {status}): {stderr}")]
    CommandFailed {
        operation: String,
        status: i32,
        stderr: String,
    },

    /// The requested resource or configuration does not exist.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The caller lacks permission for the call.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The call did not finish in time.
    #[error("{operation} timed out after {seconds} seconds")]
    Timeout { operation: String, seconds: u64 },

    /// Fixture or response I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Response was not valid JSON.
    #[error("Invalid JSON response: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ClientError {
    /// Whether the error means "this optional thing is absent" rather than a failure.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Errors raised by a service scanner.
#[derive(Error, Debug)]
pub enum ScanError {
    /// The underlying list/describe call failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A raw record could not be mapped to its typed form.
    #[error("Failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A typed record or summary could not be serialized for the report.
    #[error("Failed to encode report data: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ScanError {
    /// Build a decode error for the given record kind.
    #[must_use]
    pub fn decode(what: &'static str, source: serde_json::Error) -> Self {
        Self::Decode { what, source }
    }
}

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range or unknown.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
