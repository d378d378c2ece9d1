//! Error types and handling
//!
//! This module provides domain-specific error types for the feature
//! composition engine. Each pipeline step owns an error enum (fetch,
//! extract, payload, merge, build) which is then wrapped in the main
//! `EngineError` enum for unified error handling.
//!
//! Identifier parse rejection is deliberately *not* represented here:
//! an unrecognized identifier is a typed `None` from the resolver, logged
//! and skipped by the assembler rather than aborting the build.

use thiserror::Error;

/// Network fetch errors
#[derive(Error, Debug)]
pub enum FetchError {
    /// Transport-level failure (DNS, connect, TLS, interrupted body)
    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// The caller-configured fetch deadline expired
    #[error("Fetch of {url} timed out after {seconds}s")]
    Timeout { url: String, seconds: u64 },

    /// The server answered with a non-success status
    #[error("Unexpected HTTP status {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    /// Authentication was required or rejected
    #[error("Authentication failed fetching {url}: {message}")]
    Auth { url: String, message: String },
}

/// Archive extraction errors
#[derive(Error, Debug)]
pub enum ExtractError {
    /// The downloaded bytes are not a well-formed gzip stream
    #[error("Malformed gzip stream: {message}")]
    Gzip { message: String },

    /// The decompressed stream is not a well-formed tar archive
    #[error("Malformed tar archive: {message}")]
    Tar { message: String },
}

/// Payload shape errors
///
/// Raised after a source has been materialized on disk but the resulting
/// tree does not contain what the assembler needs.
#[derive(Error, Debug)]
pub enum PayloadError {
    /// The payload lacks the expected `features/<id>/` subtree
    #[error("Payload at {path} lacks the expected features/{feature_id}/ subtree")]
    MissingFeature { path: String, feature_id: String },

    /// No bundled feature tree is configured for a `local-cache` source
    #[error("No bundled feature tree is available for local-cache features")]
    NoBundledFeatures,

    /// The payload's metadata document could not be parsed
    #[error("Failed to parse feature metadata at {path}: {message}")]
    Metadata { path: String, message: String },
}

/// Configuration document errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file parsing error
    #[error("Failed to parse configuration file: {message}")]
    Parsing { message: String },

    /// Configuration validation error
    #[error("Configuration validation error: {message}")]
    Validation { message: String },
}

/// Merge policy violation: `Merge` behavior applied to non-sequence values
#[derive(Error, Debug)]
#[error("Cannot merge key '{key}': merge requires ordered sequences on both sides")]
pub struct MergeTypeError {
    pub key: String,
}

/// Container builder invocation errors
#[derive(Error, Debug)]
pub enum BuildError {
    /// The builder binary could not be spawned
    #[error("Failed to invoke container builder: {message}")]
    Spawn { message: String },

    /// The builder exited non-zero; carries its captured stderr
    #[error("Container build failed with exit code {code}:\n{stderr}")]
    Failed { code: i32, stderr: String },
}

/// Unified error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Network fetch error
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Archive extraction error
    #[error("Extract error: {0}")]
    Extract(#[from] ExtractError),

    /// Payload shape error
    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    /// Configuration document error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Merge policy violation
    #[error("Merge error: {0}")]
    Merge(#[from] MergeTypeError),

    /// Container builder error
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Host I/O error, surfaced from the host abstraction untouched
    #[error("Host I/O error")]
    HostIo(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    /// The caller's cancellation signal fired
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_messages_name_the_url() {
        let err = FetchError::Timeout {
            url: "https://example.com/f.tgz".to_string(),
            seconds: 60,
        };
        assert!(err.to_string().contains("https://example.com/f.tgz"));
        assert!(err.to_string().contains("60"));
    }

    #[test]
    fn build_error_carries_stderr() {
        let err = BuildError::Failed {
            code: 17,
            stderr: "no space left on device".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("17"));
        assert!(msg.contains("no space left on device"));
    }

    #[test]
    fn io_errors_wrap_into_engine_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let engine: EngineError = io.into();
        assert!(matches!(engine, EngineError::HostIo(_)));
    }
}
