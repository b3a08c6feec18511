//! Error types for itinera.
//!
//! Library crates use [`ItineraError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Only [`ItineraError::MalformedFrame`] is recoverable inside the stream
//! pipeline; every other variant ends the ingestion and is surfaced to the
//! caller, whose policy decides whether to substitute the fallback generator.

use std::path::PathBuf;

/// Top-level error type for all itinera operations.
#[derive(Debug, thiserror::Error)]
pub enum ItineraError {
    /// Missing credentials, endpoint, or an unreadable config file.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network failure, non-2xx status, or a response that is not an event stream.
    #[error("transport error: {0}")]
    Transport(String),

    /// Explicit error reported by the upstream service inside the stream.
    #[error("upstream error{}: {message}", code.as_deref().map(|c| format!(" {c}")).unwrap_or_default())]
    Protocol {
        code: Option<String>,
        message: String,
    },

    /// A single event frame whose data could not be decoded.
    #[error("malformed frame: {message}")]
    MalformedFrame { message: String },

    /// The stream ended with nothing extractable, even after raw recovery.
    #[error("empty response: the upstream stream produced no usable content")]
    EmptyResponse,

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Invalid caller input (request parameters, CLI values).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ItineraError>;

impl ItineraError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a transport error from any displayable message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a protocol error carrying the upstream code (if any) and message.
    pub fn protocol(code: Option<String>, msg: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: msg.into(),
        }
    }

    /// Create a malformed-frame error from any displayable message.
    pub fn malformed_frame(msg: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the stream pipeline may skip this error and keep reading.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MalformedFrame { .. })
    }
}
