//! Error types for rangemeld.
//!
//! Library crates use [`MeldError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all rangemeld operations.
///
/// Every variant is fatal for the source that raised it: there is no
/// row-skipping mode.
#[derive(Debug, thiserror::Error)]
pub enum MeldError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The declared type tag is not part of the type system.
    #[error("unsupported type {type_tag:?}")]
    UnsupportedType { type_tag: String },

    /// The raw text cannot be parsed as the declared type.
    #[error("invalid {type_tag} value {value:?}: {reason}")]
    InvalidValue {
        type_tag: String,
        value: String,
        reason: String,
    },

    /// One token of an `array:<subtype>` value failed to coerce.
    #[error("array entry #{index} is invalid: {source}")]
    InvalidArrayElement {
        index: usize,
        source: Box<MeldError>,
    },

    /// Structural problem with an input row (range columns, block syntax).
    #[error("malformed row {row}: {message}")]
    MalformedRow { row: usize, message: String },

    /// A dotted path collides with an existing scalar or sub-document.
    #[error("conflicting shape at {path:?}")]
    ConflictingShape { path: String },

    /// A written artifact does not match its manifest.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Filesystem I/O error while reading an input or writing output.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A field of one record failed to coerce or assemble.
    #[error(
        "source {source_name} row {row}: failed to transform {field} with value {value:?} (of type {type_tag}): {source}"
    )]
    Record {
        source_name: String,
        row: usize,
        field: String,
        value: String,
        type_tag: String,
        source: Box<MeldError>,
    },

    /// A source stream terminated with an error.
    #[error("source {source_name}: {source}")]
    InSource {
        source_name: String,
        source: Box<MeldError>,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, MeldError>;

impl MeldError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an invalid-value error for the given type tag and raw text.
    pub fn invalid_value(
        type_tag: impl Into<String>,
        value: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::InvalidValue {
            type_tag: type_tag.into(),
            value: value.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a malformed-row error for a 1-based row/line number.
    pub fn malformed_row(row: usize, msg: impl Into<String>) -> Self {
        Self::MalformedRow {
            row,
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

    /// Attribute this error to a named source.
    pub fn in_source(self, source_name: impl Into<String>) -> Self {
        Self::InSource {
            source_name: source_name.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping context wrappers.
    pub fn root_cause(&self) -> &MeldError {
        match self {
            Self::Record { source, .. } | Self::InSource { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
