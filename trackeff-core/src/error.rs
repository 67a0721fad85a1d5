//! Error types for trackeff-core.

use crate::event::EventKey;
use thiserror::Error;

/// Result type alias for trackeff operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for trackeff operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A field referenced by a selection or the track schema is absent from a record.
    #[error("missing field: {field}")]
    MissingField { field: String },

    /// A field used as an integer key holds a value that cannot be one.
    #[error("field {field} holds {value}, which is not a valid integer key")]
    FieldType { field: String, value: f64 },

    /// The candidate stream is not non-decreasing in (experiment, run).
    #[error(
        "candidate stream out of order at record {position}: \
         (exp {}, run {}) follows (exp {}, run {})",
        found.experiment, found.run, previous.experiment, previous.run
    )]
    OrderingViolation {
        position: u64,
        previous: EventKey,
        found: EventKey,
    },

    /// Malformed selection expression.
    #[error("expression error: {0}")]
    Expression(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    /// Convenience constructor for [`Error::MissingField`].
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }
}
