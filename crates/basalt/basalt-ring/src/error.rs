//! Error types for ring construction and teardown.
//!
//! Only the cold paths return errors. Hot-path conditions are signalled
//! through return values: a full blocking ring yields `None` from
//! `next_to_dispatch`, a lapped non-blocking consumer sees `-1` from
//! `available_to_fetch`, and a checksum mismatch yields `None` from
//! `fetch` with the consumer's counters untouched.

use std::io;

/// Errors surfaced when creating, attaching to, or closing a ring.
#[derive(Debug, thiserror::Error)]
pub enum RingError {
    /// The backing file could not be created, extended, read, or mapped.
    #[error("cannot acquire shared memory region")]
    ResourceAcquisition {
        #[from]
        source: io::Error,
    },

    /// A supplied parameter disagrees with what the file persists or implies.
    #[error("{field} does not match the ring file: provided={provided} expected={expected}")]
    ConfigurationMismatch {
        field: &'static str,
        provided: i64,
        expected: i64,
    },

    /// A parameter was requested to be inferred from a file that does not exist.
    #[error("cannot infer ring parameters, file not found: {path}")]
    FileNotFound { path: String },

    /// A parameter is outside its legal range.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },
}

impl RingError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        RingError::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch(field: &'static str, provided: i64, expected: i64) -> Self {
        RingError::ConfigurationMismatch {
            field,
            provided,
            expected,
        }
    }
}

pub type RingResult<T> = Result<T, RingError>;
