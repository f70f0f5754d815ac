//! Error types for keystage.

use crate::primitive::PrimitiveKind;
use thiserror::Error;

/// The main error type for keystage operations.
#[derive(Debug, Error)]
pub enum StageError {
    /// A required argument was empty.
    #[error("Missing required argument: {0}")]
    MissingArgument(&'static str),

    /// Column ordinal other than zero.
    #[error("Ordinal {0} out of range: this cursor has exactly one column")]
    OrdinalOutOfRange(usize),

    /// Column name does not match the cursor's column.
    #[error("Unknown column: '{0}'")]
    UnknownColumn(String),

    /// Typed read for a type the cursor is not committed to.
    #[error("Cannot read {requested} from this cursor: it only reads {actual}")]
    TypeNotSupported {
        requested: PrimitiveKind,
        actual: PrimitiveKind,
    },

    /// Accessor not available on a single-column primitive cursor.
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    /// Value read before the first advance or after the last row.
    #[error("No current row: advance the cursor before reading")]
    NoCurrentRow,

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Bulk-load transport error.
    #[error("Bulk load error: {0}")]
    BulkLoad(String),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StageError {
    /// Create a wrong-type error for a typed read.
    pub fn type_not_supported(requested: PrimitiveKind, actual: PrimitiveKind) -> Self {
        Self::TypeNotSupported { requested, actual }
    }

    /// True for errors raised by the cursor protocol itself rather than by
    /// the database or transport.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::OrdinalOutOfRange(_)
                | Self::UnknownColumn(_)
                | Self::TypeNotSupported { .. }
                | Self::NotImplemented(_)
                | Self::NoCurrentRow
        )
    }
}

/// Result type alias for keystage operations.
pub type StageResult<T> = Result<T, StageError>;
