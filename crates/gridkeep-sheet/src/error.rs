//! Error types for the policy layer.

use crate::ids::Axis;
use thiserror::Error;

/// Errors that can occur in grid operations.
///
/// None of these are fatal: a rejected operation leaves the document
/// untouched and still mergeable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SheetError {
    #[error("Invalid {axis} index: {index} (length: {length})")]
    IndexOutOfBounds {
        axis: Axis,
        index: usize,
        length: usize,
    },

    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for SheetError {
    fn from(err: serde_json::Error) -> Self {
        SheetError::SerializationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SheetError>;

/// Reject `index` unless it addresses an existing slot (`index < length`).
pub(crate) fn check_slot(axis: Axis, index: usize, length: usize) -> Result<()> {
    if index < length {
        Ok(())
    } else {
        tracing::warn!(%axis, index, length, "rejected out-of-range index");
        Err(SheetError::IndexOutOfBounds {
            axis,
            index,
            length,
        })
    }
}

/// Reject `index` unless it is a valid insertion point (`index <= length`).
pub(crate) fn check_gap(axis: Axis, index: usize, length: usize) -> Result<()> {
    if index <= length {
        Ok(())
    } else {
        tracing::warn!(%axis, index, length, "rejected out-of-range insertion point");
        Err(SheetError::IndexOutOfBounds {
            axis,
            index,
            length,
        })
    }
}
