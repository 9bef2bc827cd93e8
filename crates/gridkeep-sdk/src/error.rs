//! Error types for the gridkeep SDK.

use crate::network::NetworkError;
use gridkeep_sheet::SheetError;
use thiserror::Error;

/// Error type for SDK operations.
///
/// Connectivity problems are not errors at this level; a session reports
/// them through its status signal instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SdkError {
    /// A grid operation was rejected.
    #[error("Sheet error: {0}")]
    Sheet(#[from] SheetError),

    /// The transport failed in a way that is not a plain outage.
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;
