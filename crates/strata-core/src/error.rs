//! Error types for Strata

use thiserror::Error;

use crate::ContributorHandle;

/// Rejected queue mutations and invalid configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    // Registration errors
    #[error("Contributor already registered")]
    Duplicate,

    #[error("Contributor was dropped before registration")]
    ContributorDropped,

    // Removal errors
    #[error("Contributor not registered")]
    NotRegistered,

    #[error("Unknown contributor handle: {0}")]
    UnknownHandle(ContributorHandle),

    // Configuration errors
    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for Strata operations
pub type QueueResult<T> = Result<T, QueueError>;
