//! Error types for the vault.

use crate::types::{BranchId, CommitId, FileId, TagId};
use thiserror::Error;

/// Main error type for vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid directory coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Corrupt branch topology: {0}")]
    CorruptTopology(String),

    #[error("Tag {0} is not moveable")]
    NotMoveable(TagId),

    #[error("Tag {tag} cannot move from commit {current} to commit {requested}")]
    NonMonotonicMove {
        tag: TagId,
        current: CommitId,
        requested: CommitId,
    },

    #[error("File {file} on branch {branch} was already promoted")]
    ConcurrentPromotionConflict { file: FileId, branch: BranchId },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Name already in use: {0}")]
    DuplicateName(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Vault is locked by another process")]
    Locked,

    #[error("Vault not initialized")]
    NotInitialized,

    #[error("Invalid vault format: {0}")]
    InvalidFormat(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl VaultError {
    /// Errors a caller may treat as a successful no-op.
    ///
    /// A promotion that lost the race to another promotion of the same file
    /// leaves the store exactly as the winner left it.
    pub fn is_benign(&self) -> bool {
        matches!(self, VaultError::ConcurrentPromotionConflict { .. })
    }

    pub(crate) fn not_found(what: impl std::fmt::Display) -> Self {
        VaultError::NotFound(what.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for VaultError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        VaultError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for VaultError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        VaultError::Deserialization(e.to_string())
    }
}

/// Result type for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
