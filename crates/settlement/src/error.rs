//! Settlement error types.

use document_store::DocumentStoreError;
use domain::{DomainError, OpenTabError};
use thiserror::Error;

/// Errors that can occur while settling or closing a tab.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// Domain error, including open-tab rule violations.
    #[error("{0}")]
    Domain(#[from] DomainError),

    /// Document store error.
    #[error("Document store error: {0}")]
    Store(#[from] DocumentStoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A movement number could not be allocated.
    #[error("Movement number error: {0}")]
    MovementNumber(String),

    /// A stock update could not be applied.
    #[error("Stock error: {0}")]
    Stock(String),
}

impl SettlementError {
    /// Returns true if the error is a lost optimistic-concurrency race.
    pub fn is_conflict(&self) -> bool {
        match self {
            SettlementError::Domain(e) => e.is_conflict(),
            SettlementError::Store(e) => {
                matches!(e, DocumentStoreError::ConcurrencyConflict { .. })
            }
            _ => false,
        }
    }
}

impl From<OpenTabError> for SettlementError {
    fn from(e: OpenTabError) -> Self {
        SettlementError::Domain(DomainError::OpenTab(e))
    }
}

/// Convenience type alias for settlement results.
pub type Result<T> = std::result::Result<T, SettlementError>;
