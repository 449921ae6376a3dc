//! Domain error types.

use document_store::DocumentStoreError;
use thiserror::Error;

use crate::open_tab::OpenTabError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the document store.
    #[error("Document store error: {0}")]
    Store(#[from] DocumentStoreError),

    /// An open-tab rule was violated.
    #[error("{0}")]
    OpenTab(OpenTabError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Returns true if the error is a lost optimistic-concurrency race.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            DomainError::Store(DocumentStoreError::ConcurrencyConflict { .. })
        )
    }
}

impl From<OpenTabError> for DomainError {
    fn from(e: OpenTabError) -> Self {
        DomainError::OpenTab(e)
    }
}
