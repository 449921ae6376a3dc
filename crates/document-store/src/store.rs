use async_trait::async_trait;
use common::CompanyCode;

use crate::{Document, Filter, FindOptions, NewDocument, Result, Version};

/// Options for updating or deleting a document.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Expected version of the document for optimistic concurrency control.
    /// If None, the version read by the store itself is used as the guard.
    pub expected_version: Option<Version>,
}

impl WriteOptions {
    /// Creates options with no caller-side version check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options expecting the document to be at a specific version.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }
}

/// Core trait for document store implementations.
///
/// Documents live in named collections and are keyed by
/// `(company_code, id)`. All implementations must be thread-safe.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns every document of a collection matching the filter.
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>>;

    /// Returns the first matching document in insertion order.
    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>>;

    /// Inserts a new document at version 1.
    ///
    /// Fails with `DuplicateKey` if the company already has a document with
    /// the same id in the collection. Callers use this for idempotent writes.
    async fn insert_one(&self, collection: &str, document: NewDocument) -> Result<Document>;

    /// Replaces the body of the first matching document.
    ///
    /// Fails with `NotFound` if nothing matches and with
    /// `ConcurrencyConflict` if the document is not at the expected version.
    /// Returns the new version.
    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        body: serde_json::Value,
        options: WriteOptions,
    ) -> Result<Version>;

    /// Deletes the first matching document. Returns false if nothing matched.
    ///
    /// Fails with `ConcurrencyConflict` if the document is not at the
    /// expected version.
    async fn delete_one(
        &self,
        collection: &str,
        filter: &Filter,
        options: WriteOptions,
    ) -> Result<bool>;
}

/// Extension trait providing convenience methods for document stores.
#[async_trait]
pub trait DocumentStoreExt: DocumentStore {
    /// Loads one document of a company by id.
    async fn find_by_id(
        &self,
        collection: &str,
        company_code: &CompanyCode,
        id: &str,
    ) -> Result<Option<Document>> {
        self.find_one(collection, &Filter::by_id(company_code.clone(), id))
            .await
    }

    /// Checks whether a document exists.
    async fn exists(&self, collection: &str, company_code: &CompanyCode, id: &str) -> Result<bool> {
        Ok(self
            .find_by_id(collection, company_code, id)
            .await?
            .is_some())
    }
}

// Blanket implementation for all DocumentStore implementations
impl<T: DocumentStore + ?Sized> DocumentStoreExt for T {}
