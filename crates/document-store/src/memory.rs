use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::CompanyCode;
use tokio::sync::RwLock;

use crate::{
    Document, DocumentStoreError, Filter, FindOptions, NewDocument, Result, Version,
    store::{DocumentStore, WriteOptions},
};

type Key = (CompanyCode, String);

/// In-memory document store.
///
/// Used by the test suites and by the server when no database is
/// configured. Every operation holds the collection lock for its whole
/// duration, so updates are atomic compare-and-swap.
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    collections: Arc<RwLock<HashMap<String, HashMap<Key, Document>>>>,
}

impl InMemoryDocumentStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of documents in a collection.
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, HashMap::len)
    }

    /// Clears every collection.
    pub async fn clear(&self) {
        self.collections.write().await.clear();
    }
}

fn matching<'a>(
    documents: impl Iterator<Item = &'a Document>,
    filter: &Filter,
) -> Vec<Document> {
    documents.filter(|d| filter.matches(d)).cloned().collect()
}

fn first_key(documents: &HashMap<Key, Document>, filter: &Filter) -> Option<Key> {
    documents
        .values()
        .filter(|d| filter.matches(d))
        .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
        .map(|d| (d.company_code.clone(), d.id.clone()))
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>> {
        let store = self.collections.read().await;
        let documents = store
            .get(collection)
            .map(|docs| matching(docs.values(), filter))
            .unwrap_or_default();
        Ok(options.apply(documents))
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>> {
        let store = self.collections.read().await;
        Ok(store.get(collection).and_then(|docs| {
            first_key(docs, filter).and_then(|key| docs.get(&key).cloned())
        }))
    }

    async fn insert_one(&self, collection: &str, document: NewDocument) -> Result<Document> {
        let mut store = self.collections.write().await;
        let docs = store.entry(collection.to_string()).or_default();

        let key = (document.company_code.clone(), document.id.clone());
        if docs.contains_key(&key) {
            return Err(DocumentStoreError::DuplicateKey {
                collection: collection.to_string(),
                id: document.id,
            });
        }

        let document = document.into_document(Utc::now());
        docs.insert(key, document.clone());
        Ok(document)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        body: serde_json::Value,
        options: WriteOptions,
    ) -> Result<Version> {
        let mut store = self.collections.write().await;
        let not_found = || DocumentStoreError::NotFound {
            collection: collection.to_string(),
            filter: filter.to_string(),
        };

        let docs = store.get_mut(collection).ok_or_else(not_found)?;
        let key = first_key(docs, filter).ok_or_else(not_found)?;
        let document = docs.get_mut(&key).ok_or_else(not_found)?;

        if let Some(expected) = options.expected_version
            && document.version != expected
        {
            metrics::counter!("document_store_conflicts_total").increment(1);
            return Err(DocumentStoreError::ConcurrencyConflict {
                collection: collection.to_string(),
                id: document.id.clone(),
                expected,
                actual: document.version,
            });
        }

        document.body = body;
        document.version = document.version.next();
        document.updated_at = Utc::now();
        Ok(document.version)
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: &Filter,
        options: WriteOptions,
    ) -> Result<bool> {
        let mut store = self.collections.write().await;
        let Some(docs) = store.get_mut(collection) else {
            return Ok(false);
        };
        let Some(key) = first_key(docs, filter) else {
            return Ok(false);
        };

        if let Some(expected) = options.expected_version
            && let Some(document) = docs.get(&key)
            && document.version != expected
        {
            metrics::counter!("document_store_conflicts_total").increment(1);
            return Err(DocumentStoreError::ConcurrencyConflict {
                collection: collection.to_string(),
                id: document.id.clone(),
                expected,
                actual: document.version,
            });
        }

        Ok(docs.remove(&key).is_some())
    }
}
