//! Aggregate persistence and command execution.

use std::marker::PhantomData;

use common::CompanyCode;
use document_store::{
    DocumentStore, DocumentStoreExt, Filter, FindOptions, NewDocument, Version, WriteOptions,
};

use crate::aggregate::Aggregate;
use crate::error::DomainError;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after the command was applied.
    pub aggregate: A,

    /// The version the aggregate was persisted at.
    pub new_version: Version,
}

/// Repository for document-backed aggregates.
///
/// Every mutation follows the same pipeline:
/// 1. Load the aggregate scoped to the acting company
/// 2. Run the command, which validates and then mutates in memory
/// 3. Persist with a compare-and-swap on the loaded version
///
/// A command error leaves the stored document untouched; a lost race
/// surfaces as `DocumentStoreError::ConcurrencyConflict`.
pub struct Repository<S, A>
where
    S: DocumentStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> Clone for Repository<S, A>
where
    S: DocumentStore + Clone,
    A: Aggregate,
{
    fn clone(&self) -> Self {
        Self::new(self.store.clone())
    }
}

impl<S, A> Repository<S, A>
where
    S: DocumentStore,
    A: Aggregate,
{
    /// Creates a new repository over the given document store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    /// Returns a reference to the underlying document store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate owned by a company, returning None if it doesn't
    /// exist or belongs to another company.
    pub async fn load(
        &self,
        company_code: &CompanyCode,
        id: &str,
    ) -> Result<Option<A>, DomainError> {
        let Some(document) = self
            .store
            .find_by_id(A::collection(), company_code, id)
            .await?
        else {
            return Ok(None);
        };

        let mut aggregate: A = document.decode()?;
        aggregate.set_version(document.version);
        Ok(Some(aggregate))
    }

    /// Loads an aggregate, failing with the aggregate's not-found error.
    pub async fn get(&self, company_code: &CompanyCode, id: &str) -> Result<A, DomainError>
    where
        DomainError: From<A::Error>,
    {
        self.load(company_code, id)
            .await?
            .ok_or_else(|| A::not_found(id).into())
    }

    /// Loads every aggregate matching a filter.
    pub async fn find(
        &self,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<A>, DomainError> {
        let documents = self.store.find(A::collection(), filter, options).await?;
        documents
            .into_iter()
            .map(|document| -> Result<A, DomainError> {
                let mut aggregate: A = document.decode()?;
                aggregate.set_version(document.version);
                Ok(aggregate)
            })
            .collect()
    }

    /// Stores a newly created aggregate.
    pub async fn insert(&self, mut aggregate: A) -> Result<CommandResult<A>, DomainError> {
        let document = NewDocument::from_value(
            aggregate.id(),
            aggregate.company_code().clone(),
            &aggregate,
        )?;
        let stored = self.store.insert_one(A::collection(), document).await?;
        aggregate.set_version(stored.version);

        tracing::debug!(
            aggregate_type = A::aggregate_type(),
            id = %stored.id,
            "aggregate created"
        );

        Ok(CommandResult {
            new_version: stored.version,
            aggregate,
        })
    }

    /// Executes a command and persists the mutated aggregate.
    ///
    /// The command function receives the current aggregate and either
    /// mutates it or returns an error, in which case nothing is written.
    pub async fn execute<F>(
        &self,
        company_code: &CompanyCode,
        id: &str,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&mut A) -> Result<(), A::Error>,
        DomainError: From<A::Error>,
    {
        let mut aggregate = self.get(company_code, id).await?;

        command_fn(&mut aggregate)?;

        let new_version = self.save(&mut aggregate).await?;
        Ok(CommandResult {
            aggregate,
            new_version,
        })
    }

    /// Persists an aggregate that was loaded and mutated by the caller.
    ///
    /// The write is guarded by the version the aggregate was loaded at.
    pub async fn save(&self, aggregate: &mut A) -> Result<Version, DomainError> {
        let id = aggregate.id();
        let body = serde_json::to_value(&*aggregate)?;
        let filter = Filter::by_id(aggregate.company_code().clone(), &id);

        let new_version = self
            .store
            .update_one(
                A::collection(),
                &filter,
                body,
                WriteOptions::expect_version(aggregate.version()),
            )
            .await?;
        aggregate.set_version(new_version);
        Ok(new_version)
    }

    /// Deletes an aggregate after the check function accepts it.
    ///
    /// The delete is guarded by the loaded version, so a concurrent change
    /// between the check and the delete is reported as a conflict.
    pub async fn delete<F>(
        &self,
        company_code: &CompanyCode,
        id: &str,
        check_fn: F,
    ) -> Result<A, DomainError>
    where
        F: FnOnce(&A) -> Result<(), A::Error>,
        DomainError: From<A::Error>,
    {
        let aggregate = self.get(company_code, id).await?;

        check_fn(&aggregate)?;

        let deleted = self
            .store
            .delete_one(
                A::collection(),
                &Filter::by_id(company_code.clone(), id),
                WriteOptions::expect_version(aggregate.version()),
            )
            .await?;
        if !deleted {
            return Err(A::not_found(id).into());
        }
        Ok(aggregate)
    }
}
