use async_trait::async_trait;
use common::CompanyCode;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    Document, DocumentStoreError, Filter, FindOptions, NewDocument, Result, Version,
    store::{DocumentStore, WriteOptions},
};

/// PostgreSQL-backed document store.
///
/// Company and id scoping are pushed down to SQL; field predicates, sorting
/// and projection are evaluated on the fetched rows with the same code the
/// in-memory store uses, so both behave identically.
#[derive(Clone)]
pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    /// Creates a new PostgreSQL document store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_document(row: PgRow) -> Result<Document> {
        Ok(Document {
            id: row.try_get("id")?,
            company_code: CompanyCode::new(row.try_get::<String, _>("company_code")?),
            version: Version::new(row.try_get("version")?),
            body: row.try_get("body")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn fetch_scoped(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            r#"
            SELECT id, company_code, version, body, created_at, updated_at
            FROM documents
            WHERE collection = $1
              AND ($2::TEXT IS NULL OR company_code = $2)
              AND ($3::TEXT IS NULL OR id = $3)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(collection)
        .bind(filter.company_code.as_ref().map(CompanyCode::as_str))
        .bind(filter.id.as_deref())
        .fetch_all(&self.pool)
        .await?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let document = Self::row_to_document(row)?;
            if filter.matches(&document) {
                documents.push(document);
            }
        }
        Ok(documents)
    }

    fn not_found(collection: &str, filter: &Filter) -> DocumentStoreError {
        DocumentStoreError::NotFound {
            collection: collection.to_string(),
            filter: filter.to_string(),
        }
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>> {
        let documents = self.fetch_scoped(collection, filter).await?;
        Ok(options.apply(documents))
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>> {
        Ok(self
            .fetch_scoped(collection, filter)
            .await?
            .into_iter()
            .next())
    }

    async fn insert_one(&self, collection: &str, document: NewDocument) -> Result<Document> {
        let id = document.id.clone();
        let row = sqlx::query(
            r#"
            INSERT INTO documents (collection, company_code, id, version, body)
            VALUES ($1, $2, $3, 1, $4)
            RETURNING id, company_code, version, body, created_at, updated_at
            "#,
        )
        .bind(collection)
        .bind(document.company_code.as_str())
        .bind(&document.id)
        .bind(&document.body)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("documents_pkey")
            {
                return DocumentStoreError::DuplicateKey {
                    collection: collection.to_string(),
                    id: id.clone(),
                };
            }
            DocumentStoreError::Database(e)
        })?;

        Self::row_to_document(row)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        body: serde_json::Value,
        options: WriteOptions,
    ) -> Result<Version> {
        let current = self
            .find_one(collection, filter)
            .await?
            .ok_or_else(|| Self::not_found(collection, filter))?;

        let expected = options.expected_version.unwrap_or(current.version);
        if current.version != expected {
            metrics::counter!("document_store_conflicts_total").increment(1);
            return Err(DocumentStoreError::ConcurrencyConflict {
                collection: collection.to_string(),
                id: current.id,
                expected,
                actual: current.version,
            });
        }

        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE documents
            SET body = $4, version = version + 1, updated_at = NOW()
            WHERE collection = $1 AND company_code = $2 AND id = $3 AND version = $5
            RETURNING version
            "#,
        )
        .bind(collection)
        .bind(current.company_code.as_str())
        .bind(&current.id)
        .bind(&body)
        .bind(expected.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(version) => Ok(Version::new(version)),
            None => {
                // Lost the race between the read above and the guarded write.
                let actual = self
                    .find_one(collection, &Filter::by_id(current.company_code, &current.id))
                    .await?
                    .map_or(Version::initial(), |d| d.version);
                metrics::counter!("document_store_conflicts_total").increment(1);
                tracing::debug!(collection, id = %current.id, %expected, %actual, "guarded update lost race");
                Err(DocumentStoreError::ConcurrencyConflict {
                    collection: collection.to_string(),
                    id: current.id,
                    expected,
                    actual,
                })
            }
        }
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: &Filter,
        options: WriteOptions,
    ) -> Result<bool> {
        let Some(current) = self.find_one(collection, filter).await? else {
            return Ok(false);
        };

        let expected = options.expected_version.unwrap_or(current.version);
        let result = sqlx::query(
            r#"
            DELETE FROM documents
            WHERE collection = $1 AND company_code = $2 AND id = $3 AND version = $4
            "#,
        )
        .bind(collection)
        .bind(current.company_code.as_str())
        .bind(&current.id)
        .bind(expected.as_i64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 && expected != current.version {
            metrics::counter!("document_store_conflicts_total").increment(1);
            return Err(DocumentStoreError::ConcurrencyConflict {
                collection: collection.to_string(),
                id: current.id,
                expected,
                actual: current.version,
            });
        }

        Ok(result.rows_affected() > 0)
    }
}
