pub mod document;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use common::CompanyCode;
pub use document::{Document, NewDocument, Version};
pub use error::{DocumentStoreError, Result};
pub use memory::InMemoryDocumentStore;
pub use postgres::PostgresDocumentStore;
pub use query::{Filter, FindOptions, Predicate, SortDirection};
pub use store::{DocumentStore, DocumentStoreExt, WriteOptions};
