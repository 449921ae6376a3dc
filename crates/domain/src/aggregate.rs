//! Core aggregate trait.

use common::CompanyCode;
use document_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for aggregates persisted as one document each.
///
/// The aggregate body is the serialized struct; the version lives in the
/// document metadata and is restored by the repository after loading.
/// Every aggregate is owned by exactly one company.
pub trait Aggregate: Serialize + DeserializeOwned + Send + Sync + Sized {
    /// The type of errors this aggregate's operations produce.
    type Error: std::error::Error + Send + Sync;

    /// Returns the aggregate type name, used in logs.
    fn aggregate_type() -> &'static str;

    /// Returns the collection the aggregate is stored in.
    fn collection() -> &'static str;

    /// Returns the error reported when the aggregate does not exist for the
    /// requesting company.
    fn not_found(id: &str) -> Self::Error;

    /// Returns the document id.
    fn id(&self) -> String;

    /// Returns the owning company.
    fn company_code(&self) -> &CompanyCode;

    /// Returns the version the aggregate was loaded at.
    ///
    /// `Version::initial()` for an aggregate that has not been stored yet.
    fn version(&self) -> Version;

    /// Sets the aggregate version.
    ///
    /// Called by the repository after loading and after each write.
    fn set_version(&mut self, version: Version);
}
