use chrono::{DateTime, Utc};
use common::CompanyCode;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Version number of a stored document, used for optimistic concurrency control.
///
/// A document is inserted at version 1 and every successful update
/// increments it by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) of a document that was never stored.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the version (1) assigned on insert.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A stored document: a JSON body plus the metadata the store maintains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Identifier, unique per collection and company.
    pub id: String,

    /// Owning company.
    pub company_code: CompanyCode,

    /// Current version.
    pub version: Version,

    /// The document body.
    pub body: serde_json::Value,

    /// When the document was inserted.
    pub created_at: DateTime<Utc>,

    /// When the document was last written.
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Deserializes the body into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.body.clone())
    }

    /// Looks up a dotted path (`"a.b.c"`) inside the body.
    pub fn field(&self, path: &str) -> Option<&serde_json::Value> {
        path.split('.')
            .try_fold(&self.body, |value, segment| value.get(segment))
    }
}

/// A document about to be inserted.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: String,
    pub company_code: CompanyCode,
    pub body: serde_json::Value,
}

impl NewDocument {
    /// Creates a new document from a raw JSON body.
    pub fn new(
        id: impl Into<String>,
        company_code: CompanyCode,
        body: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            company_code,
            body,
        }
    }

    /// Creates a new document by serializing a value.
    pub fn from_value<T: Serialize>(
        id: impl Into<String>,
        company_code: CompanyCode,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(id, company_code, serde_json::to_value(value)?))
    }

    /// Materializes the stored form at version 1.
    pub fn into_document(self, now: DateTime<Utc>) -> Document {
        Document {
            id: self.id,
            company_code: self.company_code,
            version: Version::first(),
            body: self.body,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn version_ordering() {
        assert!(Version::new(1) < Version::new(2));
        assert_eq!(Version::first().next(), Version::new(2));
        assert_eq!(Version::initial().as_i64(), 0);
    }

    #[test]
    fn field_resolves_dotted_paths() {
        let doc = NewDocument::new(
            "tab-1",
            CompanyCode::new("ACME"),
            json!({"state": "open", "totals": {"amount": 20}}),
        )
        .into_document(Utc::now());

        assert_eq!(doc.field("state"), Some(&json!("open")));
        assert_eq!(doc.field("totals.amount"), Some(&json!(20)));
        assert_eq!(doc.field("totals.missing"), None);
        assert_eq!(doc.version, Version::first());
    }

    #[test]
    fn decode_typed_body() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Counter {
            value: u64,
        }

        let doc = NewDocument::from_value("c", CompanyCode::new("ACME"), &Counter { value: 3 })
            .unwrap()
            .into_document(Utc::now());
        let counter: Counter = doc.decode().unwrap();
        assert_eq!(counter, Counter { value: 3 });
    }
}
