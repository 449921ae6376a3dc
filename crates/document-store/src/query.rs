use std::cmp::Ordering;

use common::CompanyCode;
use serde_json::Value;

use crate::Document;

/// Comparison applied to a single body field.
///
/// Ordering predicates compare numbers numerically and strings
/// lexicographically (RFC 3339 timestamps sort correctly this way). Values
/// of different kinds never satisfy an ordering predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    Exists(bool),
    /// The field is an array holding the value.
    Contains(Value),
}

impl Predicate {
    /// Evaluates the predicate against a field value (`None` when absent).
    pub fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            Predicate::Exists(expected) => value.is_some() == *expected,
            Predicate::Eq(expected) => value == Some(expected),
            Predicate::Contains(expected) => value
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(expected)),
            Predicate::Ne(expected) => value != Some(expected),
            Predicate::In(candidates) => value.is_some_and(|v| candidates.contains(v)),
            Predicate::Gt(bound) => compare(value, bound) == Some(Ordering::Greater),
            Predicate::Gte(bound) => matches!(
                compare(value, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Predicate::Lt(bound) => compare(value, bound) == Some(Ordering::Less),
            Predicate::Lte(bound) => {
                matches!(compare(value, bound), Some(Ordering::Less | Ordering::Equal))
            }
        }
    }

    fn operator(&self) -> &'static str {
        match self {
            Predicate::Eq(_) => "eq",
            Predicate::Ne(_) => "ne",
            Predicate::In(_) => "in",
            Predicate::Gt(_) => "gt",
            Predicate::Gte(_) => "gte",
            Predicate::Lt(_) => "lt",
            Predicate::Lte(_) => "lte",
            Predicate::Exists(_) => "exists",
            Predicate::Contains(_) => "contains",
        }
    }
}

fn compare(value: Option<&Value>, bound: &Value) -> Option<Ordering> {
    match (value?, bound) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Structured document filter.
///
/// Built with the chained methods below:
///
/// ```
/// use document_store::{CompanyCode, Filter};
///
/// let filter = Filter::for_company(CompanyCode::new("ACME"))
///     .not_equals("state", "closed");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    /// Restrict to documents owned by this company.
    pub company_code: Option<CompanyCode>,

    /// Restrict to the document with this id.
    pub id: Option<String>,

    /// Field predicates over dotted body paths; all must hold.
    pub predicates: Vec<(String, Predicate)>,
}

impl Filter {
    /// Creates an empty filter matching every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a filter scoped to a company.
    pub fn for_company(company_code: CompanyCode) -> Self {
        Self {
            company_code: Some(company_code),
            ..Default::default()
        }
    }

    /// Creates a filter for one document of a company.
    pub fn by_id(company_code: CompanyCode, id: impl Into<String>) -> Self {
        Self {
            company_code: Some(company_code),
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Restricts to a document id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Adds a predicate on a body field.
    pub fn field(mut self, path: impl Into<String>, predicate: Predicate) -> Self {
        self.predicates.push((path.into(), predicate));
        self
    }

    /// Adds an equality predicate.
    pub fn equals(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.field(path, Predicate::Eq(value.into()))
    }

    /// Adds an inequality predicate.
    pub fn not_equals(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.field(path, Predicate::Ne(value.into()))
    }

    /// Returns true if the document satisfies every part of the filter.
    pub fn matches(&self, document: &Document) -> bool {
        if let Some(ref company) = self.company_code
            && &document.company_code != company
        {
            return false;
        }
        if let Some(ref id) = self.id
            && &document.id != id
        {
            return false;
        }
        self.predicates
            .iter()
            .all(|(path, predicate)| predicate.matches(document.field(path)))
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(ref company) = self.company_code {
            parts.push(format!("company={company}"));
        }
        if let Some(ref id) = self.id {
            parts.push(format!("id={id}"));
        }
        for (path, predicate) in &self.predicates {
            parts.push(format!("{path} {}", predicate.operator()));
        }
        if parts.is_empty() {
            write!(f, "<all>")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}

/// Sort direction for [`FindOptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Sorting, paging and projection for `find`.
///
/// Results are first ordered by insertion time, then by the sort keys in
/// order of priority.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Sort keys over dotted body paths.
    pub sort: Vec<(String, SortDirection)>,

    /// Maximum number of documents to return.
    pub limit: Option<usize>,

    /// Number of documents to skip.
    pub offset: Option<usize>,

    /// Top-level body fields to keep; `None` keeps the whole body.
    pub projection: Option<Vec<String>>,
}

impl FindOptions {
    /// Creates default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sort key.
    pub fn sort_by(mut self, path: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push((path.into(), direction));
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips a number of results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Keeps only the given top-level fields.
    pub fn project(mut self, fields: Vec<String>) -> Self {
        self.projection = Some(fields);
        self
    }

    /// Applies ordering, paging and projection to matched documents.
    pub fn apply(&self, mut documents: Vec<Document>) -> Vec<Document> {
        documents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        if !self.sort.is_empty() {
            documents.sort_by(|a, b| {
                self.sort
                    .iter()
                    .map(|(path, direction)| {
                        let ordering = order_values(a.field(path), b.field(path));
                        match direction {
                            SortDirection::Ascending => ordering,
                            SortDirection::Descending => ordering.reverse(),
                        }
                    })
                    .find(|ordering| ordering.is_ne())
                    .unwrap_or(Ordering::Equal)
            });
        }

        let offset = self.offset.unwrap_or(0);
        let documents = documents.into_iter().skip(offset);
        let mut documents: Vec<_> = match self.limit {
            Some(limit) => documents.take(limit).collect(),
            None => documents.collect(),
        };

        if let Some(ref fields) = self.projection {
            for document in &mut documents {
                if let Value::Object(map) = &mut document.body {
                    map.retain(|key, _| fields.iter().any(|f| f == key));
                }
            }
        }

        documents
    }
}

/// Total order used for sorting: missing values first.
fn order_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare(Some(a), b).unwrap_or(Ordering::Equal),
    }
}
