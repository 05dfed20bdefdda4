//! Document-store collaborator used by the document backend.
//!
//! The backend only needs a handful of primitives: insert one document into
//! a named collection, query a collection with an equality/time filter, a
//! limit and a timestamp sort, and count. Any client offering those can sit
//! behind [`DocumentStore`]; [`sqlite::SqliteDocumentStore`] is the bundled
//! one.

pub mod sqlite;

use serde_json::{Map, Value};

use crate::errors::Result;

pub use sqlite::SqliteDocumentStore;

/// A stored document: one JSON object.
pub type Document = Map<String, Value>;

/// Allowed JSON types for one member of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRule {
    pub name: String,
    /// SQLite `json_type` names; `None` accepts any type.
    pub json_types: Option<&'static [&'static str]>,
    /// Present and not `null`.
    pub required: bool,
}

/// Conjunction of exact-match members, an optional inclusive range on the
/// wire `timestamp` member and an optional document shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFilter {
    pub equals: Vec<(String, Value)>,
    pub timestamp_range: Option<(String, String)>,
    /// When set, documents with members outside these rules, or whose
    /// members break a rule, do not match.
    pub members: Option<Vec<MemberRule>>,
}

impl DocumentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.push((field.into(), value.into()));
        self
    }

    /// Bounds use the wire timestamp format so they compare as strings.
    pub fn timestamp_between(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.timestamp_range = Some((start.into(), end.into()));
        self
    }

    pub fn with_members(mut self, rules: Vec<MemberRule>) -> Self {
        self.members = Some(rules);
        self
    }
}

pub trait DocumentStore: Send + Sync {
    /// Round trip to the store; fails when it is unreachable.
    fn ping(&self) -> Result<()>;

    /// Remove every collection of `database`.
    fn drop_database(&self, database: &str) -> Result<()>;

    fn insert_one(&self, database: &str, collection: &str, document: &Document) -> Result<()>;

    /// Matching documents sorted by ascending timestamp, at most `limit` of
    /// them when a limit is given.
    fn find(
        &self,
        database: &str,
        collection: &str,
        filter: &DocumentFilter,
        limit: Option<usize>,
    ) -> Result<Vec<Document>>;

    fn count(&self, database: &str, collection: &str, filter: &DocumentFilter) -> Result<u64>;

    fn collection_names(&self, database: &str) -> Result<Vec<String>>;
}
