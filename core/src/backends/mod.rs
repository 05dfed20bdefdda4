//! Storage backends that persist events per group and answer searches.
//!
//! Two implementations exist behind [`EventBackend`]: the JSON Lines
//! [`FileBackend`] and the [`DocumentBackend`]. [`Backend`] closes the set
//! and is chosen once, from configuration, by [`Backend::from_config`].

pub mod document;
pub mod file;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::config::EventItConfig;
use crate::errors::{EventItError, Result};
use crate::events::{Event, EventSchema};

pub use document::{DocumentBackend, DocumentBackendOptions};
pub use file::{FileBackend, FileBackendOptions};

/// Exact-match predicates: field name to expected wire value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query(BTreeMap<String, Value>);

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// True when every predicate equals the event's wire value.
    pub fn matches(&self, event: &Event) -> bool {
        self.0
            .iter()
            .all(|(field, expected)| event.value_of(field) == *expected)
    }

    /// Check every predicate against `schema` and return the query with
    /// values in the form the schema stores them (`2` becomes `2.0` for a
    /// float field). Undeclared fields and values of the wrong kind are
    /// invalid arguments.
    pub fn validate(&self, schema: &EventSchema) -> Result<Query> {
        let mut normalized = BTreeMap::new();
        for (field, expected) in &self.0 {
            let spec = schema.field(field).ok_or_else(|| {
                EventItError::InvalidArgument(format!(
                    "field `{field}` is not declared by schema `{}`",
                    schema.name()
                ))
            })?;
            let value = if expected.is_null() {
                Value::Null
            } else {
                spec.kind().normalize(expected).map_err(|reason| {
                    EventItError::InvalidArgument(format!("predicate on `{field}`: {reason}"))
                })?
            };
            normalized.insert(field.clone(), value);
        }
        Ok(Query(normalized))
    }
}

impl From<Map<String, Value>> for Query {
    fn from(map: Map<String, Value>) -> Self {
        Self(map.into_iter().collect())
    }
}

impl TryFrom<Value> for Query {
    type Error = EventItError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(map.into()),
            other => Err(EventItError::InvalidArgument(format!(
                "query must be a JSON object, got {other}"
            ))),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Query {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Common contract of every storage backend.
pub trait EventBackend: Send + Sync {
    /// Groups fixed at construction.
    fn groups(&self) -> &[String];

    /// Persist one event under `group`. Strictly additive.
    fn append(&self, event: &Event, group: &str) -> Result<()>;

    /// Events with `start <= timestamp <= end`, oldest first. A limit of
    /// `None` or `Some(0)` is unbounded.
    fn search_by_timestamp(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
        group: &str,
        schema: &Arc<EventSchema>,
        limit: Option<usize>,
    ) -> Result<Vec<Event>>;

    /// Events matching every predicate of `query`, oldest first. A limit of
    /// `None` or `Some(0)` is unbounded.
    fn search_by_query(
        &self,
        query: &Query,
        group: &str,
        schema: &Arc<EventSchema>,
        limit: Option<usize>,
    ) -> Result<Vec<Event>>;

    fn count_by_query(&self, query: &Query, group: &str, schema: &Arc<EventSchema>) -> Result<usize>;
}

/// The backend selected for an event logger.
#[derive(Debug)]
pub enum Backend {
    File(FileBackend),
    Document(DocumentBackend),
}

impl Backend {
    /// A connection string selects the document backend; otherwise events
    /// go to files under the configured directory.
    pub fn from_config(config: &EventItConfig) -> Result<Self> {
        let groups = config.resolved_groups();
        match &config.connection_string {
            Some(connection_string) => {
                log::debug!("selecting document backend for database {}", config.database);
                let options = DocumentBackendOptions {
                    connection_string: connection_string.clone(),
                    database: config.database.clone(),
                    groups,
                    exclude_none: config.exclude_none,
                    drop_database: config.drop_database,
                };
                DocumentBackend::connect(options).map(Backend::Document)
            }
            None => {
                log::debug!("selecting file backend in {}", config.directory.display());
                let options = FileBackendOptions {
                    directory: config.directory.clone(),
                    groups,
                    separate_files: config.separate_files,
                    filename: config.filename.clone(),
                    exclude_none: config.exclude_none,
                    fsync: config.fsync,
                };
                FileBackend::open(options).map(Backend::File)
            }
        }
    }

    pub fn as_file(&self) -> Option<&FileBackend> {
        match self {
            Self::File(backend) => Some(backend),
            Self::Document(_) => None,
        }
    }

    pub fn as_document(&self) -> Option<&DocumentBackend> {
        match self {
            Self::Document(backend) => Some(backend),
            Self::File(_) => None,
        }
    }

    fn inner(&self) -> &dyn EventBackend {
        match self {
            Self::File(backend) => backend,
            Self::Document(backend) => backend,
        }
    }
}

impl From<FileBackend> for Backend {
    fn from(backend: FileBackend) -> Self {
        Self::File(backend)
    }
}

impl From<DocumentBackend> for Backend {
    fn from(backend: DocumentBackend) -> Self {
        Self::Document(backend)
    }
}

impl EventBackend for Backend {
    fn groups(&self) -> &[String] {
        self.inner().groups()
    }

    fn append(&self, event: &Event, group: &str) -> Result<()> {
        self.inner().append(event, group)
    }

    fn search_by_timestamp(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
        group: &str,
        schema: &Arc<EventSchema>,
        limit: Option<usize>,
    ) -> Result<Vec<Event>> {
        self.inner()
            .search_by_timestamp(start, end, group, schema, limit)
    }

    fn search_by_query(
        &self,
        query: &Query,
        group: &str,
        schema: &Arc<EventSchema>,
        limit: Option<usize>,
    ) -> Result<Vec<Event>> {
        self.inner().search_by_query(query, group, schema, limit)
    }

    fn count_by_query(&self, query: &Query, group: &str, schema: &Arc<EventSchema>) -> Result<usize> {
        self.inner().count_by_query(query, group, schema)
    }
}

pub(crate) fn ensure_group(groups: &[String], group: &str) -> Result<()> {
    if groups.iter().any(|known| known == group) {
        Ok(())
    } else {
        Err(EventItError::InvalidArgument(format!(
            "unknown group `{group}`; configured groups are {groups:?}"
        )))
    }
}

/// Validate construction-time group lists: non-empty, no blanks, no repeats.
pub(crate) fn validate_groups(groups: &[String]) -> Result<()> {
    if groups.is_empty() {
        return Err(EventItError::Config("at least one group is required".into()));
    }
    for (idx, group) in groups.iter().enumerate() {
        if group.trim().is_empty() {
            return Err(EventItError::Config("group names must not be empty".into()));
        }
        if groups[..idx].contains(group) {
            return Err(EventItError::Config(format!("group `{group}` is listed twice")));
        }
    }
    Ok(())
}

/// Treat `Some(0)` like no limit.
pub(crate) fn effective_limit(limit: Option<usize>) -> Option<usize> {
    limit.filter(|limit| *limit > 0)
}

pub(crate) fn sort_by_timestamp(events: &mut [Event]) {
    events.sort_by_key(Event::timestamp);
}
