//! Document-store backend: one collection per group inside one database.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use super::{effective_limit, ensure_group, validate_groups, EventBackend, Query};
use crate::errors::{EventItError, Result};
use crate::events::{format_timestamp, truncate_to_millis, Event, EventSchema, FieldKind};
use crate::store::{Document, DocumentFilter, DocumentStore, MemberRule, SqliteDocumentStore};

pub const DEFAULT_DATABASE: &str = "eventit";

#[derive(Debug, Clone)]
pub struct DocumentBackendOptions {
    pub connection_string: String,
    pub database: String,
    pub groups: Vec<String>,
    pub exclude_none: bool,
    /// Drop every collection of `database` before binding to it.
    pub drop_database: bool,
}

impl Default for DocumentBackendOptions {
    fn default() -> Self {
        Self {
            connection_string: crate::store::sqlite::MEMORY_CONNECTION.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            groups: vec![crate::config::DEFAULT_GROUP.to_string()],
            exclude_none: true,
            drop_database: false,
        }
    }
}

pub struct DocumentBackend {
    store: Arc<dyn DocumentStore>,
    database: String,
    groups: Vec<String>,
    exclude_none: bool,
}

impl DocumentBackend {
    /// Open the store named by the connection string and bind to it.
    pub fn connect(options: DocumentBackendOptions) -> Result<Self> {
        let store = SqliteDocumentStore::open(&options.connection_string)?;
        Self::with_store(Arc::new(store), options)
    }

    /// Bind to an already constructed store. Connectivity is checked here,
    /// and the database is reset when `drop_database` is set.
    pub fn with_store(store: Arc<dyn DocumentStore>, options: DocumentBackendOptions) -> Result<Self> {
        validate_groups(&options.groups)?;
        if options.database.trim().is_empty() {
            return Err(EventItError::Config("database name must not be empty".into()));
        }
        store.ping().map_err(|err| {
            EventItError::Config(format!("document store is unreachable: {err}"))
        })?;
        if options.drop_database {
            log::warn!("resetting database {} on startup", options.database);
            store.drop_database(&options.database)?;
        }
        log::debug!(
            "document backend bound to database {} with groups {:?}",
            options.database,
            options.groups
        );
        Ok(Self {
            store,
            database: options.database,
            groups: options.groups,
            exclude_none: options.exclude_none,
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn exclude_none(&self) -> bool {
        self.exclude_none
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    fn find(
        &self,
        filter: &DocumentFilter,
        group: &str,
        schema: &Arc<EventSchema>,
        limit: Option<usize>,
    ) -> Result<Vec<Event>> {
        let documents = self
            .store
            .find(&self.database, group, filter, effective_limit(limit))?;
        Ok(documents
            .into_iter()
            .filter_map(|document| rehydrate(document, group, schema))
            .collect())
    }
}

impl std::fmt::Debug for DocumentBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentBackend")
            .field("database", &self.database)
            .field("groups", &self.groups)
            .field("exclude_none", &self.exclude_none)
            .finish()
    }
}

impl EventBackend for DocumentBackend {
    fn groups(&self) -> &[String] {
        &self.groups
    }

    fn append(&self, event: &Event, group: &str) -> Result<()> {
        ensure_group(&self.groups, group)?;
        self.store
            .insert_one(&self.database, group, &event.to_document(self.exclude_none))?;
        log::trace!("inserted event {} into {}.{group}", event.id(), self.database);
        Ok(())
    }

    fn search_by_timestamp(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
        group: &str,
        schema: &Arc<EventSchema>,
        limit: Option<usize>,
    ) -> Result<Vec<Event>> {
        ensure_group(&self.groups, group)?;
        schema.ensure_event_schema()?;
        let filter = shaped_by(schema)
            .timestamp_between(format_timestamp(ceil_to_millis(start)), format_timestamp(end));
        self.find(&filter, group, schema, limit)
    }

    fn search_by_query(
        &self,
        query: &Query,
        group: &str,
        schema: &Arc<EventSchema>,
        limit: Option<usize>,
    ) -> Result<Vec<Event>> {
        ensure_group(&self.groups, group)?;
        schema.ensure_event_schema()?;
        let query = query.validate(schema)?;
        self.find(&to_filter(&query, schema), group, schema, limit)
    }

    fn count_by_query(&self, query: &Query, group: &str, schema: &Arc<EventSchema>) -> Result<usize> {
        ensure_group(&self.groups, group)?;
        schema.ensure_event_schema()?;
        let query = query.validate(schema)?;
        let count = self
            .store
            .count(&self.database, group, &to_filter(&query, schema))?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }
}

fn to_filter(query: &Query, schema: &EventSchema) -> DocumentFilter {
    query
        .iter()
        .fold(shaped_by(schema), |filter, (field, value)| filter.eq(field.clone(), value.clone()))
}

/// Filter matching only documents that would rehydrate as `schema`, so
/// limits and counts never include records a search would skip.
fn shaped_by(schema: &EventSchema) -> DocumentFilter {
    let rules = schema
        .fields()
        .into_iter()
        .map(|spec| MemberRule {
            name: spec.name().to_string(),
            json_types: json_types(spec.kind()),
            required: spec.is_required() && spec.default_value().is_none(),
        })
        .collect();
    DocumentFilter::new().with_members(rules)
}

const TEXT: &[&str] = &["text"];
const INTEGER: &[&str] = &["integer"];
const NUMBER: &[&str] = &["integer", "real"];
const BOOLEAN: &[&str] = &["true", "false"];

fn json_types(kind: FieldKind) -> Option<&'static [&'static str]> {
    match kind {
        FieldKind::String | FieldKind::Timestamp => Some(TEXT),
        FieldKind::Integer => Some(INTEGER),
        FieldKind::Float => Some(NUMBER),
        FieldKind::Boolean => Some(BOOLEAN),
        FieldKind::Json => None,
    }
}

/// Stored timestamps have millisecond precision; rounding the lower bound
/// up keeps `start <= timestamp` exact.
fn ceil_to_millis(ts: OffsetDateTime) -> OffsetDateTime {
    let truncated = truncate_to_millis(ts);
    if truncated < ts {
        truncated + Duration::milliseconds(1)
    } else {
        truncated
    }
}

fn rehydrate(document: Document, group: &str, schema: &Arc<EventSchema>) -> Option<Event> {
    match Event::new(schema, document) {
        Ok(event) => Some(event),
        Err(err) => {
            log::warn!("skipping document in collection {group} for schema {}: {err}", schema.name());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::parse_timestamp;
    use crate::store::sqlite::MEMORY_CONNECTION;
    use serde_json::{json, Map, Value};

    fn my_event_schema() -> Arc<EventSchema> {
        EventSchema::derive("MyEvent")
            .required("field1", FieldKind::String)
            .required("field2", FieldKind::Integer)
            .build()
            .unwrap()
    }

    fn event(schema: &Arc<EventSchema>, value: Value) -> Event {
        let Value::Object(map) = value else { unreachable!() };
        Event::new(schema, map).unwrap()
    }

    fn backend_on(store: &Arc<SqliteDocumentStore>, drop_database: bool) -> DocumentBackend {
        let store: Arc<dyn DocumentStore> = Arc::clone(store) as Arc<dyn DocumentStore>;
        DocumentBackend::with_store(
            store,
            DocumentBackendOptions {
                groups: vec!["group1".into(), "group2".into()],
                drop_database,
                ..DocumentBackendOptions::default()
            },
        )
        .unwrap()
    }

    fn memory_store() -> Arc<SqliteDocumentStore> {
        Arc::new(SqliteDocumentStore::open(MEMORY_CONNECTION).unwrap())
    }

    #[test]
    fn search_and_count_by_query() {
        let backend = backend_on(&memory_store(), false);
        let schema = my_event_schema();
        let query = Query::new().eq("field1", "value1").eq("field2", 2);

        assert!(backend.search_by_query(&query, "group1", &schema, None).unwrap().is_empty());
        assert_eq!(backend.count_by_query(&query, "group1", &schema).unwrap(), 0);
        assert_eq!(backend.count_by_query(&Query::new(), "group1", &schema).unwrap(), 0);

        backend
            .append(&event(&schema, json!({ "field1": "value1", "field2": 2 })), "group1")
            .unwrap();
        backend
            .append(&event(&schema, json!({ "field1": "value1", "field2": 3 })), "group1")
            .unwrap();
        let found = backend.search_by_query(&query, "group1", &schema, None).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].field("field2"), Some(&json!(2)));
        assert_eq!(backend.count_by_query(&query, "group1", &schema).unwrap(), 1);

        for _ in 0..10 {
            backend
                .append(&event(&schema, json!({ "field1": "value1", "field2": 2 })), "group1")
                .unwrap();
        }
        assert_eq!(backend.search_by_query(&query, "group1", &schema, Some(5)).unwrap().len(), 5);
        assert_eq!(backend.search_by_query(&query, "group1", &schema, Some(0)).unwrap().len(), 11);
        assert_eq!(backend.search_by_query(&query, "group1", &schema, None).unwrap().len(), 11);
        assert_eq!(backend.count_by_query(&query, "group1", &schema).unwrap(), 11);
        assert_eq!(backend.count_by_query(&query, "group2", &schema).unwrap(), 0);
    }

    #[test]
    fn bad_queries_touch_nothing() {
        let store = memory_store();
        let backend = backend_on(&store, false);
        let schema = my_event_schema();
        assert!(matches!(
            backend.search_by_query(&Query::new().eq("field3", "v"), "group1", &schema, None),
            Err(EventItError::InvalidArgument(_))
        ));
        assert!(matches!(
            backend.search_by_query(&Query::new(), "group3", &schema, None),
            Err(EventItError::InvalidArgument(_))
        ));
        assert!(matches!(
            backend.append(&event(&schema, json!({ "field1": "a", "field2": 1 })), "group3"),
            Err(EventItError::InvalidArgument(_))
        ));
        assert!(store.collection_names(DEFAULT_DATABASE).unwrap().is_empty());
    }

    #[test]
    fn timestamp_search_is_inclusive_sorted_and_limited() {
        let backend = backend_on(&memory_store(), false);
        let base = EventSchema::base();
        for ts in [
            "2024-05-01T00:00:03.000Z",
            "2024-05-01T00:00:01.000Z",
            "2024-05-01T00:00:02.000Z",
            "2024-05-01T00:00:04.500Z",
        ] {
            backend
                .append(&event(&base, json!({ "timestamp": ts })), "group2")
                .unwrap();
        }
        let start = parse_timestamp("2024-05-01T00:00:01.000Z").unwrap();
        let end = parse_timestamp("2024-05-01T00:00:03.000Z").unwrap();
        let found = backend
            .search_by_timestamp(start, end, "group2", &base, None)
            .unwrap();
        let stamps: Vec<_> = found.iter().map(Event::timestamp).collect();
        assert_eq!(stamps.len(), 3);
        assert!(stamps.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(stamps[0], start);
        assert_eq!(stamps[2], end);

        let limited = backend
            .search_by_timestamp(start, end, "group2", &base, Some(2))
            .unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].timestamp(), start);
    }

    #[test]
    fn documents_that_do_not_fit_the_schema_are_skipped() {
        let store = memory_store();
        let backend = backend_on(&store, false);
        let schema = my_event_schema();
        backend
            .append(&Event::new(&EventSchema::base(), Map::new()).unwrap(), "group1")
            .unwrap();
        backend
            .append(&event(&schema, json!({ "field1": "a", "field2": 1 })), "group1")
            .unwrap();
        let found = backend
            .search_by_query(&Query::new(), "group1", &schema, None)
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn drop_database_only_when_asked() {
        let store = memory_store();
        let first = backend_on(&store, false);
        first
            .append(&Event::new(&EventSchema::base(), Map::new()).unwrap(), "group1")
            .unwrap();

        let kept = backend_on(&store, false);
        assert_eq!(kept.count_by_query(&Query::new(), "group1", &EventSchema::base()).unwrap(), 1);

        let reset = backend_on(&store, true);
        assert_eq!(reset.count_by_query(&Query::new(), "group1", &EventSchema::base()).unwrap(), 0);
    }

    #[test]
    fn connect_fails_fast_for_bad_connection_strings() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope").join("events.db");
        for connection_string in [
            "mongodb://127.0.0.1:27017".to_string(),
            format!("sqlite://{}", missing.display()),
        ] {
            let err = DocumentBackend::connect(DocumentBackendOptions {
                connection_string,
                ..DocumentBackendOptions::default()
            })
            .unwrap_err();
            assert!(matches!(err, EventItError::Config(_)));
        }
    }

    #[test]
    fn exclude_none_is_respected_in_documents() {
        let store = memory_store();
        let backend = DocumentBackend::with_store(
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            DocumentBackendOptions {
                exclude_none: false,
                ..DocumentBackendOptions::default()
            },
        )
        .unwrap();
        backend
            .append(&Event::new(&EventSchema::base(), Map::new()).unwrap(), "default")
            .unwrap();
        let docs = store
            .find(DEFAULT_DATABASE, "default", &DocumentFilter::new(), None)
            .unwrap();
        assert_eq!(docs[0].get("user"), Some(&Value::Null));
        assert_eq!(
            backend
                .count_by_query(&Query::new().eq("user", Value::Null), "default", &EventSchema::base())
                .unwrap(),
            1
        );
    }
}
