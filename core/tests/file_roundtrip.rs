//! End-to-end tests through the event logger and the file backend.
//!
//! Events written by one logger are read back both as raw JSON Lines and
//! through the backend search API.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use eventit_core::backends::{EventBackend, Query};
use eventit_core::events::{Event, EventSchema, FieldKind};
use eventit_core::{
    EventItConfig, EventItError, EventLogger, EventOptions, FunctionRef, MetricContext,
    TrackingDetails,
};
use serde_json::json;
use tempfile::TempDir;

fn file_config(dir: &TempDir, groups: &[&str]) -> EventItConfig {
    EventItConfig {
        groups: groups.iter().map(|g| g.to_string()).collect(),
        ..EventItConfig::in_directory(dir.path())
    }
}

#[test]
fn ten_thousand_events_read_back_in_order() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let logger = EventLogger::new(&file_config(&temp_dir, &[])).expect("Failed to build logger");

    let function = FunctionRef::new("bulk_job");
    for _ in 0..10_000 {
        logger
            .log_event(Some(&function), &EventOptions::new())
            .expect("Failed to log event");
    }

    let raw = std::fs::read_to_string(temp_dir.path().join("default.log"))
        .expect("Failed to read log");
    let base = EventSchema::base();
    let events: Vec<Event> = raw
        .lines()
        .map(|line| Event::from_json_str(&base, line).expect("line should parse"))
        .collect();
    assert_eq!(events.len(), 10_000);
    assert!(events
        .windows(2)
        .all(|pair| pair[0].timestamp() <= pair[1].timestamp()));
    assert!(events
        .iter()
        .all(|event| event.function_name() == Some("bulk_job")));

    let count = logger
        .backend()
        .count_by_query(&Query::new().eq("function_name", "bulk_job"), "default", &base)
        .expect("Failed to count");
    assert_eq!(count, 10_000);
}

#[test]
fn custom_metrics_are_searchable() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let schema = EventSchema::derive("MyEvent")
        .required("field1", FieldKind::String)
        .required("field2", FieldKind::Integer)
        .build()
        .expect("Failed to build schema");
    let logger = EventLogger::new(&file_config(&temp_dir, &["custom1"])).expect("Failed to build logger");

    let next = Arc::new(AtomicI64::new(2));
    let counter = Arc::clone(&next);
    logger
        .register_custom_metric("field1", |_: Option<&FunctionRef>, _: &MetricContext<'_>| {
            json!("value1")
        })
        .expect("Failed to register field1");
    logger
        .register_custom_metric("field2", move |_: Option<&FunctionRef>, _: &MetricContext<'_>| {
            json!(counter.fetch_add(1, Ordering::SeqCst))
        })
        .expect("Failed to register field2");

    let options = EventOptions::new()
        .group("custom1")
        .schema(Arc::clone(&schema))
        .tracking_details(
            TrackingDetails::builtin()
                .track("field1", true)
                .track("field2", true),
        );
    let job = logger.instrument("job", options, || ());
    job.call(()).expect("first call");
    job.call(()).expect("second call");

    let query = Query::new().eq("field1", "value1").eq("field2", 2);
    let found = logger
        .backend()
        .search_by_query(&query, "custom1", &schema, None)
        .expect("Failed to search");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].field("field2"), Some(&json!(2)));
    assert_eq!(found[0].function_name(), Some("job"));
    assert_eq!(
        logger
            .backend()
            .count_by_query(&query, "custom1", &schema)
            .expect("Failed to count"),
        1
    );
    assert_eq!(
        logger
            .backend()
            .count_by_query(&Query::new(), "custom1", &schema)
            .expect("Failed to count"),
        2
    );
}

#[test]
fn invalid_searches_create_nothing() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let logger = EventLogger::new(&file_config(&temp_dir, &[])).expect("Failed to build logger");
    let base = EventSchema::base();

    let err = logger
        .backend()
        .search_by_query(&Query::new().eq("field3", 1), "default", &base, None)
        .unwrap_err();
    assert!(matches!(err, EventItError::InvalidArgument(_)));
    let err = logger
        .backend()
        .count_by_query(&Query::new(), "custom9", &base)
        .unwrap_err();
    assert!(matches!(err, EventItError::InvalidArgument(_)));

    let mut names: Vec<_> = std::fs::read_dir(temp_dir.path())
        .expect("Failed to list dir")
        .map(|entry| entry.expect("dir entry").file_name())
        .collect();
    names.sort();
    assert_eq!(names, vec![std::ffi::OsString::from("default.log")]);
}

#[test]
fn shared_file_keeps_groups_apart() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = EventItConfig {
        separate_files: false,
        ..file_config(&temp_dir, &["custom1"])
    };
    let logger = EventLogger::new(&config).expect("Failed to build logger");
    for group in ["default", "custom1", "custom1"] {
        logger
            .log_event(None, &EventOptions::new().group(group))
            .expect("Failed to log event");
    }

    let raw = std::fs::read_to_string(temp_dir.path().join("eventit.log"))
        .expect("Failed to read log");
    assert_eq!(raw.lines().count(), 3);

    let base = EventSchema::base();
    let backend = logger.backend();
    assert_eq!(backend.count_by_query(&Query::new(), "default", &base).unwrap(), 1);
    assert_eq!(backend.count_by_query(&Query::new(), "custom1", &base).unwrap(), 2);
}
