//! Metric registry: named retrieval functions evaluated for every event.
//!
//! Built-in metrics are fixed at construction; custom metrics are added at
//! runtime and live for as long as the registry. The two maps never
//! overlap, so a custom metric can not shadow a built-in one.

use std::collections::HashMap;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::errors::{EventItError, Result};
use crate::events::{format_timestamp, now_utc};

/// Names of the metrics every registry ships with.
pub const BUILTIN_METRICS: [&str; 4] = ["timestamp", "function_name", "event_location", "group"];

/// Signature shared by built-in and custom metrics.
pub type MetricFn = Arc<dyn Fn(Option<&FunctionRef>, &MetricContext<'_>) -> Value + Send + Sync>;

/// Identity of the function an event is captured for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRef {
    name: String,
    module: Option<String>,
}

impl FunctionRef {
    /// Accepts a bare identifier or a path such as `crate::api::handler`;
    /// the last path segment becomes the function name.
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        let short = name.rsplit("::").next().unwrap_or(name).trim();
        Self {
            name: short.to_string(),
            module: None,
        }
    }

    pub fn in_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }
}

impl From<&str> for FunctionRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for FunctionRef {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.module {
            Some(module) => write!(f, "{module}::{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Per-event information handed to every metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricContext<'a> {
    pub group: Option<&'a str>,
    pub description: Option<&'a str>,
    pub location: Option<&'static Location<'static>>,
}

pub struct MetricRegistry {
    builtin: HashMap<&'static str, MetricFn>,
    custom: RwLock<HashMap<String, MetricFn>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        let mut builtin: HashMap<&'static str, MetricFn> = HashMap::new();
        builtin.insert("timestamp", Arc::new(timestamp_metric));
        builtin.insert("function_name", Arc::new(function_name_metric));
        builtin.insert("event_location", Arc::new(event_location_metric));
        builtin.insert("group", Arc::new(group_metric));
        Self {
            builtin,
            custom: RwLock::new(HashMap::new()),
        }
    }

    /// Evaluate `name`, built-ins first.
    pub fn retrieve(
        &self,
        name: &str,
        function: Option<&FunctionRef>,
        context: &MetricContext<'_>,
    ) -> Result<Value> {
        if let Some(metric) = self.builtin.get(name) {
            return Ok(metric(function, context));
        }
        // Clone out of the lock: a metric may consult the registry itself.
        let metric = self.custom.read().get(name).cloned();
        match metric {
            Some(metric) => Ok(metric(function, context)),
            None => Err(EventItError::MetricNotImplemented(name.to_string())),
        }
    }

    pub fn register_custom<F>(&self, name: impl Into<String>, metric: F) -> Result<()>
    where
        F: Fn(Option<&FunctionRef>, &MetricContext<'_>) -> Value + Send + Sync + 'static,
    {
        let name = name.into();
        if self.builtin.contains_key(name.as_str()) {
            return Err(EventItError::MetricAlreadyRegistered(name));
        }
        let mut custom = self.custom.write();
        if custom.contains_key(&name) {
            return Err(EventItError::MetricAlreadyRegistered(name));
        }
        log::debug!("registered custom metric {name}");
        custom.insert(name, Arc::new(metric));
        Ok(())
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtin.contains_key(name)
    }

    pub fn is_custom(&self, name: &str) -> bool {
        self.custom.read().contains_key(name)
    }

    pub fn custom_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.custom.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricRegistry")
            .field("builtin", &BUILTIN_METRICS)
            .field("custom", &self.custom_names())
            .finish()
    }
}

fn timestamp_metric(_: Option<&FunctionRef>, _: &MetricContext<'_>) -> Value {
    Value::String(format_timestamp(now_utc()))
}

fn function_name_metric(function: Option<&FunctionRef>, _: &MetricContext<'_>) -> Value {
    function
        .map(|f| Value::String(f.name().to_string()))
        .unwrap_or(Value::Null)
}

fn event_location_metric(_: Option<&FunctionRef>, context: &MetricContext<'_>) -> Value {
    context
        .location
        .map(|loc| Value::String(format!("{}:{}", loc.file(), loc.line())))
        .unwrap_or(Value::Null)
}

fn group_metric(_: Option<&FunctionRef>, context: &MetricContext<'_>) -> Value {
    context
        .group
        .map(|group| Value::String(group.to_string()))
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn constant(_: Option<&FunctionRef>, _: &MetricContext<'_>) -> Value {
        json!(1)
    }

    #[test]
    fn builtin_names_cannot_be_registered() {
        let registry = MetricRegistry::new();
        for name in BUILTIN_METRICS {
            let err = registry.register_custom(name, constant).unwrap_err();
            assert!(matches!(err, EventItError::MetricAlreadyRegistered(_)));
        }
        assert!(registry.custom_names().is_empty());
    }

    #[test]
    fn second_registration_fails_and_keeps_first() {
        let registry = MetricRegistry::new();
        registry.register_custom("x", constant).unwrap();
        assert!(registry.is_custom("x"));

        let err = registry
            .register_custom("x", |_: Option<&FunctionRef>, _: &MetricContext<'_>| json!(2))
            .unwrap_err();
        assert!(matches!(err, EventItError::MetricAlreadyRegistered(_)));
        let value = registry
            .retrieve("x", None, &MetricContext::default())
            .unwrap();
        assert_eq!(value, json!(1));
    }

    #[test]
    fn unknown_metric_is_not_implemented() {
        let registry = MetricRegistry::new();
        let err = registry
            .retrieve("route", None, &MetricContext::default())
            .unwrap_err();
        assert!(matches!(err, EventItError::MetricNotImplemented(name) if name == "route"));
    }

    #[test]
    fn function_name_uses_last_path_segment() {
        let registry = MetricRegistry::new();
        let ctx = MetricContext::default();
        assert_eq!(
            registry.retrieve("function_name", None, &ctx).unwrap(),
            Value::Null
        );
        let func = FunctionRef::new("crate :: api :: list_notes").in_module("crate::api");
        assert_eq!(
            registry.retrieve("function_name", Some(&func), &ctx).unwrap(),
            json!("list_notes")
        );
        assert_eq!(func.to_string(), "crate::api::list_notes");
        let plain = FunctionRef::from("Banana");
        assert_eq!(
            registry.retrieve("function_name", Some(&plain), &ctx).unwrap(),
            json!("Banana")
        );
    }

    #[test]
    fn context_metrics_read_the_context() {
        let registry = MetricRegistry::new();
        let ctx = MetricContext {
            group: Some("custom1"),
            description: None,
            location: Some(Location::caller()),
        };
        assert_eq!(registry.retrieve("group", None, &ctx).unwrap(), json!("custom1"));
        let location = registry.retrieve("event_location", None, &ctx).unwrap();
        assert!(location.as_str().unwrap().contains("metrics.rs:"));
        assert_eq!(
            registry
                .retrieve("group", None, &MetricContext::default())
                .unwrap(),
            Value::Null
        );
        let timestamp = registry.retrieve("timestamp", None, &ctx).unwrap();
        assert!(timestamp.as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn custom_metrics_may_query_the_registry() {
        let registry = Arc::new(MetricRegistry::new());
        let inner = Arc::clone(&registry);
        registry
            .register_custom("custom_count", move |_: Option<&FunctionRef>, _: &MetricContext<'_>| {
                json!(inner.custom_names().len())
            })
            .unwrap();
        let value = registry
            .retrieve("custom_count", None, &MetricContext::default())
            .unwrap();
        assert_eq!(value, json!(1));
    }
}
