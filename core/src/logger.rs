//! Event assembler.
//!
//! [`EventLogger`] gathers metric values for a call site, validates them
//! against a schema and hands the resulting [`Event`] to the configured
//! backend. Instances are cheap to clone and meant to be passed explicitly
//! to whatever needs to log.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::backends::{Backend, EventBackend};
use crate::config::{EventItConfig, DEFAULT_GROUP};
use crate::errors::{EventItError, Result};
use crate::events::{Event, EventSchema};
use crate::instrument::{EventDecorator, Instrumented};
use crate::metrics::{FunctionRef, MetricContext, MetricRegistry, BUILTIN_METRICS};

/// Metric name to "collect it" flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingDetails(BTreeMap<String, bool>);

impl TrackingDetails {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in metric enabled.
    pub fn builtin() -> Self {
        BUILTIN_METRICS.iter().map(|name| (*name, true)).collect()
    }

    pub fn track(mut self, metric: impl Into<String>, enabled: bool) -> Self {
        self.0.insert(metric.into(), enabled);
        self
    }

    pub fn is_enabled(&self, metric: &str) -> bool {
        self.0.get(metric).copied().unwrap_or(false)
    }

    /// Names flagged `true`, in name order.
    pub fn enabled(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(name, _)| name.as_str())
    }
}

impl<K: Into<String>> FromIterator<(K, bool)> for TrackingDetails {
    fn from_iter<I: IntoIterator<Item = (K, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Per-call parameters of [`EventLogger::log_event`]. Unset values fall
/// back to the logger's defaults.
#[derive(Debug, Clone, Default)]
pub struct EventOptions {
    pub description: Option<String>,
    pub tracking_details: Option<TrackingDetails>,
    pub schema: Option<Arc<EventSchema>>,
    pub group: Option<String>,
}

impl EventOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn tracking_details(mut self, details: TrackingDetails) -> Self {
        self.tracking_details = Some(details);
        self
    }

    pub fn schema(mut self, schema: Arc<EventSchema>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

struct Inner {
    backend: Backend,
    default_group: String,
    default_schema: Arc<EventSchema>,
    metrics: MetricRegistry,
}

#[derive(Clone)]
pub struct EventLogger {
    inner: Arc<Inner>,
}

impl EventLogger {
    /// Select the backend from `config` and set up the assembler.
    pub fn new(config: &EventItConfig) -> Result<Self> {
        let backend = Backend::from_config(config)?;
        Self::builder(backend)
            .default_group(config.default_group.clone())
            .build()
    }

    pub fn builder(backend: impl Into<Backend>) -> EventLoggerBuilder {
        EventLoggerBuilder {
            backend: backend.into(),
            default_group: DEFAULT_GROUP.to_string(),
            default_schema: EventSchema::base(),
        }
    }

    pub fn backend(&self) -> &Backend {
        &self.inner.backend
    }

    pub fn groups(&self) -> &[String] {
        self.inner.backend.groups()
    }

    pub fn default_group(&self) -> &str {
        &self.inner.default_group
    }

    pub fn default_schema(&self) -> &Arc<EventSchema> {
        &self.inner.default_schema
    }

    pub fn metrics(&self) -> &MetricRegistry {
        &self.inner.metrics
    }

    pub fn register_custom_metric<F>(&self, name: impl Into<String>, metric: F) -> Result<()>
    where
        F: Fn(Option<&FunctionRef>, &MetricContext<'_>) -> Value + Send + Sync + 'static,
    {
        self.inner.metrics.register_custom(name, metric)
    }

    /// Assemble one event for the caller's location and append it.
    #[track_caller]
    pub fn log_event(&self, function: Option<&FunctionRef>, options: &EventOptions) -> Result<()> {
        self.log_event_at(function, options, Location::caller())
    }

    pub(crate) fn log_event_at(
        &self,
        function: Option<&FunctionRef>,
        options: &EventOptions,
        location: &'static Location<'static>,
    ) -> Result<()> {
        let schema = options
            .schema
            .as_ref()
            .unwrap_or(&self.inner.default_schema);
        schema.ensure_event_schema()?;

        let group = options
            .group
            .as_deref()
            .unwrap_or(&self.inner.default_group);
        if !self.groups().iter().any(|known| known == group) {
            return Err(EventItError::InvalidArgument(format!(
                "unknown group `{group}`; configured groups are {:?}",
                self.groups()
            )));
        }

        let builtin;
        let tracking = match &options.tracking_details {
            Some(details) => details,
            None => {
                builtin = TrackingDetails::builtin();
                &builtin
            }
        };

        let context = MetricContext {
            group: Some(group),
            description: options.description.as_deref(),
            location: Some(location),
        };
        let mut fields = Map::new();
        for metric in tracking.enabled() {
            let value = self.inner.metrics.retrieve(metric, function, &context)?;
            fields.insert(metric.to_string(), value);
        }
        if let Some(description) = &options.description {
            fields.insert("description".into(), Value::String(description.clone()));
        }

        let event = Event::new(schema, fields)?;
        self.inner.backend.append(&event, group)
    }

    /// Reusable wrapper factory bound to `options`.
    pub fn event(&self, options: EventOptions) -> EventDecorator {
        EventDecorator::new(self.clone(), options)
    }

    /// Wrap `f` so every call logs an event for `function` first.
    pub fn instrument<F>(
        &self,
        function: impl Into<FunctionRef>,
        options: EventOptions,
        f: F,
    ) -> Instrumented<F> {
        self.event(options).wrap(function, f)
    }
}

impl fmt::Debug for EventLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLogger")
            .field("backend", &self.inner.backend)
            .field("default_group", &self.inner.default_group)
            .field("default_schema", &self.inner.default_schema.name())
            .field("metrics", &self.inner.metrics)
            .finish()
    }
}

pub struct EventLoggerBuilder {
    backend: Backend,
    default_group: String,
    default_schema: Arc<EventSchema>,
}

impl EventLoggerBuilder {
    pub fn default_group(mut self, group: impl Into<String>) -> Self {
        self.default_group = group.into();
        self
    }

    pub fn default_schema(mut self, schema: Arc<EventSchema>) -> Self {
        self.default_schema = schema;
        self
    }

    pub fn build(self) -> Result<EventLogger> {
        if !self.backend.groups().contains(&self.default_group) {
            return Err(EventItError::Config(format!(
                "default group `{}` is not one of the backend groups {:?}",
                self.default_group,
                self.backend.groups()
            )));
        }
        self.default_schema.ensure_event_schema()?;
        log::debug!(
            "event logger ready: default group {}, default schema {}",
            self.default_group,
            self.default_schema.name()
        );
        Ok(EventLogger {
            inner: Arc::new(Inner {
                backend: self.backend,
                default_group: self.default_group,
                default_schema: self.default_schema,
                metrics: MetricRegistry::new(),
            }),
        })
    }
}
