//! Event records captured per instrumented call.
//!
//! An [`Event`] is built once from a map of field values, validated against
//! an [`EventSchema`], and never mutated afterwards. Its wire form is a flat
//! JSON object; the timestamp is always UTC with millisecond precision so a
//! record survives a serialize/parse round trip unchanged.

pub mod schema;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use uuid::Uuid;

use crate::errors::{EventItError, Result};

pub use schema::{EventSchema, FieldKind, FieldSpec, SchemaBuilder, BASE_FIELDS};

const WIRE_TIMESTAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");

/// Current instant, UTC, truncated to milliseconds.
pub fn now_utc() -> OffsetDateTime {
    truncate_to_millis(OffsetDateTime::now_utc())
}

pub fn truncate_to_millis(ts: OffsetDateTime) -> OffsetDateTime {
    let ts = ts.to_offset(UtcOffset::UTC);
    ts.replace_nanosecond(u32::from(ts.millisecond()) * 1_000_000)
        .unwrap_or(ts)
}

/// Wire form of a timestamp: `2024-03-01T10:00:00.123Z`.
pub fn format_timestamp(ts: OffsetDateTime) -> String {
    let ts = truncate_to_millis(ts);
    ts.format(WIRE_TIMESTAMP)
        .unwrap_or_else(|_| ts.unix_timestamp().to_string())
}

/// Parse any RFC 3339 timestamp and normalise it to UTC milliseconds.
pub fn parse_timestamp(raw: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .map(truncate_to_millis)
        .map_err(|err| EventItError::Validation(format!("invalid timestamp `{raw}`: {err}")))
}

/// One captured event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    schema: Arc<EventSchema>,
    timestamp: OffsetDateTime,
    id: Uuid,
    user: Option<String>,
    group: Option<String>,
    function_name: Option<String>,
    event_location: Option<String>,
    description: Option<String>,
    extra: BTreeMap<String, Value>,
}

impl Event {
    /// Build an event of `schema` from named field values.
    ///
    /// `timestamp` and `uuid` are generated when absent. Fields the schema
    /// does not declare, values of the wrong kind and missing required
    /// fields are validation errors.
    pub fn new(schema: &Arc<EventSchema>, mut fields: Map<String, Value>) -> Result<Self> {
        schema.ensure_event_schema()?;

        let timestamp = match fields.remove("timestamp") {
            None | Some(Value::Null) => now_utc(),
            Some(Value::String(raw)) => parse_timestamp(&raw)?,
            Some(other) => {
                return Err(EventItError::Validation(format!(
                    "timestamp must be an RFC 3339 string, got {other}"
                )))
            }
        };
        let id = match fields.remove("uuid") {
            None | Some(Value::Null) => Uuid::new_v4(),
            Some(Value::String(raw)) => Uuid::parse_str(&raw)
                .map_err(|err| EventItError::Validation(format!("invalid uuid `{raw}`: {err}")))?,
            Some(other) => {
                return Err(EventItError::Validation(format!(
                    "uuid must be a string, got {other}"
                )))
            }
        };
        let user = take_string(&mut fields, "user")?;
        let group = take_string(&mut fields, "group")?;
        let function_name = take_string(&mut fields, "function_name")?;
        let event_location = take_string(&mut fields, "event_location")?;
        let description = take_string(&mut fields, "description")?;

        let mut extra = BTreeMap::new();
        for (name, value) in fields {
            let spec = schema.field(&name).ok_or_else(|| {
                EventItError::Validation(format!(
                    "unknown field `{name}` for schema `{}`",
                    schema.name()
                ))
            })?;
            if value.is_null() {
                continue;
            }
            let value = spec.kind().normalize(&value).map_err(|reason| {
                EventItError::Validation(format!("field `{name}`: {reason}"))
            })?;
            extra.insert(name, value);
        }
        for spec in schema.fields() {
            if extra.contains_key(spec.name()) {
                continue;
            }
            if let Some(default) = spec.default_value() {
                extra.insert(spec.name().to_string(), default.clone());
            } else if spec.is_required() {
                return Err(EventItError::Validation(format!(
                    "missing required field `{}` for schema `{}`",
                    spec.name(),
                    schema.name()
                )));
            }
        }

        Ok(Self {
            schema: Arc::clone(schema),
            timestamp,
            id,
            user,
            group,
            function_name,
            event_location,
            description,
            extra,
        })
    }

    /// Rehydrate a stored record; same rules as [`Event::new`].
    pub fn parse(schema: &Arc<EventSchema>, value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Self::new(schema, fields),
            other => Err(EventItError::Validation(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    pub fn from_json_str(schema: &Arc<EventSchema>, raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        Self::parse(schema, value)
    }

    pub fn schema(&self) -> &Arc<EventSchema> {
        &self.schema
    }

    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn function_name(&self) -> Option<&str> {
        self.function_name.as_deref()
    }

    pub fn event_location(&self) -> Option<&str> {
        self.event_location.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Value of a field declared by a derived schema.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }

    /// Wire value of any field, `Null` when unset.
    pub fn value_of(&self, name: &str) -> Value {
        match name {
            "timestamp" => Value::String(format_timestamp(self.timestamp)),
            "uuid" => Value::String(self.id.to_string()),
            "user" => optional(&self.user),
            "group" => optional(&self.group),
            "function_name" => optional(&self.function_name),
            "event_location" => optional(&self.event_location),
            "description" => optional(&self.description),
            other => self.extra.get(other).cloned().unwrap_or(Value::Null),
        }
    }

    /// Wire form. With `exclude_none` unset fields are left out, otherwise
    /// every declared field is present and unset ones are `null`.
    pub fn to_document(&self, exclude_none: bool) -> Map<String, Value> {
        let mut doc = Map::new();
        for name in BASE_FIELDS {
            let value = self.value_of(name);
            if !(exclude_none && value.is_null()) {
                doc.insert(name.to_string(), value);
            }
        }
        for (name, value) in &self.extra {
            doc.insert(name.clone(), value.clone());
        }
        if !exclude_none {
            for spec in self.schema.fields() {
                doc.entry(spec.name().to_string()).or_insert(Value::Null);
            }
        }
        doc
    }

    pub fn to_json_line(&self, exclude_none: bool) -> Result<String> {
        Ok(serde_json::to_string(&self.to_document(exclude_none))?)
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_document(true).serialize(serializer)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.to_document(true)))
    }
}

fn take_string(fields: &mut Map<String, Value>, name: &str) -> Result<Option<String>> {
    match fields.remove(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value)),
        Some(other) => Err(EventItError::Validation(format!(
            "field `{name}` must be a string, got {other}"
        ))),
    }
}

fn optional(value: &Option<String>) -> Value {
    value.clone().map(Value::String).unwrap_or(Value::Null)
}
