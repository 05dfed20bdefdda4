//! Event schemas describe the field set an [`Event`](super::Event) must
//! satisfy.
//!
//! Every schema used to produce or read events derives, directly or through
//! other derived schemas, from [`EventSchema::base`]. Derived schemas add
//! typed fields on top of their parent but can never redeclare an inherited
//! one. Standalone schemas exist only so foreign shapes can be described;
//! every event operation rejects them.

use std::sync::{Arc, LazyLock};

use serde_json::Value;

use super::{format_timestamp, parse_timestamp};
use crate::errors::{EventItError, Result};

/// Field names carried by every event record, in wire order.
pub const BASE_FIELDS: [&str; 7] = [
    "timestamp",
    "uuid",
    "user",
    "group",
    "function_name",
    "event_location",
    "description",
];

const BASE_SCHEMA_NAME: &str = "BaseEvent";

static BASE_SCHEMA: LazyLock<Arc<EventSchema>> = LazyLock::new(|| {
    let fields = BASE_FIELDS
        .iter()
        .map(|name| FieldSpec {
            name: (*name).to_string(),
            kind: if *name == "timestamp" {
                FieldKind::Timestamp
            } else {
                FieldKind::String
            },
            required: false,
            default: None,
        })
        .collect();
    Arc::new(EventSchema {
        name: BASE_SCHEMA_NAME.to_string(),
        origin: Origin::Base,
        fields,
    })
});

/// JSON shape accepted for a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    /// RFC 3339 string, normalised to UTC with millisecond precision.
    Timestamp,
    /// Any JSON value.
    Json,
}

impl FieldKind {
    /// Check `value` against the kind and return its canonical form.
    pub fn normalize(&self, value: &Value) -> std::result::Result<Value, String> {
        match self {
            Self::String if value.is_string() => Ok(value.clone()),
            Self::Integer if value.is_i64() || value.is_u64() => Ok(value.clone()),
            Self::Float => value
                .as_f64()
                .map(Value::from)
                .ok_or_else(|| format!("expected a number, got {value}")),
            Self::Boolean if value.is_boolean() => Ok(value.clone()),
            Self::Timestamp => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| format!("expected an RFC 3339 timestamp, got {value}"))?;
                let ts = parse_timestamp(raw).map_err(|err| err.to_string())?;
                Ok(Value::String(format_timestamp(ts)))
            }
            Self::Json => Ok(value.clone()),
            other => Err(format!("expected {}, got {value}", other.describe())),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Integer => "an integer",
            Self::Float => "a number",
            Self::Boolean => "a boolean",
            Self::Timestamp => "a timestamp",
            Self::Json => "any JSON value",
        }
    }
}

/// One declared field of a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    name: String,
    kind: FieldKind,
    required: bool,
    default: Option<Value>,
}

impl FieldSpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Origin {
    Base,
    Derived(Arc<EventSchema>),
    Standalone,
}

/// Named, immutable declaration of the fields an event record carries.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSchema {
    name: String,
    origin: Origin,
    fields: Vec<FieldSpec>,
}

impl EventSchema {
    /// The schema every event record satisfies.
    pub fn base() -> Arc<EventSchema> {
        Arc::clone(&BASE_SCHEMA)
    }

    /// Start a schema derived directly from the base schema.
    pub fn derive(name: impl Into<String>) -> SchemaBuilder {
        Self::extend(&BASE_SCHEMA, name)
    }

    /// Start a schema derived from `parent`.
    pub fn extend(parent: &Arc<EventSchema>, name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            origin: Origin::Derived(Arc::clone(parent)),
            fields: Vec::new(),
        }
    }

    /// Start a schema that does not derive from the base schema.
    pub fn standalone(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            origin: Origin::Standalone,
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<EventSchema>> {
        match &self.origin {
            Origin::Derived(parent) => Some(parent),
            Origin::Base | Origin::Standalone => None,
        }
    }

    pub fn is_base(&self) -> bool {
        matches!(self.origin, Origin::Base)
    }

    /// True for the base schema and every schema derived from it.
    pub fn derives_from_base(&self) -> bool {
        match &self.origin {
            Origin::Base => true,
            Origin::Derived(parent) => parent.derives_from_base(),
            Origin::Standalone => false,
        }
    }

    /// True when `ancestor` is this schema or one of its parents.
    pub fn derives_from(&self, ancestor: &EventSchema) -> bool {
        if self == ancestor {
            return true;
        }
        self.parent()
            .map(|parent| parent.derives_from(ancestor))
            .unwrap_or(false)
    }

    /// Reject schemas that cannot describe an event record.
    pub fn ensure_event_schema(&self) -> Result<()> {
        if self.derives_from_base() {
            Ok(())
        } else {
            Err(EventItError::InvalidArgument(format!(
                "schema `{}` does not derive from `{BASE_SCHEMA_NAME}`",
                self.name
            )))
        }
    }

    /// Look up a declared field, own fields first, then the parents.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find(|spec| spec.name == name)
            .or_else(|| self.parent().and_then(|parent| parent.field(name)))
    }

    pub fn declares(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// All declared fields, inherited ones first.
    pub fn fields(&self) -> Vec<&FieldSpec> {
        let mut all = self
            .parent()
            .map(|parent| parent.fields())
            .unwrap_or_default();
        all.extend(self.fields.iter());
        all
    }

    /// Fields declared by this schema itself.
    pub fn own_fields(&self) -> &[FieldSpec] {
        &self.fields
    }
}

/// Collects field declarations for a new [`EventSchema`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    name: String,
    origin: Origin,
    fields: Vec<FieldSpec>,
}

impl SchemaBuilder {
    pub fn required(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.push(name.into(), kind, true, None)
    }

    pub fn optional(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.push(name.into(), kind, false, None)
    }

    /// Optional field that takes `value` when the event does not set it.
    pub fn with_default(
        self,
        name: impl Into<String>,
        kind: FieldKind,
        value: impl Into<Value>,
    ) -> Self {
        self.push(name.into(), kind, false, Some(value.into()))
    }

    fn push(mut self, name: String, kind: FieldKind, required: bool, default: Option<Value>) -> Self {
        self.fields.push(FieldSpec {
            name,
            kind,
            required,
            default,
        });
        self
    }

    pub fn build(self) -> Result<Arc<EventSchema>> {
        if self.name.trim().is_empty() {
            return Err(EventItError::InvalidArgument(
                "schema name must not be empty".into(),
            ));
        }
        let parent = match &self.origin {
            Origin::Derived(parent) => Some(parent),
            Origin::Base | Origin::Standalone => None,
        };
        let mut fields = Vec::with_capacity(self.fields.len());
        for mut spec in self.fields {
            if !is_identifier(&spec.name) {
                return Err(EventItError::InvalidArgument(format!(
                    "field name `{}` in schema `{}` is not an identifier",
                    spec.name, self.name
                )));
            }
            if parent.map(|p| p.declares(&spec.name)).unwrap_or(false) {
                return Err(EventItError::InvalidArgument(format!(
                    "schema `{}` redeclares inherited field `{}`",
                    self.name, spec.name
                )));
            }
            if fields.iter().any(|f: &FieldSpec| f.name == spec.name) {
                return Err(EventItError::InvalidArgument(format!(
                    "schema `{}` declares field `{}` twice",
                    self.name, spec.name
                )));
            }
            if let Some(default) = spec.default.take() {
                let normalized = spec.kind.normalize(&default).map_err(|reason| {
                    EventItError::InvalidArgument(format!(
                        "default for `{}` in schema `{}`: {reason}",
                        spec.name, self.name
                    ))
                })?;
                spec.default = Some(normalized);
            }
            fields.push(spec);
        }
        Ok(Arc::new(EventSchema {
            name: self.name,
            origin: self.origin,
            fields,
        }))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
