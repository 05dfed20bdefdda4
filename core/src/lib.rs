//! Core library for eventit: structured, schema-checked usage events.
//!
//! The modules map onto the path an event takes:
//! - [`metrics`] evaluates named metrics (built-in and custom) for a call.
//! - [`events`] defines the event record and the schemas it is checked against.
//! - [`logger`] assembles events and hands them to a backend.
//! - [`instrument`] wraps functions so every call is logged first.
//! - [`backends`] persists events per group, as JSON Lines files or documents.
//! - [`store`] is the document store behind the document backend.
//! - [`config`] selects and lays out the backend.
//! - [`errors`] keeps the error catalogue with codes and explanations.

pub mod backends;
pub mod config;
pub mod errors;
pub mod events;
pub mod instrument;
pub mod logger;
pub mod metrics;
pub mod store;

pub use backends::{Backend, EventBackend, Query};
pub use config::EventItConfig;
pub use errors::{EventItError, Result};
pub use events::{Event, EventSchema, FieldKind};
pub use instrument::{Callable, EventDecorator, Instrumented};
pub use logger::{EventLogger, EventOptions, TrackingDetails};
pub use metrics::{FunctionRef, MetricContext};
