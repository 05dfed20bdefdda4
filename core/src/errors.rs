use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventItError {
    #[error("Configuration error: {0}")] Config(String),
    #[error("Invalid argument: {0}")] InvalidArgument(String),
    #[error("Validation failed: {0}")] Validation(String),
    #[error("Metric not implemented: {0}")] MetricNotImplemented(String),
    #[error("Metric already registered: {0}")] MetricAlreadyRegistered(String),
    #[error("I/O error: {0}")] Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")] Serialization(#[from] serde_json::Error),
    #[error("Document store error: {0}")] Store(String),
}

pub type Result<T> = std::result::Result<T, EventItError>;

impl EventItError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CFG-1001",
            Self::InvalidArgument(_) => "ARG-1001",
            Self::Validation(_) => "VAL-1001",
            Self::MetricNotImplemented(_) => "MET-1001",
            Self::MetricAlreadyRegistered(_) => "MET-1002",
            Self::Io(_) => "IO-1001",
            Self::Serialization(_) => "SER-1001",
            Self::Store(_) => "DOC-1001",
        }
    }
    pub fn explain(&self) -> &'static str {
        match self {
            Self::Config(_) => "The event logger or one of its backends could not be set up.",
            Self::InvalidArgument(_) => "The call referenced an unknown group, field or schema.",
            Self::Validation(_) => "The event fields do not satisfy the event schema.",
            Self::MetricNotImplemented(_) => "No built-in or custom metric exists under that name.",
            Self::MetricAlreadyRegistered(_) => "The metric name is reserved or already registered.",
            Self::Io(_) => "Reading or writing an event log file failed.",
            Self::Serialization(_) => "An event could not be encoded to or decoded from JSON.",
            Self::Store(_) => "The document store rejected or failed the request.",
        }
    }
}

impl From<rusqlite::Error> for EventItError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<r2d2::Error> for EventItError {
    fn from(err: r2d2::Error) -> Self {
        Self::Store(err.to_string())
    }
}
