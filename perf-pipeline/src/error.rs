//! Error taxonomy for a query cycle.

use thiserror::Error;

/// Caller input that is missing or malformed. Raised before any query is
/// built, so nothing reaches the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("role code is required")]
    MissingRole,
    #[error("host address is required")]
    MissingHostAddress,
    #[error("item id is required")]
    MissingItemId,
    #[error("occurrence time is required")]
    MissingOccurrenceTime,
    #[error("{field} is required")]
    MissingTimestamp { field: &'static str },
    #[error("{field} is not a valid timestamp: {value:?}")]
    MalformedTimestamp { field: &'static str, value: String },
    #[error("{field} is outside the supported time range: {value}")]
    TimestampOutOfRange { field: &'static str, value: i64 },
    #[error("start time {start} must be earlier than end time {end}")]
    StartNotBeforeEnd { start: i64, end: i64 },
    #[error("end time {end} lies in the future (now {now})")]
    EndInFuture { end: i64, now: i64 },
    #[error("time span of {span_secs}s exceeds the {max_days}-day limit")]
    SpanTooLong { span_secs: i64, max_days: i64 },
    #[error("page size must be positive")]
    InvalidPageSize,
}

/// Failure reported by the search-engine collaborator.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("search request failed: {0}")]
    Network(String),
    #[error("search engine returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("search engine returned an unreadable body: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Top-level error of one query cycle.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A template is missing a slot the builder writes into. Deployment
    /// defect, never caused by user input.
    #[error("query template misconfigured: {0}")]
    Configuration(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no data: {0}")]
    DataShape(String),

    #[error("unsupported result type: {}", display_type(.0))]
    UnsupportedResultType(Option<i64>),
}

fn display_type(t: &Option<i64>) -> String {
    match t {
        Some(v) => v.to_string(),
        None => "missing".to_string(),
    }
}

impl PipelineError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        PipelineError::Configuration(msg.into())
    }

    pub fn data_shape(msg: impl Into<String>) -> Self {
        PipelineError::DataShape(msg.into())
    }

    /// True for faults the operator has to fix rather than the user.
    pub fn is_system_fault(&self) -> bool {
        matches!(self, PipelineError::Configuration(_))
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
