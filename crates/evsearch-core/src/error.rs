use chrono::{DateTime, Utc};
use std::fmt;

use crate::model::{EntityKind, EventType, RawEvent};
use crate::payload::PayloadError;

/// Machine-readable error codes for operators and schedulers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    StoreNotInitialized,
    SchemaTooNew,
    PayloadMalformed,
    TimestampUnparseable,
    DataSourceFailure,
    InternalUnexpected,
}

impl ErrorCode {
    /// All codes in catalog order.
    pub const ALL: [Self; 7] = [
        Self::ConfigParseError,
        Self::StoreNotInitialized,
        Self::SchemaTooNew,
        Self::PayloadMalformed,
        Self::TimestampUnparseable,
        Self::DataSourceFailure,
        Self::InternalUnexpected,
    ];

    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::StoreNotInitialized => "E1002",
            Self::SchemaTooNew => "E1003",
            Self::PayloadMalformed => "E2001",
            Self::TimestampUnparseable => "E2002",
            Self::DataSourceFailure => "E5001",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::StoreNotInitialized => "Event store not initialized",
            Self::SchemaTooNew => "Event store schema is newer than this binary",
            Self::PayloadMalformed => "Malformed deletion payload",
            Self::TimestampUnparseable => "Unparseable history timestamp",
            Self::DataSourceFailure => "Data source failure",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in evsearch.toml and retry."),
            Self::StoreNotInitialized => Some("Run `evsearch import` to create and seed the store."),
            Self::SchemaTooNew => Some("Upgrade evsearch to a release that knows this schema."),
            Self::PayloadMalformed | Self::TimestampUnparseable => {
                Some("Repair or remove the offending event; the next run resumes from the last persisted row.")
            }
            Self::DataSourceFailure => Some("Retry on the next scheduled run."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A raw event whose payload could not be decoded.
///
/// Aborts the batch the event belongs to.
#[derive(Debug, thiserror::Error)]
#[error("processing of {event_type} {entity_type} event {event_id} registered at {registered_at} failed: {source}")]
pub struct ProcessingError {
    pub event_id: i64,
    pub event_type: EventType,
    pub entity_type: EntityKind,
    pub registered_at: DateTime<Utc>,
    #[source]
    pub source: PayloadError,
}

impl ProcessingError {
    #[must_use]
    pub fn new(event: &RawEvent, source: PayloadError) -> Self {
        Self {
            event_id: event.id,
            event_type: event.event_type,
            entity_type: event.entity_type,
            registered_at: event.registration_timestamp,
            source,
        }
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self.source {
            PayloadError::Json(_) => ErrorCode::PayloadMalformed,
            PayloadError::Timestamp { .. } => ErrorCode::TimestampUnparseable,
        }
    }
}

/// The store was written by a newer release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("store schema version {found} is newer than {latest}")]
pub struct SchemaTooNew {
    pub found: u32,
    pub latest: u32,
}

/// Map an error chain onto the code reported to operators.
#[must_use]
pub fn classify(err: &anyhow::Error) -> ErrorCode {
    for cause in err.chain() {
        if let Some(processing) = cause.downcast_ref::<ProcessingError>() {
            return processing.code();
        }
        if cause.is::<SchemaTooNew>() {
            return ErrorCode::SchemaTooNew;
        }
        if cause.is::<toml::de::Error>() {
            return ErrorCode::ConfigParseError;
        }
        if cause.is::<rusqlite::Error>() {
            return ErrorCode::DataSourceFailure;
        }
    }
    ErrorCode::InternalUnexpected
}
