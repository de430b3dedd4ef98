mod event;
mod funnel;
mod schema;

pub use event::{Event, EventBuilder, StoredEvent, TimeWindow};
pub use funnel::{
    plan_first_contact, plan_progression, BatchReport, EventStore, FunnelEngine,
    MemoryEventStore, Progression,
};
pub use schema::{
    Attributes, EventField, EventSchema, EventType, FieldKind, FieldRule, SamplingRule,
    SchemaRegistry, BROWSERS, SOURCES,
};

use time::macros::format_description;
use time::PrimitiveDateTime;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum FunnelError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("export error: {0}")]
    Export(String),
}

/// Formats a timestamp as `YYYY-MM-DD HH:MM:SS`, the stored and exported form.
///
/// # Errors
/// Returns [`FunnelError::InvalidArgument`] when formatting fails.
pub fn format_timestamp(value: PrimitiveDateTime) -> Result<String, FunnelError> {
    value
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .map_err(|err| FunnelError::InvalidArgument(format!("failed to format timestamp: {err}")))
}

/// Parses a `YYYY-MM-DD HH:MM:SS` timestamp.
///
/// # Errors
/// Returns [`FunnelError::InvalidArgument`] when the input does not match the format.
pub fn parse_timestamp(value: &str) -> Result<PrimitiveDateTime, FunnelError> {
    PrimitiveDateTime::parse(
        value,
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    )
    .map_err(|err| FunnelError::InvalidArgument(format!("invalid timestamp {value:?}: {err}")))
}

pub(crate) mod timestamp_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::PrimitiveDateTime;

    pub fn serialize<S>(value: &PrimitiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let text = super::format_timestamp(*value).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<PrimitiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        super::parse_timestamp(&text).map_err(serde::de::Error::custom)
    }
}
