use rand::Rng;
use serde::{Deserialize, Serialize};
use time::macros::datetime;
use time::{Duration, PrimitiveDateTime};

use crate::schema::{EventType, SchemaRegistry};
use crate::{format_timestamp, FunnelError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub user_id: u64,
    pub event_type: EventType,
    #[serde(with = "crate::timestamp_serde")]
    pub timestamp: PrimitiveDateTime,
    pub source: Option<String>,
    pub browser: Option<String>,
    pub amount: Option<f64>,
    pub pages_viewed: Option<i64>,
    pub call_successful: Option<u8>,
}

impl Event {
    /// Renders the timestamp in its stored `YYYY-MM-DD HH:MM:SS` form.
    ///
    /// # Errors
    /// Returns [`FunnelError::InvalidArgument`] when formatting fails.
    pub fn timestamp_text(&self) -> Result<String, FunnelError> {
        format_timestamp(self.timestamp)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEvent {
    pub event_id: i64,
    #[serde(flatten)]
    pub event: Event,
}

/// Half-open `[start, end)` window event timestamps are drawn from.
#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
pub struct TimeWindow {
    #[serde(with = "crate::timestamp_serde")]
    start: PrimitiveDateTime,
    #[serde(with = "crate::timestamp_serde")]
    end: PrimitiveDateTime,
}

impl TimeWindow {
    /// # Errors
    /// Returns [`FunnelError::Configuration`] when `end` is not after `start`.
    pub fn new(start: PrimitiveDateTime, end: PrimitiveDateTime) -> Result<Self, FunnelError> {
        if end <= start {
            return Err(FunnelError::Configuration(format!(
                "time window end ({end}) MUST be after start ({start})"
            )));
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub fn start(&self) -> PrimitiveDateTime {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> PrimitiveDateTime {
        self.end
    }

    #[must_use]
    pub fn contains(&self, value: PrimitiveDateTime) -> bool {
        self.start <= value && value < self.end
    }

    /// Picks a whole-second instant in the window.
    ///
    /// # Errors
    /// Returns [`FunnelError::InvalidState`] if the offset cannot be applied.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<PrimitiveDateTime, FunnelError> {
        let span = (self.end - self.start).whole_seconds();
        if span <= 0 {
            return Ok(self.start);
        }
        let offset = rng.random_range(0..span);
        self.start
            .checked_add(Duration::seconds(offset))
            .ok_or_else(|| FunnelError::InvalidState(format!("timestamp offset {offset}s overflows")))
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self {
            start: datetime!(2024-01-01 00:00:00),
            end: datetime!(2024-01-31 00:00:00),
        }
    }
}

/// Materializes events from the registered schemas.
#[derive(Debug, Clone, Default)]
pub struct EventBuilder {
    registry: SchemaRegistry,
    window: TimeWindow,
}

impl EventBuilder {
    #[must_use]
    pub fn new(registry: SchemaRegistry, window: TimeWindow) -> Self {
        Self { registry, window }
    }

    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    #[must_use]
    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// Builds one event for `user_id` with the attributes registered for `event_type`.
    ///
    /// # Errors
    /// Returns [`FunnelError::InvalidArgument`] when `user_id` is zero or
    /// `event_type` has no registered schema.
    pub fn build<R: Rng + ?Sized>(
        &self,
        user_id: u64,
        event_type: EventType,
        rng: &mut R,
    ) -> Result<Event, FunnelError> {
        if user_id == 0 {
            return Err(FunnelError::InvalidArgument(
                "user_id MUST be >= 1".to_string(),
            ));
        }

        let schema = self.registry.get(event_type).ok_or_else(|| {
            FunnelError::InvalidArgument(format!("no schema registered for event_type {event_type}"))
        })?;

        let timestamp = self.window.sample(rng)?;
        let attributes = schema.sample(rng)?;

        Ok(Event {
            user_id,
            event_type,
            timestamp,
            source: attributes.source,
            browser: attributes.browser,
            amount: attributes.amount,
            pages_viewed: attributes.pages_viewed,
            call_successful: attributes.call_successful,
        })
    }
}
