use std::collections::BTreeSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventBuilder, StoredEvent};
use crate::schema::{EventType, SchemaRegistry};
use crate::FunnelError;

/// Append-only event persistence the progression engine reads from and writes to.
///
/// Implementations do not deduplicate; the engine never saves an event type a
/// user already has.
pub trait EventStore {
    /// Appends one event and returns its store-assigned id.
    ///
    /// # Errors
    /// Returns [`FunnelError::Storage`] when the write cannot complete.
    fn save(&mut self, event: &Event) -> Result<i64, FunnelError>;

    /// Returns every event type recorded for `user_id`.
    ///
    /// # Errors
    /// Returns [`FunnelError::Storage`] when the read cannot complete.
    fn user_event_types(&self, user_id: u64) -> Result<BTreeSet<EventType>, FunnelError>;
}

/// Volatile store used by tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventStore {
    events: Vec<StoredEvent>,
}

impl MemoryEventStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events in insertion order.
    #[must_use]
    pub fn events(&self) -> &[StoredEvent] {
        &self.events
    }

    /// Events for one user in insertion order.
    pub fn user_events(&self, user_id: u64) -> impl Iterator<Item = &StoredEvent> {
        self.events
            .iter()
            .filter(move |stored| stored.event.user_id == user_id)
    }
}

impl EventStore for MemoryEventStore {
    fn save(&mut self, event: &Event) -> Result<i64, FunnelError> {
        let event_id = i64::try_from(self.events.len() + 1)
            .map_err(|_| FunnelError::Storage("event id space exhausted".to_string()))?;
        self.events.push(StoredEvent {
            event_id,
            event: event.clone(),
        });
        Ok(event_id)
    }

    fn user_event_types(&self, user_id: u64) -> Result<BTreeSet<EventType>, FunnelError> {
        Ok(self
            .user_events(user_id)
            .map(|stored| stored.event.event_type)
            .collect())
    }
}

/// Outcome of one progression call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progression {
    pub user_id: u64,
    /// Event types appended by this call, in emission order.
    pub emitted: Vec<EventType>,
    /// Whether the user has reached the last funnel step after this call.
    pub completed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchReport {
    pub users: u64,
    pub events_emitted: u64,
    pub completed_users: u64,
}

/// Event types to emit on a user's first progression when `chosen` was picked.
///
/// `chosen` comes first, then every lower registered type in ascending order,
/// skipping types already in `recorded`.
///
/// # Errors
/// Returns [`FunnelError::InvalidState`] when `chosen` is not registered.
pub fn plan_first_contact(
    registry: &SchemaRegistry,
    recorded: &BTreeSet<EventType>,
    chosen: EventType,
) -> Result<Vec<EventType>, FunnelError> {
    if !registry.contains(chosen) {
        return Err(FunnelError::InvalidState(format!(
            "event_type {chosen} is outside the configured range {}..={}",
            registry.min_type(),
            registry.max_type()
        )));
    }

    let mut plan = vec![chosen];
    plan.extend(
        registry
            .event_types()
            .take_while(|event_type| *event_type < chosen)
            .filter(|event_type| !recorded.contains(event_type)),
    );
    Ok(plan)
}

/// Decides which event types to emit for a user with `recorded` history.
///
/// # Errors
/// Returns [`FunnelError::InvalidState`] when `recorded` holds an unregistered
/// type or the next step falls outside the registry.
pub fn plan_progression<R: Rng + ?Sized>(
    registry: &SchemaRegistry,
    recorded: &BTreeSet<EventType>,
    rng: &mut R,
) -> Result<Vec<EventType>, FunnelError> {
    if let Some(unknown) = recorded.iter().find(|event_type| !registry.contains(**event_type)) {
        return Err(FunnelError::InvalidState(format!(
            "recorded event_type {unknown} is outside the configured range {}..={}",
            registry.min_type(),
            registry.max_type()
        )));
    }

    let Some(current_max) = recorded.last().copied() else {
        let chosen = EventType(
            rng.random_range(registry.min_type().get()..=registry.max_type().get()),
        );
        return plan_first_contact(registry, recorded, chosen);
    };

    if current_max >= registry.max_type() {
        return Ok(Vec::new());
    }

    match current_max.next() {
        Some(next) if registry.contains(next) => Ok(vec![next]),
        _ => Err(FunnelError::InvalidState(format!(
            "no registered event_type follows {current_max}"
        ))),
    }
}

/// Funnel Progression Engine plus the batch loop over a user population.
#[derive(Debug, Clone, Default)]
pub struct FunnelEngine {
    builder: EventBuilder,
}

impl FunnelEngine {
    #[must_use]
    pub fn new(builder: EventBuilder) -> Self {
        Self { builder }
    }

    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        self.builder.registry()
    }

    /// Reads the user's recorded event types and appends whatever the funnel
    /// requires next. Completed users are a successful no-op.
    ///
    /// # Errors
    /// Returns [`FunnelError::InvalidArgument`] for `user_id == 0`,
    /// [`FunnelError::InvalidState`] for out-of-range history, and propagates
    /// store failures.
    pub fn progress<S, R>(
        &self,
        store: &mut S,
        rng: &mut R,
        user_id: u64,
    ) -> Result<Progression, FunnelError>
    where
        S: EventStore + ?Sized,
        R: Rng + ?Sized,
    {
        if user_id == 0 {
            return Err(FunnelError::InvalidArgument(
                "user_id MUST be >= 1".to_string(),
            ));
        }

        let mut recorded = store.user_event_types(user_id)?;
        let plan = plan_progression(self.registry(), &recorded, rng)?;

        for event_type in &plan {
            let event = self.builder.build(user_id, *event_type, rng)?;
            let event_id = store.save(&event)?;
            recorded.insert(*event_type);
            tracing::trace!(user_id, event_type = event_type.get(), event_id, "event saved");
        }

        let completed = recorded.contains(&self.registry().max_type());
        tracing::debug!(
            user_id,
            emitted = plan.len(),
            completed,
            "user progressed"
        );

        Ok(Progression {
            user_id,
            emitted: plan,
            completed,
        })
    }

    /// Progresses users `1..=num_users` once each, in order. The first failure
    /// aborts the batch.
    ///
    /// # Errors
    /// Returns the first error raised by [`FunnelEngine::progress`].
    pub fn run_batch<S, R>(
        &self,
        store: &mut S,
        rng: &mut R,
        num_users: u64,
    ) -> Result<BatchReport, FunnelError>
    where
        S: EventStore + ?Sized,
        R: Rng + ?Sized,
    {
        let mut report = BatchReport {
            users: num_users,
            ..BatchReport::default()
        };

        for user_id in 1..=num_users {
            let progression = self.progress(store, rng, user_id).map_err(|err| {
                tracing::error!(user_id, error = %err, "progression failed; aborting batch");
                err
            })?;
            report.events_emitted += progression.emitted.len() as u64;
            if progression.completed {
                report.completed_users += 1;
            }
        }

        tracing::info!(
            users = report.users,
            events_emitted = report.events_emitted,
            completed_users = report.completed_users,
            "batch complete"
        );
        Ok(report)
    }
}
