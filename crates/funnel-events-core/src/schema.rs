use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::FunnelError;

pub const SOURCES: &[&str] = &["Яндекс", "Гугл", "Фейсбук"];
pub const BROWSERS: &[&str] = &["Мобильный", "Планшет", "Десктоп"];

const AMOUNT_RANGE: (i64, i64) = (10_000, 1_000_000);
const PAGES_VIEWED_RANGE: (i64, i64) = (1, 100);

/// Ordinal step of the funnel. Lower values must be recorded before higher ones.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct EventType(pub u8);

impl EventType {
    #[must_use]
    pub fn get(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventField {
    Source,
    Browser,
    Amount,
    PagesViewed,
    CallSuccessful,
}

impl EventField {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Browser => "browser",
            Self::Amount => "amount",
            Self::PagesViewed => "pages_viewed",
            Self::CallSuccessful => "call_successful",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Attribute,
    Metric,
}

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SamplingRule {
    /// Uniform pick from a fixed vocabulary.
    Choice(&'static [&'static str]),
    /// Uniform integer in `[min, max]`.
    IntRange { min: i64, max: i64 },
    /// Uniform pick from `{0, 1}`.
    Flag,
}

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
pub struct FieldRule {
    pub field: EventField,
    pub kind: FieldKind,
    pub rule: SamplingRule,
}

impl FieldRule {
    fn check(&self, event_type: EventType) -> Result<(), FunnelError> {
        let compatible = match (self.field, self.rule) {
            (EventField::Source | EventField::Browser, SamplingRule::Choice(values)) => {
                !values.is_empty()
            }
            (EventField::Amount | EventField::PagesViewed, SamplingRule::IntRange { min, max }) => {
                min <= max
            }
            (EventField::CallSuccessful, SamplingRule::Flag) => true,
            _ => false,
        };

        if compatible {
            Ok(())
        } else {
            Err(FunnelError::Configuration(format!(
                "event_type {event_type}: rule {:?} is not valid for field {}",
                self.rule,
                self.field.as_str()
            )))
        }
    }
}

/// Values sampled for one event. Fields outside the event type's schema stay `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Attributes {
    pub source: Option<String>,
    pub browser: Option<String>,
    pub amount: Option<f64>,
    pub pages_viewed: Option<i64>,
    pub call_successful: Option<u8>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EventSchema {
    pub event_type: EventType,
    pub fields: Vec<FieldRule>,
}

impl EventSchema {
    #[must_use]
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn attribute(mut self, field: EventField, rule: SamplingRule) -> Self {
        self.fields.push(FieldRule {
            field,
            kind: FieldKind::Attribute,
            rule,
        });
        self
    }

    #[must_use]
    pub fn metric(mut self, field: EventField, rule: SamplingRule) -> Self {
        self.fields.push(FieldRule {
            field,
            kind: FieldKind::Metric,
            rule,
        });
        self
    }

    /// Validates that every rule fits its field and no field repeats.
    ///
    /// # Errors
    /// Returns [`FunnelError::Configuration`] on the first offending rule.
    pub fn validate(&self) -> Result<(), FunnelError> {
        let mut seen = BTreeSet::new();
        for rule in &self.fields {
            rule.check(self.event_type)?;
            if !seen.insert(rule.field) {
                return Err(FunnelError::Configuration(format!(
                    "event_type {}: field {} declared twice",
                    self.event_type,
                    rule.field.as_str()
                )));
            }
        }
        Ok(())
    }

    /// Draws a value for every field in the schema.
    ///
    /// # Errors
    /// Returns [`FunnelError::Configuration`] when a rule does not fit its field.
    #[allow(clippy::cast_precision_loss)]
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Attributes, FunnelError> {
        let mut attributes = Attributes::default();

        for rule in &self.fields {
            rule.check(self.event_type)?;
            match (rule.field, rule.rule) {
                (EventField::Source, SamplingRule::Choice(values)) => {
                    attributes.source = Some(pick(values, rng).to_string());
                }
                (EventField::Browser, SamplingRule::Choice(values)) => {
                    attributes.browser = Some(pick(values, rng).to_string());
                }
                (EventField::Amount, SamplingRule::IntRange { min, max }) => {
                    attributes.amount = Some(rng.random_range(min..=max) as f64);
                }
                (EventField::PagesViewed, SamplingRule::IntRange { min, max }) => {
                    attributes.pages_viewed = Some(rng.random_range(min..=max));
                }
                (EventField::CallSuccessful, SamplingRule::Flag) => {
                    attributes.call_successful = Some(rng.random_range(0..=1_u8));
                }
                _ => {
                    return Err(FunnelError::Configuration(format!(
                        "event_type {}: unsupported rule for {}",
                        self.event_type,
                        rule.field.as_str()
                    )))
                }
            }
        }

        Ok(attributes)
    }
}

// Callers guarantee a non-empty vocabulary through `FieldRule::check`.
fn pick<R: Rng + ?Sized>(values: &'static [&'static str], rng: &mut R) -> &'static str {
    let index = rng.random_range(0..values.len());
    values.get(index).copied().unwrap_or_default()
}

/// Static EventType → schema table. Event types always form a contiguous range.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaRegistry {
    schemas: BTreeMap<EventType, EventSchema>,
    min: EventType,
    max: EventType,
}

impl SchemaRegistry {
    /// Builds a registry from explicit schemas.
    ///
    /// # Errors
    /// Returns [`FunnelError::Configuration`] when the set is empty, an event
    /// type repeats, the types leave a gap, or a schema is invalid.
    pub fn new(schemas: impl IntoIterator<Item = EventSchema>) -> Result<Self, FunnelError> {
        let mut map = BTreeMap::new();
        for schema in schemas {
            schema.validate()?;
            let event_type = schema.event_type;
            if map.insert(event_type, schema).is_some() {
                return Err(FunnelError::Configuration(format!(
                    "event_type {event_type} registered twice"
                )));
            }
        }

        let (Some(min), Some(max)) = (map.keys().next().copied(), map.keys().last().copied())
        else {
            return Err(FunnelError::Configuration(
                "at least one event type MUST be registered".to_string(),
            ));
        };

        let expected = usize::from(max.get() - min.get()) + 1;
        if map.len() != expected {
            return Err(FunnelError::Configuration(format!(
                "event types MUST be contiguous; found {} types in range {min}..={max}",
                map.len()
            )));
        }

        Ok(Self {
            schemas: map,
            min,
            max,
        })
    }

    /// The view → click → purchase → confirm funnel.
    #[must_use]
    pub fn default_funnel() -> Self {
        let schemas = default_schemas();
        let min = EventType(1);
        let max = EventType(4);
        Self {
            schemas: schemas
                .into_iter()
                .map(|schema| (schema.event_type, schema))
                .collect(),
            min,
            max,
        }
    }

    #[must_use]
    pub fn min_type(&self) -> EventType {
        self.min
    }

    #[must_use]
    pub fn max_type(&self) -> EventType {
        self.max
    }

    #[must_use]
    pub fn contains(&self, event_type: EventType) -> bool {
        self.schemas.contains_key(&event_type)
    }

    #[must_use]
    pub fn get(&self, event_type: EventType) -> Option<&EventSchema> {
        self.schemas.get(&event_type)
    }

    pub fn event_types(&self) -> impl Iterator<Item = EventType> + '_ {
        self.schemas.keys().copied()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::default_funnel()
    }
}

fn default_schemas() -> Vec<EventSchema> {
    let (amount_min, amount_max) = AMOUNT_RANGE;
    let (pages_min, pages_max) = PAGES_VIEWED_RANGE;

    vec![
        EventSchema::new(EventType(1))
            .attribute(EventField::Source, SamplingRule::Choice(SOURCES))
            .attribute(EventField::Browser, SamplingRule::Choice(BROWSERS))
            .metric(
                EventField::PagesViewed,
                SamplingRule::IntRange {
                    min: pages_min,
                    max: pages_max,
                },
            ),
        EventSchema::new(EventType(2))
            .attribute(EventField::Source, SamplingRule::Choice(SOURCES))
            .metric(EventField::CallSuccessful, SamplingRule::Flag),
        EventSchema::new(EventType(3))
            .attribute(EventField::Source, SamplingRule::Choice(SOURCES))
            .attribute(
                EventField::Amount,
                SamplingRule::IntRange {
                    min: amount_min,
                    max: amount_max,
                },
            ),
        EventSchema::new(EventType(4)),
    ]
}
