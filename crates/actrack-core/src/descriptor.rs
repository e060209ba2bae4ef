//! Pending action descriptors and the normalization of logged fields.
//!
//! `log()` callers hand over an open list of `(key, value)` pairs. The
//! boundary between the keys the tracker understands and the keys that end
//! up in the open `data` mapping is [`classify_field`].

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MAX_GROUPING_DELAY_SECS;
use crate::error::{ActrackError, Result};
use crate::types::{Attr, EntityRef, EntitySet, Level};
use crate::value::{merge_data, DataMap, DataValue, Scalar};

// =============================================================================
// ActionDescriptor
// =============================================================================

/// An action that has been logged but not persisted yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub actor: EntityRef,
    pub verb: String,
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub targets: EntitySet,
    pub related: EntitySet,
    pub data: DataMap,
    /// Per-call grouping window override, in seconds. Negative disables.
    pub grouping_delay: Option<i64>,
    /// `false` opts this action out of grouping entirely.
    pub can_group: bool,
}

impl ActionDescriptor {
    pub fn new(actor: EntityRef, verb: impl Into<String>, timestamp: DateTime<Utc>, level: Level) -> Self {
        Self {
            actor,
            verb: verb.into(),
            timestamp,
            level,
            targets: EntitySet::new(),
            related: EntitySet::new(),
            data: DataMap::new(),
            grouping_delay: None,
            can_group: true,
        }
    }

    pub fn many_valued(&self, attr: Attr) -> &EntitySet {
        match attr {
            Attr::Targets => &self.targets,
            Attr::Related => &self.related,
        }
    }

    pub fn many_valued_mut(&mut self, attr: Attr) -> &mut EntitySet {
        match attr {
            Attr::Targets => &mut self.targets,
            Attr::Related => &mut self.related,
        }
    }

    /// Fold `other` into this descriptor.
    ///
    /// Entity sets are unioned, `data` is merged without overwriting existing
    /// keys and the level becomes the higher of the two. Actor, verb and
    /// timestamp stay as they are.
    pub fn absorb(&mut self, other: &ActionDescriptor) {
        for attr in Attr::ALL {
            let theirs = other.many_valued(attr).iter().cloned();
            self.many_valued_mut(attr).extend(theirs);
        }
        merge_data(&mut self.data, &other.data);
        self.level = self.level.max(other.level);
    }
}

// =============================================================================
// Logged fields
// =============================================================================

/// A value passed to `log()` under some key.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Entity(EntityRef),
    Entities(Vec<EntityRef>),
    Time(DateTime<Utc>),
    Data(DataValue),
}

impl From<EntityRef> for FieldValue {
    fn from(v: EntityRef) -> Self {
        FieldValue::Entity(v)
    }
}

impl From<Vec<EntityRef>> for FieldValue {
    fn from(v: Vec<EntityRef>) -> Self {
        FieldValue::Entities(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Time(v)
    }
}

impl From<DataValue> for FieldValue {
    fn from(v: DataValue) -> Self {
        FieldValue::Data(v)
    }
}

/// Ordered `(key, value)` pairs handed to `log()`.
///
/// When a key appears several times the last occurrence wins.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogFields {
    entries: Vec<(String, FieldValue)>,
}

impl LogFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw field.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    pub fn targets<I: IntoIterator<Item = EntityRef>>(self, targets: I) -> Self {
        self.with("targets", FieldValue::Entities(targets.into_iter().collect()))
    }

    pub fn related<I: IntoIterator<Item = EntityRef>>(self, related: I) -> Self {
        self.with("related", FieldValue::Entities(related.into_iter().collect()))
    }

    pub fn timestamp(self, timestamp: DateTime<Utc>) -> Self {
        self.with("timestamp", FieldValue::Time(timestamp))
    }

    pub fn level(self, level: Level) -> Self {
        self.with("level", DataValue::int(level.0 as i64))
    }

    pub fn grouping_delay(self, seconds: i64) -> Self {
        self.with("grouping_delay", DataValue::int(seconds))
    }

    pub fn can_group(self, can_group: bool) -> Self {
        self.with("can_group", DataValue::from(can_group))
    }

    pub fn data(self, key: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.with(key, FieldValue::Data(value.into()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// How a logged key is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Actor,
    Verb,
    Timestamp,
    Level,
    ManyValued(Attr),
    GroupingDelay,
    CanGroup,
    /// Dispatch plumbing that never reaches the action.
    Ignored,
    /// Anything else lands in the open `data` mapping.
    Data,
}

/// Classify a logged key.
pub fn classify_field(key: &str) -> FieldKind {
    match key {
        "actor" | "sender" => FieldKind::Actor,
        "verb" => FieldKind::Verb,
        "timestamp" => FieldKind::Timestamp,
        "level" => FieldKind::Level,
        "grouping_delay" => FieldKind::GroupingDelay,
        "can_group" => FieldKind::CanGroup,
        "signal" => FieldKind::Ignored,
        other => match other.parse::<Attr>() {
            Ok(attr) => FieldKind::ManyValued(attr),
            Err(_) => FieldKind::Data,
        },
    }
}

/// Build a descriptor from the arguments of a `log()` call.
///
/// `now` is used when no timestamp is given, `default_level` when no level is.
/// A level may be given as an integer or as a name, looked up with
/// `resolve_level`. Timestamps are truncated to milliseconds, the precision
/// actions are stored with.
pub fn normalize(
    actor: EntityRef,
    verb: &str,
    fields: &LogFields,
    now: DateTime<Utc>,
    default_level: Level,
    resolve_level: &dyn Fn(&str) -> Result<Level>,
) -> Result<ActionDescriptor> {
    let mut descriptor = ActionDescriptor::new(actor, verb, now, default_level);

    for (key, value) in fields.iter() {
        match classify_field(key) {
            FieldKind::Actor => match value {
                FieldValue::Entity(e) if *e == descriptor.actor => {}
                _ => {
                    return Err(ActrackError::invalid_field(
                        key,
                        "conflicts with the actor passed to log()",
                    ))
                }
            },
            FieldKind::Verb => match value {
                FieldValue::Data(v) if v.as_text() == Some(verb) => {}
                _ => {
                    return Err(ActrackError::invalid_field(
                        key,
                        "conflicts with the verb passed to log()",
                    ))
                }
            },
            FieldKind::Timestamp => match value {
                FieldValue::Time(ts) => descriptor.timestamp = *ts,
                _ => return Err(ActrackError::invalid_field(key, "expected a timestamp")),
            },
            FieldKind::Level => descriptor.level = parse_level(key, value, resolve_level)?,
            FieldKind::ManyValued(attr) => {
                *descriptor.many_valued_mut(attr) = match value {
                    FieldValue::Entity(e) => std::iter::once(e.clone()).collect(),
                    FieldValue::Entities(list) => list.iter().cloned().collect(),
                    FieldValue::Data(DataValue::Scalar(Scalar::Null)) => EntitySet::new(),
                    _ => return Err(ActrackError::invalid_field(key, "expected entities")),
                };
            }
            FieldKind::GroupingDelay => match value {
                FieldValue::Data(v) if v.as_int().is_some() => match v.as_int() {
                    Some(seconds) if seconds > MAX_GROUPING_DELAY_SECS => {
                        return Err(ActrackError::invalid_field(
                            key,
                            format!("at most {} seconds", MAX_GROUPING_DELAY_SECS),
                        ))
                    }
                    seconds => descriptor.grouping_delay = seconds,
                },
                _ => {
                    return Err(ActrackError::invalid_field(
                        key,
                        "expected a number of seconds",
                    ))
                }
            },
            FieldKind::CanGroup => match value {
                FieldValue::Data(v) if v.as_bool().is_some() => {
                    descriptor.can_group = v.as_bool().unwrap_or(true)
                }
                _ => return Err(ActrackError::invalid_field(key, "expected a boolean")),
            },
            FieldKind::Ignored => {}
            FieldKind::Data => match value {
                FieldValue::Data(v) => {
                    descriptor.data.insert(key.to_string(), v.clone());
                }
                _ => {
                    return Err(ActrackError::invalid_field(
                        key,
                        "extra fields must be data values",
                    ))
                }
            },
        }
    }

    descriptor.timestamp = descriptor.timestamp.trunc_subsecs(3);
    Ok(descriptor)
}

fn parse_level(
    key: &str,
    value: &FieldValue,
    resolve_level: &dyn Fn(&str) -> Result<Level>,
) -> Result<Level> {
    match value {
        FieldValue::Data(v) => {
            if let Some(n) = v.as_int() {
                let n = i32::try_from(n)
                    .map_err(|_| ActrackError::invalid_field(key, "level out of range"))?;
                return Ok(Level(n));
            }
            if let Some(name) = v.as_text() {
                return resolve_level(name)
                    .map_err(|e| ActrackError::invalid_field(key, e.to_string()));
            }
            Err(ActrackError::invalid_field(key, "expected a level"))
        }
        _ => Err(ActrackError::invalid_field(key, "expected a level")),
    }
}
