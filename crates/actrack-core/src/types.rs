use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ActrackError, Result};

// =============================================================================
// Entity references
// =============================================================================

/// Polymorphic reference to an application entity.
///
/// `kind` identifies the entity type (e.g. `"app.project"`), `id` its primary
/// key. A reference with no `id` designates the kind itself, which lets a
/// tracker follow every entity of a model.
///
/// `db` is the alias of the database the entity was loaded from. It is a
/// routing hint only and takes no part in equality, ordering or hashing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: String,
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db: Option<String>,
}

impl EntityRef {
    /// Reference to a single entity.
    pub fn new(kind: impl Into<String>, id: impl ToString) -> Self {
        Self {
            kind: kind.into(),
            id: Some(id.to_string()),
            db: None,
        }
    }

    /// Reference to a whole kind of entities.
    pub fn kind_only(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
            db: None,
        }
    }

    /// Attach the database alias the entity lives in.
    pub fn in_db(mut self, alias: impl Into<String>) -> Self {
        self.db = Some(alias.into());
        self
    }

    pub fn is_kind_only(&self) -> bool {
        self.id.is_none()
    }

    fn key(&self) -> (&str, Option<&str>) {
        (self.kind.as_str(), self.id.as_deref())
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for EntityRef {}

impl PartialOrd for EntityRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EntityRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Hash for EntityRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{}", self.kind, id),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// A set of entity references, as held by a many-valued attribute.
pub type EntitySet = BTreeSet<EntityRef>;

// =============================================================================
// Many-valued attributes
// =============================================================================

/// The many-valued attributes of an action.
///
/// Every algorithm that compares or merges entity sets iterates over
/// [`Attr::ALL`], so a new attribute only needs a variant here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attr {
    Targets,
    Related,
}

impl Attr {
    pub const ALL: [Attr; 2] = [Attr::Targets, Attr::Related];

    pub fn as_str(&self) -> &'static str {
        match self {
            Attr::Targets => "targets",
            Attr::Related => "related",
        }
    }
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Attr {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "targets" => Ok(Attr::Targets),
            "related" => Ok(Attr::Related),
            _ => Err(format!("Unknown attribute: {}", s)),
        }
    }
}

// =============================================================================
// Levels
// =============================================================================

/// Severity of an action. Higher is more severe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Level(pub i32);

impl Level {
    pub const NULL: Level = Level(0);
    pub const DEBUG: Level = Level(10);
    pub const HIDDEN: Level = Level(20);
    pub const INFO: Level = Level(30);
    pub const WARNING: Level = Level(40);
    pub const ERROR: Level = Level(50);

    /// The built-in named levels.
    pub const NAMED: [(&'static str, Level); 6] = [
        ("NULL", Level::NULL),
        ("DEBUG", Level::DEBUG),
        ("HIDDEN", Level::HIDDEN),
        ("INFO", Level::INFO),
        ("WARNING", Level::WARNING),
        ("ERROR", Level::ERROR),
    ];

    /// Look up a built-in level by name (case-insensitive).
    pub fn from_name(name: &str) -> Result<Level> {
        let upper = name.to_ascii_uppercase();
        Level::NAMED
            .iter()
            .find(|(n, _)| *n == upper)
            .map(|(_, l)| *l)
            .ok_or_else(|| ActrackError::UnknownLevel(name.to_string()))
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Level::NAMED.iter().find(|(_, l)| l == self) {
            Some((name, _)) => f.write_str(name),
            None => write!(f, "{}", self.0),
        }
    }
}

// =============================================================================
// Identifiers
// =============================================================================

/// Identity of a persisted action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub Uuid);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of a tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackerId(pub Uuid);

impl TrackerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TrackerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Tests
// =============================================================================
