//! Routing of actions and trackers to named databases.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use actrack_core::error::ActrackError;
use actrack_core::types::EntityRef;

/// Alias of the store used when nothing names another one.
pub const DEFAULT_ALIAS: &str = "default";

/// A default store plus stores registered under an alias.
#[derive(Debug, Clone)]
pub struct StoreRouter<S> {
    default: S,
    aliases: HashMap<String, S>,
}

impl<S> StoreRouter<S> {
    pub fn new(default: S) -> Self {
        Self {
            default,
            aliases: HashMap::new(),
        }
    }

    /// Register `store` under `alias`, replacing any previous one.
    pub fn with_alias(mut self, alias: impl Into<String>, store: S) -> Self {
        self.aliases.insert(alias.into(), store);
        self
    }

    pub fn default_store(&self) -> &S {
        &self.default
    }

    /// Store named by `alias`, or the default store for `None`.
    pub fn route(&self, alias: Option<&str>) -> Result<&S, ActrackError> {
        match alias {
            None | Some(DEFAULT_ALIAS) => Ok(&self.default),
            Some(name) => self
                .aliases
                .get(name)
                .ok_or_else(|| ActrackError::UnknownDatabase(name.to_string())),
        }
    }

    /// Store the actions of `actor` are written to.
    pub fn route_entity(&self, actor: &EntityRef) -> Result<&S, ActrackError> {
        self.route(actor.db.as_deref())
    }
}

/// Pick the database alias for an operation touching `hints`.
///
/// An explicit alias always wins. Otherwise the distinct hints carried by
/// the entities must agree: none selects the default database, more than
/// one is ambiguous.
pub fn resolve_db_alias<'a, I>(explicit: Option<&str>, hints: I) -> Result<Option<String>, ActrackError>
where
    I: IntoIterator<Item = &'a EntityRef>,
{
    if let Some(alias) = explicit {
        return Ok(Some(alias.to_string()));
    }

    let distinct: BTreeSet<&str> = hints
        .into_iter()
        .filter_map(|e| e.db.as_deref())
        .filter(|alias| !alias.is_empty())
        .collect();

    match distinct.len() {
        0 => Ok(None),
        1 => {
            let alias = distinct.into_iter().next().map(str::to_string);
            debug!(alias = ?alias, "Database inferred from entities");
            Ok(alias)
        }
        _ => Err(ActrackError::AmbiguousDatabase(
            distinct.into_iter().collect::<Vec<_>>().join(", "),
        )),
    }
}
