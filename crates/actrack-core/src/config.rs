use std::collections::BTreeMap;
use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ActrackError, Result};
use crate::types::Level;

/// Largest accepted grouping delay, one century.
pub const MAX_GROUPING_DELAY_SECS: i64 = 100 * 365 * 24 * 3600;

/// Top-level configuration for the activity tracker.
///
/// Usually loaded from an `actrack.toml` file. Every section falls back to
/// its defaults when missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActrackConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub grouping: GroupingConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub levels: LevelsConfig,
}

impl ActrackConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ActrackConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Check that every level name used by the configuration resolves.
    pub fn validate(&self) -> Result<()> {
        self.default_level()?;
        self.readable_level()?;
        if self.grouping.grouping_delay_secs > MAX_GROUPING_DELAY_SECS {
            return Err(ActrackError::Config(format!(
                "grouping_delay_secs {} exceeds the maximum of {}",
                self.grouping.grouping_delay_secs, MAX_GROUPING_DELAY_SECS
            )));
        }
        Ok(())
    }

    /// Resolve a level name against the built-in and custom levels.
    pub fn resolve_level(&self, name: &str) -> Result<Level> {
        if let Some(value) = self.levels.custom.get(name) {
            return Ok(Level(*value));
        }
        Level::from_name(name)
            .map_err(|_| ActrackError::Config(format!("unknown level name '{}'", name)))
    }

    pub fn default_level(&self) -> Result<Level> {
        self.resolve_level(&self.levels.default_level)
    }

    pub fn readable_level(&self) -> Result<Level> {
        self.resolve_level(&self.levels.readable_level)
    }

    pub fn grouping_window(&self) -> GroupingWindow {
        GroupingWindow::from_delay(self.grouping.grouping_delay_secs)
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Entity kind identifying users (feed, owned trackers, unread state).
    pub user_kind: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            user_kind: "auth.user".to_string(),
        }
    }
}

/// Action grouping settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingConfig {
    /// Window in seconds. Negative disables grouping, 0 groups within the
    /// flushed queue only, positive also groups with stored actions.
    pub grouping_delay_secs: i64,
    /// Verb of a registered handler used for unregistered verbs.
    pub default_handler: Option<String>,
}

/// Tracker and unread-state settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Collect unread actions for tracker owners.
    pub track_unread: bool,
    /// Mark actions read when they are displayed.
    pub auto_read: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            track_unread: true,
            auto_read: true,
        }
    }
}

/// Severity levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelsConfig {
    /// Level of actions whose handler declares none.
    pub default_level: String,
    /// Minimum level for an action to be marked unread.
    pub readable_level: String,
    /// Additional named levels.
    pub custom: BTreeMap<String, i32>,
}

impl Default for LevelsConfig {
    fn default() -> Self {
        Self {
            default_level: "INFO".to_string(),
            readable_level: "INFO".to_string(),
            custom: BTreeMap::new(),
        }
    }
}

/// How far back in time an action may be grouped with similar ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupingWindow {
    /// Never group; every action becomes a new record.
    Disabled,
    /// Group with similar actions of the same flush, regardless of time.
    QueueOnly,
    /// Group with flushed and stored actions at most this far apart.
    Within(Duration),
}

impl GroupingWindow {
    pub fn from_delay(seconds: i64) -> Self {
        match seconds {
            s if s < 0 => GroupingWindow::Disabled,
            0 => GroupingWindow::QueueOnly,
            s => Duration::try_seconds(s.min(MAX_GROUPING_DELAY_SECS))
                .map_or(GroupingWindow::Disabled, GroupingWindow::Within),
        }
    }
}
