use thiserror::Error;

/// Top-level error type for the activity tracker.
///
/// Subsystem crates map their backend errors (rusqlite, toml, serde_json)
/// into one of these variants at the crate boundary so that `?` works
/// across crates.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ActrackError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Cannot infer the database to use: {0}. Pass an explicit database alias")]
    AmbiguousDatabase(String),

    #[error("Unknown database alias: {0}")]
    UnknownDatabase(String),

    #[error("Entity is not a user: {0}")]
    NotAUser(String),

    #[error("Unknown level: {0}")]
    UnknownLevel(String),
}

impl ActrackError {
    /// Shorthand for an [`ActrackError::InvalidField`].
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ActrackError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<toml::de::Error> for ActrackError {
    fn from(err: toml::de::Error) -> Self {
        ActrackError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ActrackError {
    fn from(err: toml::ser::Error) -> Self {
        ActrackError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ActrackError {
    fn from(err: serde_json::Error) -> Self {
        ActrackError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for activity tracker operations.
pub type Result<T> = std::result::Result<T, ActrackError>;
