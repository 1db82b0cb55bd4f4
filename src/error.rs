//! Error types for keyweave.
//!
//! Configuration failures and action failures are kept apart: a `ConfigError` is fatal
//! at startup but only logged during a hot reload, while an `ActionError` never leaves
//! the background task that produced it.

use std::io;
use thiserror::Error;

/// Failure to read or parse the configuration document.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be opened or read.
    #[error("failed to read config from '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The config file is not a valid config document.
    #[error("failed to parse config from '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// An in-memory document could not be parsed.
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    /// Create a new Read error.
    pub fn read(path: impl Into<String>, source: io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// Create a new Parse error.
    pub fn parse(path: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Parse {
            path: path.into(),
            source,
        }
    }
}

/// Failure while executing a macro action.
#[derive(Error, Debug)]
pub enum ActionError {
    /// The key name does not map to a key the input backend can synthesize.
    #[error("unknown key '{0}'")]
    UnknownKey(String),

    /// A macro is missing the field its type needs.
    #[error("macro '{name}' has no '{field}'")]
    MissingField { name: String, field: &'static str },

    /// The input backend could not be initialized.
    #[error("input backend unavailable: {0}")]
    Connection(#[from] enigo::NewConError),

    /// The input backend rejected a synthetic event.
    #[error("synthetic input rejected: {0}")]
    Input(#[from] enigo::InputError),
}

impl ActionError {
    /// Create a new MissingField error.
    pub fn missing_field(name: impl Into<String>, field: &'static str) -> Self {
        Self::MissingField {
            name: name.into(),
            field,
        }
    }
}
