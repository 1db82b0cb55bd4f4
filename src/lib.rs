#![deny(unsafe_code)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! keyweave: per-application keyboard and mouse macros.
//!
//! The engine watches the foreground window, picks the profile bound to the owning
//! process, and runs the macros whose trigger keys are held. Most implementation
//! details live under the internal modules:
//! - `config`: Configuration models, loader, change detection and schema helpers.
//! - `dispatch`: The polling loop that selects a runner per foreground process.
//! - `executor`: Action primitives, user scripts and the per-profile macro runner.
//! - `utils`: Key state and foreground window probes.
//!
//! Use `keyweave::prelude::*` to bring commonly used items into scope quickly.

/// Public module: configuration (models, loader, schema helpers).
pub mod config;
/// Public module: dispatch loop.
pub mod dispatch;
/// Public module: error types.
pub mod error;
/// Public module: execution engine (actions, scripts, runners).
pub mod executor;
/// Public module: utilities (key state, foreground window).
pub mod utils;

/// Crate-level constants for consumers that want to inspect package metadata at runtime.
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate version (e.g., "0.1.0").
#[inline]
pub const fn version() -> &'static str {
    PKG_VERSION
}

/// Parse a log level name (trace|debug|info|warn|error).
pub fn parse_level(s: &str) -> Option<tracing::Level> {
    use tracing::Level;
    match s.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize tracing (logging) with a reasonable default.
/// - Honors the `RUST_LOG` environment variable if set.
/// - Falls back to `info` level.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init_tracing() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| parse_level(&s))
        .unwrap_or(tracing::Level::INFO);
    init_tracing_with_level(level);
}

/// Initialize tracing at a fixed level. Subsequent calls are no-ops.
pub fn init_tracing_with_level(level: tracing::Level) {
    // Ignore the error if the global subscriber was already set.
    let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
}

/// A convenient set of exports for most consumers.
///
/// Bring this into scope with:
/// `use keyweave::prelude::*;`
pub mod prelude {
    // Common result/error handling
    pub use anyhow::{Context, Error, Result, anyhow, bail, ensure};

    // Serialization
    pub use serde::{Deserialize, Serialize};

    // Tracing macros
    pub use tracing::{debug, error, info, instrument, trace, warn};

    // Timing helpers
    pub use std::time::Duration;
    pub use tokio::time::sleep;

    // External crates (namespaced) if callers want direct access
    pub use crate as keyweave;
    pub use enigo;

    // Frequently used internal items
    pub use crate::config::{Config, MacroDef, MacroKind, Profile};
    pub use crate::dispatch::{Dispatcher, TickOutcome};
    pub use crate::executor::{ActionExecutor, FunctionRunner, MacroRunner};
    pub use crate::utils::keys::{KeyPoller, KeySnapshot};
    pub use crate::utils::window::{ForegroundProbe, ForegroundWindow};
    pub use crate::{config, dispatch, executor, utils};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("WARNING"), Some(tracing::Level::WARN));
        assert_eq!(parse_level("debug"), Some(tracing::Level::DEBUG));
        assert_eq!(parse_level("loud"), None);
    }
}
