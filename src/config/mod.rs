//! Configuration module for keyweave.
//!
//! This module wires together the data models and loading/validation helpers used
//! throughout the crate. Import from here for a convenient, stable API.
//!
//! Example:
//! use keyweave::config::{Config, load_from_path};
//!
//! let cfg = load_from_path("config.json")?;
//! let desktop = cfg.resolve_macros("Desktop", None);

pub mod loader;
pub mod models;

// Re-export core data models
pub use models::{
    Config, DESKTOP_PROFILE, GlobalSettings, MacroDef, MacroKind, MacroList, MouseButton,
    ON_BOOT_PROFILE, Profile, Profiles, Resolution, TriggerPolicy,
};

// Re-export loader utilities
pub use loader::{
    generate_schema, has_changed, load_from_path, load_from_path_async, load_from_reader,
    load_from_str, modified_time, validate_config, write_schema_to_writer,
};
