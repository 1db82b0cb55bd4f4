//! Utilities for keyweave.
//!
//! This module aggregates the platform-facing helpers used by the dispatch loop.
//!
//! Submodules:
//! - `keys`: Global key state snapshots and key-name parsing (`device_query`).
//! - `window`: Foreground window probe (Win32 / X11; unknown elsewhere).

pub mod keys;
pub mod window;
