#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

/*!
Executor module for keyweave.

This module wires together:
- `actions`: low-level input simulation (key press, mouse click) with a dry-run mode
- `functions`: launching user scripts for `function` macros
- `runner`: per-profile trigger evaluation and background action tasks

Typical usage:
- Build a `FunctionRunner` and an `ActionExecutor` once at startup.
- Construct a `MacroRunner` per bound process with a loaded `Config`.
- Call `MacroRunner::run_macro_if_needed` every tick with a fresh key snapshot.

Example:
```no_run
use keyweave::config::Config;
use keyweave::executor::{ActionExecutor, FunctionRunner, MacroRunner};
use keyweave::utils::keys::KeySnapshot;

# async fn demo() {
let cfg: Config = Default::default();
let functions = FunctionRunner::new("user_functions", None, true);
let executor = ActionExecutor::new(true, functions); // dry-run mode
let mut runner = MacroRunner::from_config("Desktop", None, &cfg, executor);
runner.run_macro_if_needed(&KeySnapshot::from_names(&["f6"]));
# }
```

Public re-exports:
- `ActionExecutor`: performs single actions (respecting dry-run).
- `FunctionRunner`: resolves and launches user scripts.
- `MacroRunner`: evaluates triggers and owns per-macro state.
*/

pub mod actions;
pub mod functions;
pub mod runner;

// Re-exports for convenient access from `keyweave::executor::*`
pub use actions::{ActionExecutor, EnigoSink, InputSink};
pub use functions::FunctionRunner;
pub use runner::{LoopFlag, MacroRunner};
