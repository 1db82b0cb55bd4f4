//! User function scripts.
//!
//! A `function` macro names a script in the user functions directory. The script is
//! launched as a child process on a background task; the caller never waits for it.
//! A missing script or a failing one is logged and otherwise ignored.

use std::fs;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Interpreter used for `.py` scripts when none is configured.
pub const DEFAULT_INTERPRETER: &str = if cfg!(windows) { "python" } else { "python3" };

/// Launches user scripts by name.
#[derive(Debug, Clone)]
pub struct FunctionRunner {
    dir: PathBuf,
    interpreter: String,
    dry_run: bool,
}

impl FunctionRunner {
    /// Create a runner for scripts in `dir`.
    /// - interpreter: program for `.py` scripts (defaults to [`DEFAULT_INTERPRETER`]).
    /// - dry_run: when true, only logs instead of launching.
    pub fn new(dir: impl Into<PathBuf>, interpreter: Option<String>, dry_run: bool) -> Self {
        Self {
            dir: dir.into(),
            interpreter: interpreter.unwrap_or_else(|| DEFAULT_INTERPRETER.to_string()),
            dry_run,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Find the script for `name`: the first file (by path order) whose stem is `name`.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let entries = fs::read_dir(&self.dir).ok()?;
        let mut matches: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.file_stem().is_some_and(|stem| stem == name))
            .collect();
        matches.sort();
        matches.into_iter().next()
    }

    /// Launch the script for `name` in the background.
    ///
    /// Returns the handle of the task supervising the child, or `None` when nothing
    /// was launched (script missing or dry-run). Must be called inside a Tokio runtime
    /// when a script is found.
    pub fn run_function_by_name(&self, name: &str) -> Option<JoinHandle<()>> {
        let Some(script) = self.resolve(name) else {
            error!(
                target: "keyweave::functions",
                %name, dir = %self.dir.display(),
                "Script file not found"
            );
            return None;
        };

        if self.dry_run {
            info!(target: "keyweave::functions", script = %script.display(), "DRY-RUN run_function");
            return None;
        }

        let mut command = self.command_for(&script);
        let name = name.to_string();
        Some(tokio::spawn(async move {
            debug!(target: "keyweave::functions", %name, script = %script.display(), "Launching script");
            match command.status().await {
                Ok(status) if status.success() => {
                    debug!(target: "keyweave::functions", %name, "Script finished");
                }
                Ok(status) => {
                    error!(target: "keyweave::functions", %name, %status, "Script exited with error");
                }
                Err(err) => {
                    warn!(target: "keyweave::functions", %name, error = %err, "Failed to launch script");
                }
            }
        }))
    }

    fn command_for(&self, script: &Path) -> Command {
        let is_python = script
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("py"));
        let mut command = if is_python {
            let mut c = Command::new(&self.interpreter);
            c.arg(script);
            c
        } else {
            Command::new(script)
        };
        command.current_dir(&self.dir);
        command
    }
}
