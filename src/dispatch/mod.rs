/*!
Dispatch loop (orchestration layer).

Once per tick the dispatcher asks the foreground probe which process owns the focused
window, picks the `MacroRunner` registered for that process (or the `Desktop` runner),
and lets it evaluate its macros against a fresh key snapshot.

Behavior:
- An unknown foreground window makes the tick a no-op; macros never fire against an
  unresolved target.
- Runners are registered once at construction, one per process binding in the config.
  Each runner hot-reloads its own macro list when the config file changes.
- `ctrl+alt+m` logs the current mouse position (diagnostic, outside the macro model).
- Nothing a runner does can end the loop; only the exit token does.
*/

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{self, Config, DESKTOP_PROFILE};
use crate::error::ConfigError;
use crate::executor::{ActionExecutor, MacroRunner};
use crate::utils::keys::{KeyPoller, KeySnapshot};
use crate::utils::window::ForegroundProbe;

/// Key chord that dumps the mouse position to the log.
pub const DIAGNOSTIC_HOTKEY: &str = "ctrl+alt+m";

/// Pause after a tick that found no usable foreground window.
pub const NO_TARGET_BACKOFF: Duration = Duration::from_millis(10);

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The foreground window or process was unknown; nothing was evaluated.
    NoTarget,
    /// A runner evaluated its macros. `matched` is false when the Desktop runner was
    /// used because no runner is registered for `process`.
    Evaluated { process: String, matched: bool },
}

/// Process-wide scheduler selecting and driving macro runners.
pub struct Dispatcher {
    runners: HashMap<String, MacroRunner>,
    desktop: MacroRunner,
    probe: Box<dyn ForegroundProbe>,
    keys: Box<dyn KeyPoller>,
    last_window_info: String,
    diagnostic_latched: bool,
}

impl Dispatcher {
    /// Build runners for every process binding in `cfg`.
    ///
    /// With `config_path`, every runner reloads itself when the file's modification time
    /// moves away from `mtime`.
    pub fn new(
        cfg: &Config,
        config_path: Option<&Path>,
        mtime: Option<SystemTime>,
        executor: &ActionExecutor,
        probe: Box<dyn ForegroundProbe>,
        keys: Box<dyn KeyPoller>,
    ) -> Self {
        let bind = |profile: &str, exe: Option<String>| {
            let runner = MacroRunner::from_config(profile, exe, cfg, executor.clone());
            match config_path {
                Some(path) => runner.watching(path, mtime),
                None => runner,
            }
        };

        let mut runners = HashMap::new();
        for (exe, profile) in cfg.process_bindings() {
            let runner = bind(&profile, Some(exe.clone()));
            if let Some(previous) = runners.insert(exe.clone(), runner) {
                warn!(
                    target: "keyweave::dispatch",
                    %exe,
                    replaced = %previous.profile_name(),
                    by = %profile,
                    "Process is bound by more than one profile; the last one wins"
                );
            }
        }
        let desktop = bind(DESKTOP_PROFILE, None);

        info!(
            target: "keyweave::dispatch",
            processes = runners.len(),
            desktop_macros = desktop.macros().len(),
            "Macro runners ready"
        );

        Self {
            runners,
            desktop,
            probe,
            keys,
            last_window_info: String::new(),
            diagnostic_latched: false,
        }
    }

    /// Load the config at `path` and build a dispatcher that hot-reloads from it.
    pub fn from_config_path(
        path: &Path,
        executor: &ActionExecutor,
        probe: Box<dyn ForegroundProbe>,
        keys: Box<dyn KeyPoller>,
    ) -> Result<Self, ConfigError> {
        let mtime = config::modified_time(path).ok();
        let cfg = config::load_from_path(path)?;
        Ok(Self::new(&cfg, Some(path), mtime, executor, probe, keys))
    }

    /// Processes with a dedicated runner.
    pub fn registered_processes(&self) -> impl Iterator<Item = &str> {
        self.runners.keys().map(String::as_str)
    }

    /// The runner that handles `process` (Desktop when none is registered).
    pub fn runner_for(&self, process: &str) -> &MacroRunner {
        self.runners.get(process).unwrap_or(&self.desktop)
    }

    /// Sleep between ticks, taken from the Desktop runner's global settings.
    pub fn loop_delay(&self) -> Duration {
        self.desktop.global().loop_delay()
    }

    /// Run one iteration: probe, select a runner, evaluate.
    pub fn tick(&mut self) -> TickOutcome {
        let window = self.probe.foreground();
        if window.is_unknown() {
            return TickOutcome::NoTarget;
        }

        let info = format!("{} | {}", window.title, window.process);
        if info != self.last_window_info {
            info!(
                target: "keyweave::dispatch",
                title = %window.title,
                process = %window.process,
                "Focused window changed"
            );
            self.last_window_info = info;
        }

        let keys = self.keys.poll();
        let matched = self.runners.contains_key(&window.process);
        let runner = self
            .runners
            .get_mut(&window.process)
            .unwrap_or(&mut self.desktop);
        runner.run_macro_if_needed(&keys);

        self.check_diagnostic_hotkey(&keys);

        TickOutcome::Evaluated {
            process: window.process,
            matched,
        }
    }

    /// Tick until `exit` is cancelled.
    pub async fn run(&mut self, exit: CancellationToken) {
        info!(target: "keyweave::dispatch", "Dispatch loop started");
        while !exit.is_cancelled() {
            let delay = match self.tick() {
                TickOutcome::NoTarget => NO_TARGET_BACKOFF,
                TickOutcome::Evaluated { .. } => self.loop_delay(),
            };
            tokio::select! {
                _ = exit.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }
        info!(target: "keyweave::dispatch", "Dispatch loop stopped");
    }

    fn check_diagnostic_hotkey(&mut self, keys: &KeySnapshot) {
        let pressed = keys.is_pressed(DIAGNOSTIC_HOTKEY);
        if pressed && !self.diagnostic_latched {
            match keys.cursor() {
                Some((x, y)) => info!(target: "keyweave::dispatch", x, y, "Mouse position"),
                None => debug!(target: "keyweave::dispatch", "Mouse position unavailable"),
            }
        }
        self.diagnostic_latched = pressed;
    }
}
