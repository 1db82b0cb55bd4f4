use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::SystemTime;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use crate::config::{
    self, Config, GlobalSettings, MacroDef, MacroKind, ON_BOOT_PROFILE, TriggerPolicy,
};
use crate::error::ConfigError;
use crate::executor::actions::ActionExecutor;
use crate::utils::keys::KeySnapshot;

const IDLE: u8 = 0;
const ARMED: u8 = 1;
const STOPPING: u8 = 2;

/// Run state shared by a macro slot and its repeating loop.
///
/// Only the loop moves the state from stopping to idle, and it exits right after doing
/// so. A re-arm that lands before that point revives the sleeping loop; a re-arm after it
/// finds the flag idle and launches a new loop.
#[derive(Debug, Clone, Default)]
pub struct LoopFlag(Arc<AtomicU8>);

impl LoopFlag {
    pub fn is_armed(&self) -> bool {
        self.0.load(Ordering::SeqCst) == ARMED
    }

    /// Arm the flag. Returns true when no loop is left to observe it and a new one must
    /// be launched.
    pub fn arm(&self) -> bool {
        self.0.swap(ARMED, Ordering::SeqCst) == IDLE
    }

    /// Ask the running loop to stop after its current iteration.
    pub fn disarm(&self) {
        let _ = self
            .0
            .compare_exchange(ARMED, STOPPING, Ordering::SeqCst, Ordering::SeqCst);
    }

    /// Checked by the loop before each iteration. Once this returns false the flag is
    /// idle and the loop must exit.
    pub fn keep_going(&self) -> bool {
        match self
            .0
            .compare_exchange(STOPPING, IDLE, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => false,
            Err(state) => state == ARMED,
        }
    }

    /// Drop straight to idle; used when the loop aborts on an error.
    pub fn release(&self) {
        self.0.store(IDLE, Ordering::SeqCst);
    }
}

/// Trigger bookkeeping for one macro name.
#[derive(Debug, Default)]
struct MacroSlot {
    /// Edge latch: set on the press that fired, cleared on release.
    triggered: bool,
    /// Shared with the background loop.
    active: LoopFlag,
    /// Most recent background task for this macro.
    task: Option<JoinHandle<()>>,
}

impl MacroSlot {
    fn is_active(&self) -> bool {
        self.active.is_armed()
    }

    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn launch(&mut self, task: impl Future<Output = ()> + Send + 'static) {
        self.task = Some(tokio::spawn(task));
    }
}

/// Owns one resolved macro list and all trigger state for it.
///
/// The dispatch loop calls [`MacroRunner::run_macro_if_needed`] once per tick with the
/// current key snapshot. Actions run on Tokio tasks, so this must be called inside a
/// Tokio runtime.
pub struct MacroRunner {
    profile_name: String,
    exe_name: Option<String>,
    config_path: Option<PathBuf>,
    last_mtime: Option<SystemTime>,
    global: GlobalSettings,
    macros: Vec<MacroDef>,
    slots: HashMap<String, MacroSlot>,
    executor: ActionExecutor,
}

impl MacroRunner {
    /// Load `config_path` and bind the runner to `profile_name` (and `exe_name`).
    pub fn new(
        profile_name: impl Into<String>,
        exe_name: Option<String>,
        config_path: impl AsRef<Path>,
        executor: ActionExecutor,
    ) -> Result<Self, ConfigError> {
        let path = config_path.as_ref();
        let mtime = config::modified_time(path).ok();
        let cfg = config::load_from_path(path)?;
        Ok(Self::from_config(profile_name, exe_name, &cfg, executor).watching(path, mtime))
    }

    /// Bind the runner to an already loaded config. No hot reload until
    /// [`MacroRunner::watching`] is called.
    pub fn from_config(
        profile_name: impl Into<String>,
        exe_name: Option<String>,
        cfg: &Config,
        executor: ActionExecutor,
    ) -> Self {
        let mut runner = Self {
            profile_name: profile_name.into(),
            exe_name,
            config_path: None,
            last_mtime: None,
            global: GlobalSettings::default(),
            macros: Vec::new(),
            slots: HashMap::new(),
            executor,
        };
        runner.apply(cfg);
        runner
    }

    /// Reload from `path` whenever its modification time moves away from `mtime`.
    pub fn watching(mut self, path: impl Into<PathBuf>, mtime: Option<SystemTime>) -> Self {
        self.config_path = Some(path.into());
        self.last_mtime = mtime;
        self
    }

    pub fn profile_name(&self) -> &str {
        &self.profile_name
    }

    pub fn exe_name(&self) -> Option<&str> {
        self.exe_name.as_deref()
    }

    pub fn macros(&self) -> &[MacroDef] {
        &self.macros
    }

    pub fn global(&self) -> &GlobalSettings {
        &self.global
    }

    /// Whether the macro's repeating loop is armed.
    pub fn is_active(&self, name: &str) -> bool {
        self.slots.get(name).is_some_and(MacroSlot::is_active)
    }

    /// Whether a background task for the macro is still alive.
    pub fn is_running(&self, name: &str) -> bool {
        self.slots.get(name).is_some_and(MacroSlot::is_running)
    }

    /// Whether the macro's edge latch is set.
    pub fn is_triggered(&self, name: &str) -> bool {
        self.slots.get(name).is_some_and(|slot| slot.triggered)
    }

    fn apply(&mut self, cfg: &Config) {
        let resolution = cfg.resolve_macros(&self.profile_name, self.exe_name.as_deref());
        if resolution.fell_back && self.profile_name != ON_BOOT_PROFILE {
            warn!(
                target: "keyweave::runner",
                profile = %self.profile_name,
                exe = self.exe_name.as_deref().unwrap_or("-"),
                "Profile is missing or has no macros for this executable; falling back to Desktop"
            );
        }
        self.macros = resolution.macros;
        self.global = cfg.global.clone();
    }

    /// Re-resolve the macro list if the config file changed on disk.
    ///
    /// Trigger state is discarded on a successful reload. Loops that are already
    /// running keep their own flag and are not stopped. A failed reload keeps the
    /// previous macros and state.
    fn reload_config_if_updated(&mut self) {
        let Some(path) = self.config_path.clone() else {
            return;
        };
        if !config::has_changed(&path, self.last_mtime) {
            return;
        }
        self.last_mtime = config::modified_time(&path).ok();
        info!(
            target: "keyweave::runner",
            profile = %self.profile_name,
            path = %path.display(),
            "Detected config change; reloading profile"
        );
        match config::load_from_path(&path) {
            Ok(cfg) => {
                self.apply(&cfg);
                self.slots.clear();
            }
            Err(err) => {
                warn!(
                    target: "keyweave::runner",
                    profile = %self.profile_name,
                    error = %err,
                    "Config reload failed; keeping previous macros"
                );
            }
        }
    }

    /// Evaluate every macro against `keys` and start or stop background work.
    pub fn run_macro_if_needed(&mut self, keys: &KeySnapshot) {
        self.reload_config_if_updated();

        let Self {
            macros,
            slots,
            executor,
            ..
        } = self;
        for def in macros.iter() {
            let pressed = def
                .trigger_key()
                .is_some_and(|key| keys.chord_pressed(key, def.modifiers()));
            let slot = slots.entry(def.name.clone()).or_default();
            evaluate(def, pressed, slot, executor);
        }
    }
}

fn evaluate(def: &MacroDef, pressed: bool, slot: &mut MacroSlot, executor: &ActionExecutor) {
    if def.kind == MacroKind::Unknown {
        if pressed && !slot.triggered {
            slot.triggered = true;
            error!(target: "keyweave::runner", name = %def.name, "Unknown macro type; nothing to run");
        } else if !pressed {
            slot.triggered = false;
        }
        return;
    }

    match def.policy() {
        TriggerPolicy::LoopLatch => {
            if pressed && !slot.triggered {
                slot.triggered = true;
                if slot.is_active() {
                    debug!(target: "keyweave::runner", name = %def.name, "Stopping click loop");
                    slot.active.disarm();
                } else {
                    debug!(target: "keyweave::runner", name = %def.name, "Starting click loop");
                    let task = run_macro(def.clone(), executor.clone(), slot.active.clone());
                    arm(slot, task);
                }
            } else if !pressed {
                slot.triggered = false;
            }
        }
        TriggerPolicy::RunOnce => {
            if pressed && !slot.triggered {
                slot.triggered = true;
                trace!(target: "keyweave::runner", name = %def.name, "Run-once fired");
                let task = run_macro(def.clone(), executor.clone(), slot.active.clone());
                slot.launch(task);
            } else if !pressed {
                slot.triggered = false;
            }
        }
        TriggerPolicy::Toggle => {
            if pressed && !slot.triggered {
                slot.triggered = true;
                if slot.is_active() {
                    debug!(target: "keyweave::runner", name = %def.name, "Toggle off");
                    slot.active.disarm();
                } else {
                    debug!(target: "keyweave::runner", name = %def.name, "Toggle on");
                    let task =
                        run_macro_toggleable(def.clone(), executor.clone(), slot.active.clone());
                    arm(slot, task);
                }
            } else if !pressed {
                slot.triggered = false;
            }
        }
        TriggerPolicy::Hold => {
            if pressed {
                let busy = if def.kind == MacroKind::ClickLoop {
                    slot.is_active()
                } else {
                    slot.is_running()
                };
                if !busy {
                    let task = run_macro(def.clone(), executor.clone(), slot.active.clone());
                    if def.kind == MacroKind::ClickLoop {
                        arm(slot, task);
                    } else {
                        slot.launch(task);
                    }
                }
            } else if def.kind == MacroKind::ClickLoop {
                slot.active.disarm();
            }
        }
    }
}

/// Arm the loop flag and make sure exactly one loop observes it.
///
/// A loop that was told to stop but is still sleeping picks the flag back up, so no
/// second task is started for the same macro.
fn arm(slot: &mut MacroSlot, task: impl Future<Output = ()> + Send + 'static) {
    if slot.active.arm() {
        slot.launch(task);
    }
}

/// Execute a macro's action on a background task.
///
/// - `keyboard_press`: one press, then a pause of `Interval` so a held trigger cannot
///   press faster than the interval.
/// - `function`: hand off to the script runner and return.
/// - `click_loop`: click every `Interval` until `active` is disarmed.
pub async fn run_macro(def: MacroDef, executor: ActionExecutor, active: LoopFlag) {
    let interval = def.interval();
    match def.kind {
        MacroKind::KeyboardPress => {
            if let Err(err) = executor.perform_once(&def) {
                error!(target: "keyweave::runner", name = %def.name, error = %err, "Key press failed");
            }
            sleep(interval).await;
        }
        MacroKind::Function => {
            if let Err(err) = executor.perform_once(&def) {
                error!(target: "keyweave::runner", name = %def.name, error = %err, "Function launch failed");
            }
        }
        MacroKind::ClickLoop => {
            let button = def.mouse_button();
            while active.keep_going() {
                if let Err(err) = executor.click(button) {
                    error!(target: "keyweave::runner", name = %def.name, error = %err, "Click failed; stopping loop");
                    active.release();
                    break;
                }
                sleep(interval).await;
            }
            trace!(target: "keyweave::runner", name = %def.name, "Click loop ended");
        }
        MacroKind::Unknown => {
            error!(target: "keyweave::runner", name = %def.name, "Unknown macro type");
        }
    }
}

/// Repeat the macro's whole action every `Interval` until `active` is disarmed.
pub async fn run_macro_toggleable(def: MacroDef, executor: ActionExecutor, active: LoopFlag) {
    let interval = def.interval();
    while active.keep_going() {
        if let Err(err) = executor.perform_once(&def) {
            error!(target: "keyweave::runner", name = %def.name, error = %err, "Action failed; disarming");
            active.release();
            break;
        }
        sleep(interval).await;
    }
    trace!(target: "keyweave::runner", name = %def.name, "Toggle loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MouseButton;
    use crate::error::ActionError;
    use crate::executor::actions::InputSink;
    use crate::executor::functions::FunctionRunner;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        presses: Mutex<Vec<String>>,
        clicks: Mutex<Vec<MouseButton>>,
    }

    impl RecordingSink {
        fn presses(&self) -> usize {
            self.presses.lock().unwrap().len()
        }

        fn clicks(&self) -> usize {
            self.clicks.lock().unwrap().len()
        }
    }

    impl InputSink for RecordingSink {
        fn press_key(&self, key: &str) -> Result<(), ActionError> {
            self.presses.lock().unwrap().push(key.to_string());
            Ok(())
        }

        fn click(&self, button: MouseButton) -> Result<(), ActionError> {
            self.clicks.lock().unwrap().push(button);
            Ok(())
        }
    }

    fn runner_with(macros: serde_json::Value) -> (MacroRunner, Arc<RecordingSink>) {
        let cfg: Config = serde_json::from_value(json!({
            "profiles": { "Desktop": { "macros": macros } }
        }))
        .unwrap();
        let sink = Arc::new(RecordingSink::default());
        let executor = ActionExecutor::with_sink(
            sink.clone(),
            FunctionRunner::new(std::env::temp_dir(), None, true),
        );
        (MacroRunner::from_config("Desktop", None, &cfg, executor), sink)
    }

    fn held(names: &[&str]) -> KeySnapshot {
        KeySnapshot::from_names(names)
    }

    async fn press_release(runner: &mut MacroRunner, key: &str, ticks: usize) {
        for _ in 0..ticks {
            runner.run_macro_if_needed(&held(&[key]));
            sleep(Duration::from_millis(1)).await;
        }
        runner.run_macro_if_needed(&held(&[]));
    }

    async fn wait_until_idle(runner: &MacroRunner, name: &str) {
        for _ in 0..200 {
            if !runner.is_running(name) {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("task for {name} never finished");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_once_fires_once_per_press() {
        let (mut runner, sink) = runner_with(json!([
            { "name": "a", "key": "f6", "type": "keyboard_press", "key_to_press": "a",
              "Interval": 0.01, "run_once": true }
        ]));

        press_release(&mut runner, "f6", 25).await;
        wait_until_idle(&runner, "a").await;
        assert_eq!(sink.presses(), 1);
        assert!(!runner.is_triggered("a"));

        press_release(&mut runner, "f6", 3).await;
        wait_until_idle(&runner, "a").await;
        assert_eq!(sink.presses(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn modifiers_must_all_be_held() {
        let (mut runner, sink) = runner_with(json!([
            { "name": "a", "key": "f6", "modifier": "ctrl&shift", "type": "keyboard_press",
              "key_to_press": "a", "Interval": 0.01, "run_once": true }
        ]));

        runner.run_macro_if_needed(&held(&["f6", "left ctrl"]));
        runner.run_macro_if_needed(&held(&[]));
        sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.presses(), 0);

        runner.run_macro_if_needed(&held(&["f6", "left ctrl", "right shift"]));
        runner.run_macro_if_needed(&held(&[]));
        wait_until_idle(&runner, "a").await;
        assert_eq!(sink.presses(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn click_loop_run_once_toggles() {
        let (mut runner, sink) = runner_with(json!([
            { "name": "c", "key": "f7", "type": "click_loop", "key_to_press": "left click",
              "Interval": 0.01, "run_once": true }
        ]));

        press_release(&mut runner, "f7", 5).await;
        assert!(runner.is_active("c"));
        sleep(Duration::from_millis(60)).await;
        assert!(sink.clicks() >= 2, "clicks = {}", sink.clicks());

        press_release(&mut runner, "f7", 5).await;
        assert!(!runner.is_active("c"));
        wait_until_idle(&runner, "c").await;

        let after_stop = sink.clicks();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.clicks(), after_stop);
        assert!(!runner.is_active("c"));
        assert!(!runner.is_running("c"));
    }

    #[test]
    fn loop_flag_hands_exit_to_the_loop() {
        let flag = LoopFlag::default();
        assert!(flag.arm());
        assert!(flag.keep_going());

        // Re-armed while the loop sleeps: the same loop carries on.
        flag.disarm();
        assert!(!flag.is_armed());
        assert!(!flag.arm());
        assert!(flag.keep_going());

        // The loop claims its exit first: the re-arm must launch a new loop.
        flag.disarm();
        assert!(!flag.keep_going());
        assert!(!flag.is_armed());
        assert!(flag.arm());
        assert!(flag.is_armed());
        assert!(!flag.arm());

        flag.release();
        assert!(!flag.keep_going());
        assert!(flag.arm());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn quick_retoggle_keeps_one_loop() {
        let (mut runner, sink) = runner_with(json!([
            { "name": "t", "key": "f8", "type": "keyboard_press", "key_to_press": "b",
              "Interval": 0.05, "toggle": true }
        ]));

        // on, off, on within one interval
        for _ in 0..3 {
            press_release(&mut runner, "f8", 1).await;
        }
        assert!(runner.is_active("t"));
        assert!(runner.is_running("t"));

        sleep(Duration::from_millis(160)).await;
        let presses = sink.presses();
        assert!((2..=5).contains(&presses), "presses = {presses}");
        assert!(runner.is_active("t"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn toggle_repeats_until_disarmed() {
        let (mut runner, sink) = runner_with(json!([
            { "name": "t", "key": "f8", "type": "keyboard_press", "key_to_press": "b",
              "Interval": 0.02, "toggle": true }
        ]));

        press_release(&mut runner, "f8", 3).await;
        assert!(runner.is_active("t"));
        sleep(Duration::from_millis(150)).await;
        let armed = sink.presses();
        assert!((3..=12).contains(&armed), "presses while armed = {armed}");

        // Releasing the key leaves the loop armed.
        runner.run_macro_if_needed(&held(&[]));
        assert!(runner.is_active("t"));

        press_release(&mut runner, "f8", 3).await;
        assert!(!runner.is_active("t"));
        sleep(Duration::from_millis(40)).await;
        assert!(!runner.is_running("t"));
        let stopped = sink.presses();
        sleep(Duration::from_millis(60)).await;
        assert_eq!(sink.presses(), stopped);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn hold_press_never_overlaps() {
        let (mut runner, sink) = runner_with(json!([
            { "name": "h", "key": "f9", "type": "keyboard_press", "key_to_press": "c",
              "Interval": 0.2 }
        ]));

        for _ in 0..40 {
            runner.run_macro_if_needed(&held(&["f9"]));
            assert!(runner.is_running("h"));
            sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(sink.presses(), 1);

        runner.run_macro_if_needed(&held(&[]));
        wait_until_idle(&runner, "h").await;
        assert_eq!(sink.presses(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn hold_click_loop_stops_on_release() {
        let (mut runner, sink) = runner_with(json!([
            { "name": "c", "key": "f10", "type": "click_loop", "key_to_press": "right",
              "Interval": 0.01 }
        ]));

        for _ in 0..30 {
            runner.run_macro_if_needed(&held(&["f10"]));
            sleep(Duration::from_millis(1)).await;
        }
        assert!(runner.is_active("c"));
        runner.run_macro_if_needed(&held(&[]));
        assert!(!runner.is_active("c"));
        wait_until_idle(&runner, "c").await;

        let clicks = sink.clicks();
        assert!(clicks >= 1);
        assert!(sink.clicks.lock().unwrap().iter().all(|b| *b == MouseButton::Right));
        sleep(Duration::from_millis(40)).await;
        assert_eq!(sink.clicks(), clicks);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_type_does_nothing() {
        let (mut runner, sink) = runner_with(json!([
            { "name": "u", "key": "f6", "type": "teleport" }
        ]));
        press_release(&mut runner, "f6", 5).await;
        assert!(!runner.is_running("u"));
        assert_eq!(sink.presses() + sink.clicks(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reload_replaces_macros_and_resets_latches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            json!({ "profiles": { "Desktop": { "macros": [
                { "name": "a", "key": "f6", "type": "keyboard_press", "key_to_press": "a",
                  "Interval": 0.01, "run_once": true }
            ]}}})
            .to_string(),
        )
        .unwrap();

        let sink = Arc::new(RecordingSink::default());
        let executor = ActionExecutor::with_sink(
            sink.clone(),
            FunctionRunner::new(dir.path(), None, true),
        );
        let mut runner = MacroRunner::new("Desktop", None, &path, executor).unwrap();

        runner.run_macro_if_needed(&held(&["f6"]));
        assert!(runner.is_triggered("a"));

        std::fs::write(
            &path,
            json!({ "profiles": { "Desktop": { "macros": [
                { "name": "b", "key": "f7", "type": "keyboard_press", "key_to_press": "b",
                  "Interval": 0.01, "run_once": true }
            ]}}})
            .to_string(),
        )
        .unwrap();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(10))
            .unwrap();

        runner.run_macro_if_needed(&held(&[]));
        assert_eq!(runner.macros().len(), 1);
        assert_eq!(runner.macros()[0].name, "b");
        assert!(!runner.is_triggered("a"));

        // A broken document keeps the current macros.
        std::fs::write(&path, "{ broken").unwrap();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(20))
            .unwrap();
        runner.run_macro_if_needed(&held(&[]));
        assert_eq!(runner.macros()[0].name, "b");
    }

    #[test]
    fn unknown_profile_without_desktop_is_empty() {
        let cfg: Config = serde_json::from_value(json!({
            "profiles": { "Games": { "game.exe": { "macros": [] } } }
        }))
        .unwrap();
        let executor = ActionExecutor::with_sink(
            Arc::new(RecordingSink::default()),
            FunctionRunner::new(std::env::temp_dir(), None, true),
        );
        let runner = MacroRunner::from_config("Nope", Some("x.exe".into()), &cfg, executor);
        assert!(runner.macros().is_empty());
        assert_eq!(runner.profile_name(), "Nope");
        assert_eq!(runner.exe_name(), Some("x.exe"));
    }
}
