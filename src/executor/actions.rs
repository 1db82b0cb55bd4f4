use enigo::Keyboard as _;
use enigo::Mouse as _;
use enigo::{Button as EButton, Direction, Enigo, Key, Settings};
use std::cell::RefCell;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, trace};

use crate::config::models::{MacroDef, MacroKind, MouseButton as CMouseButton};
use crate::error::ActionError;
use crate::executor::functions::FunctionRunner;
use crate::utils::keys::numpad_digit;

/// Synthesizes input events.
///
/// Implementations must be shareable across background tasks.
pub trait InputSink: Send + Sync {
    /// Press and release one key.
    fn press_key(&self, key: &str) -> Result<(), ActionError>;

    /// Click one mouse button.
    fn click(&self, button: CMouseButton) -> Result<(), ActionError>;
}

thread_local! {
    // Enigo holds a platform connection that is not always `Send`; every worker thread
    // lazily opens its own.
    static ENIGO: RefCell<Option<Enigo>> = const { RefCell::new(None) };
}

/// Input sink backed by Enigo, with optional dry-run mode.
/// In dry-run mode, actions are only logged and no real input is simulated.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnigoSink {
    dry_run: bool,
}

impl EnigoSink {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// Returns whether the sink is in dry-run mode.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

impl InputSink for EnigoSink {
    fn press_key(&self, key: &str) -> Result<(), ActionError> {
        let mapped = enigo_key(key).ok_or_else(|| ActionError::UnknownKey(key.to_string()))?;
        if self.dry_run {
            info!(target: "keyweave::actions", %key, "DRY-RUN press_key");
            return Ok(());
        }
        trace!(target: "keyweave::actions", %key, "press_key");
        with_enigo(|enigo| Ok(enigo.key(mapped, Direction::Click)?))
    }

    fn click(&self, button: CMouseButton) -> Result<(), ActionError> {
        if self.dry_run {
            info!(target: "keyweave::actions", ?button, "DRY-RUN click");
            return Ok(());
        }
        trace!(target: "keyweave::actions", ?button, "click");
        with_enigo(|enigo| Ok(enigo.button(map_mouse_button(button), Direction::Click)?))
    }
}

fn with_enigo<T>(f: impl FnOnce(&mut Enigo) -> Result<T, ActionError>) -> Result<T, ActionError> {
    ENIGO.with(|cell| {
        let mut slot = cell.borrow_mut();
        let enigo = match slot.as_mut() {
            Some(enigo) => enigo,
            None => {
                trace!(target: "keyweave::actions", "Initializing Enigo");
                slot.insert(Enigo::new(&Settings::default())?)
            }
        };
        f(enigo)
    })
}

/// Executes the single-shot part of a macro: one key press, one click, or one script
/// launch. Repetition and pacing belong to the runner.
#[derive(Clone)]
pub struct ActionExecutor {
    input: Arc<dyn InputSink>,
    functions: Arc<FunctionRunner>,
}

impl ActionExecutor {
    /// Create an executor that drives real input through Enigo.
    /// - dry_run: when true, only logs instead of simulating real input.
    pub fn new(dry_run: bool, functions: FunctionRunner) -> Self {
        Self::with_sink(Arc::new(EnigoSink::new(dry_run)), functions)
    }

    /// Create an executor with a custom input sink.
    pub fn with_sink(input: Arc<dyn InputSink>, functions: FunctionRunner) -> Self {
        Self {
            input,
            functions: Arc::new(functions),
        }
    }

    pub fn functions(&self) -> &FunctionRunner {
        &self.functions
    }

    pub fn press_key(&self, key: &str) -> Result<(), ActionError> {
        self.input.press_key(key)
    }

    pub fn click(&self, button: CMouseButton) -> Result<(), ActionError> {
        self.input.click(button)
    }

    /// Hand a script to the external runner. Returns immediately.
    pub fn run_function(&self, name: &str) -> Option<JoinHandle<()>> {
        self.functions.run_function_by_name(name)
    }

    /// Perform the macro's action once, without any pacing.
    pub fn perform_once(&self, def: &MacroDef) -> Result<(), ActionError> {
        match def.kind {
            MacroKind::KeyboardPress => {
                let key = def
                    .key_to_press
                    .as_deref()
                    .ok_or_else(|| ActionError::missing_field(&def.name, "key_to_press"))?;
                self.press_key(key)
            }
            MacroKind::ClickLoop => self.click(def.mouse_button()),
            MacroKind::Function => {
                let name = def
                    .function_name
                    .as_deref()
                    .ok_or_else(|| ActionError::missing_field(&def.name, "function_name"))?;
                self.run_function(name);
                Ok(())
            }
            MacroKind::Unknown => {
                tracing::error!(target: "keyweave::actions", name = %def.name, "Unknown macro type");
                Ok(())
            }
        }
    }
}

fn map_mouse_button(btn: CMouseButton) -> EButton {
    match btn {
        CMouseButton::Left => EButton::Left,
        CMouseButton::Middle => EButton::Middle,
        CMouseButton::Right => EButton::Right,
    }
}

const NUMPAD_DIGITS: [Key; 10] = [
    Key::Numpad0,
    Key::Numpad1,
    Key::Numpad2,
    Key::Numpad3,
    Key::Numpad4,
    Key::Numpad5,
    Key::Numpad6,
    Key::Numpad7,
    Key::Numpad8,
    Key::Numpad9,
];

const FUNCTION_KEYS: [Key; 12] = [
    Key::F1,
    Key::F2,
    Key::F3,
    Key::F4,
    Key::F5,
    Key::F6,
    Key::F7,
    Key::F8,
    Key::F9,
    Key::F10,
    Key::F11,
    Key::F12,
];

/// Map a configured key name to the key Enigo synthesizes.
pub fn enigo_key(name: &str) -> Option<Key> {
    let trimmed = name.trim();
    let mut chars = trimmed.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return Some(Key::Unicode(c.to_ascii_lowercase()));
    }

    let lower = trimmed.to_lowercase();
    if let Some(n) = lower.strip_prefix('f').and_then(|n| n.parse::<usize>().ok()) {
        return (1..=FUNCTION_KEYS.len())
            .contains(&n)
            .then(|| FUNCTION_KEYS[n - 1]);
    }

    if let Some(n) = numpad_digit(&lower) {
        return Some(NUMPAD_DIGITS[n]);
    }

    let key = match lower.as_str() {
        "enter" | "return" => Key::Return,
        "space" | "spacebar" => Key::Space,
        "tab" => Key::Tab,
        "esc" | "escape" => Key::Escape,
        "backspace" => Key::Backspace,
        "delete" | "del" => Key::Delete,
        "home" => Key::Home,
        "end" => Key::End,
        "page up" | "pageup" | "pgup" => Key::PageUp,
        "page down" | "pagedown" | "pgdn" => Key::PageDown,
        "up" | "up arrow" => Key::UpArrow,
        "down" | "down arrow" => Key::DownArrow,
        "left" | "left arrow" => Key::LeftArrow,
        "right" | "right arrow" => Key::RightArrow,
        "shift" => Key::Shift,
        "left shift" | "lshift" => Key::LShift,
        "right shift" | "rshift" => Key::RShift,
        "ctrl" | "control" => Key::Control,
        "left ctrl" | "left control" | "lctrl" => Key::LControl,
        "right ctrl" | "right control" | "rctrl" => Key::RControl,
        "alt" | "option" | "left alt" | "lalt" | "right alt" | "ralt" | "alt gr" | "altgr" => {
            Key::Alt
        }
        "windows" | "win" | "left windows" | "right windows" | "meta" | "super" | "cmd"
        | "command" => Key::Meta,
        "caps lock" | "capslock" => Key::CapsLock,
        #[cfg(not(target_os = "macos"))]
        "insert" | "ins" => Key::Insert,
        "numpad *" | "multiply" => Key::Multiply,
        "numpad /" | "divide" => Key::Divide,
        "numpad +" => Key::Add,
        "numpad -" => Key::Subtract,
        "plus" => Key::Unicode('+'),
        "minus" => Key::Unicode('-'),
        _ => return None,
    };
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        presses: Mutex<Vec<String>>,
        clicks: Mutex<Vec<CMouseButton>>,
    }

    impl InputSink for RecordingSink {
        fn press_key(&self, key: &str) -> Result<(), ActionError> {
            self.presses.lock().unwrap().push(key.to_string());
            Ok(())
        }

        fn click(&self, button: CMouseButton) -> Result<(), ActionError> {
            self.clicks.lock().unwrap().push(button);
            Ok(())
        }
    }

    fn def(json: serde_json::Value) -> MacroDef {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_enigo_key_mapping() {
        assert_eq!(enigo_key("a"), Some(Key::Unicode('a')));
        assert_eq!(enigo_key("A"), Some(Key::Unicode('a')));
        assert_eq!(enigo_key("F6"), Some(Key::F6));
        assert_eq!(enigo_key("page down"), Some(Key::PageDown));
        assert_eq!(enigo_key("f42"), None);
        assert_eq!(enigo_key("hyper"), None);
    }

    #[test]
    fn test_trigger_and_synthesis_names_agree() {
        use crate::utils::keys::keycodes;
        let mut names = vec![
            "a", "7", "f6", "f12", "enter", "space", "tab", "esc", "backspace", "delete",
            "home", "end", "page up", "page down", "up", "down", "left", "right", "shift",
            "left shift", "right shift", "ctrl", "left ctrl", "right ctrl", "alt", "left alt",
            "right alt", "windows", "win", "caps lock", "numpad 0", "num 5", "numpad9",
            "numpad *", "numpad /", "numpad +", "numpad -", "plus", "minus", "hyper",
        ];
        if cfg!(not(target_os = "macos")) {
            names.push("insert");
        }
        for name in names {
            assert_eq!(
                keycodes(name).is_some(),
                enigo_key(name).is_some(),
                "key name `{name}`"
            );
        }
        assert_eq!(enigo_key("windows"), Some(Key::Meta));
        assert_eq!(enigo_key("numpad 3"), Some(Key::Numpad3));
    }

    #[test]
    fn test_with_enigo_reports_connection_failure() {
        // Headless machines fail to connect; that must surface as an error, twice.
        for _ in 0..2 {
            let result = with_enigo(|_| Ok(7));
            assert!(
                matches!(result, Ok(7) | Err(ActionError::Connection(_))),
                "{result:?}"
            );
        }
    }

    #[test]
    fn test_dry_run_sink_validates_key() {
        let sink = EnigoSink::new(true);
        assert!(sink.is_dry_run());
        assert!(sink.press_key("space").is_ok());
        assert!(matches!(
            sink.press_key("hyper"),
            Err(ActionError::UnknownKey(_))
        ));
        assert!(sink.click(CMouseButton::Right).is_ok());
    }

    #[test]
    fn test_perform_once_dispatches_by_kind() {
        let sink = Arc::new(RecordingSink::default());
        let dir = tempfile::tempdir().unwrap();
        let exec = ActionExecutor::with_sink(
            sink.clone(),
            FunctionRunner::new(dir.path(), None, true),
        );

        exec.perform_once(&def(serde_json::json!({
            "name": "p", "key": "f6", "type": "keyboard_press", "key_to_press": "a"
        })))
        .unwrap();
        exec.perform_once(&def(serde_json::json!({
            "name": "c", "key": "f7", "type": "click_loop", "key_to_press": "Right Click"
        })))
        .unwrap();
        exec.perform_once(&def(serde_json::json!({
            "name": "u", "key": "f8", "type": "teleport"
        })))
        .unwrap();

        assert_eq!(*sink.presses.lock().unwrap(), vec!["a".to_string()]);
        assert_eq!(*sink.clicks.lock().unwrap(), vec![CMouseButton::Right]);
    }

    #[test]
    fn test_perform_once_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ActionExecutor::with_sink(
            Arc::new(RecordingSink::default()),
            FunctionRunner::new(dir.path(), None, true),
        );
        let err = exec
            .perform_once(&def(serde_json::json!({
                "name": "p", "key": "f6", "type": "keyboard_press"
            })))
            .unwrap_err();
        assert!(matches!(err, ActionError::MissingField { field: "key_to_press", .. }));

        let err = exec
            .perform_once(&def(serde_json::json!({
                "name": "f", "key": "f6", "type": "function"
            })))
            .unwrap_err();
        assert!(matches!(err, ActionError::MissingField { field: "function_name", .. }));
    }
}
