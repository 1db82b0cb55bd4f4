//! Global key state.
//!
//! The dispatch loop takes one [`KeySnapshot`] per tick and every macro of that tick is
//! evaluated against it, so a tick sees a consistent view of the keyboard and the
//! backend is queried once instead of once per macro.
//!
//! Key names follow the loose spelling users type into the config: `"f6"`, `"ctrl"`,
//! `"left shift"`, `"page down"`, `"a"`, `"7"`. Generic modifier names (`ctrl`, `shift`,
//! and `alt`) match either the left or the right physical key. A name containing
//! `+` (e.g. `"ctrl+alt+m"`) is a chord that needs every part held.

use anyhow::anyhow;
#[cfg(all(unix, not(target_os = "macos")))]
use anyhow::bail;
use device_query::{DeviceQuery, DeviceState, Keycode};
use std::ffi::OsString;
use tracing::trace;

/// Something that can report which keys are currently held.
pub trait KeyPoller {
    /// Capture the current keyboard and cursor state.
    fn poll(&self) -> KeySnapshot;
}

/// Polls the OS through `device_query`.
pub struct DeviceKeyPoller {
    device: DeviceState,
}

impl DeviceKeyPoller {
    /// Connect to the OS input backend.
    ///
    /// On X11 systems this fails instead of aborting when no display can be opened
    /// (Wayland-only or headless sessions).
    pub fn new() -> anyhow::Result<Self> {
        ensure_display(std::env::var_os("DISPLAY"))?;
        let device = std::panic::catch_unwind(DeviceState::new)
            .map_err(|_| anyhow!("could not connect to the X display; key polling needs X11"))?;
        Ok(Self { device })
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
fn ensure_display(display: Option<OsString>) -> anyhow::Result<()> {
    match display {
        Some(name) if !name.is_empty() => Ok(()),
        _ => bail!("DISPLAY is not set; key polling needs an X11 or XWayland session"),
    }
}

#[cfg(not(all(unix, not(target_os = "macos"))))]
fn ensure_display(_display: Option<OsString>) -> anyhow::Result<()> {
    Ok(())
}

impl KeyPoller for DeviceKeyPoller {
    fn poll(&self) -> KeySnapshot {
        let mouse = self.device.get_mouse();
        KeySnapshot::new(self.device.get_keys(), Some(mouse.coords))
    }
}

/// Keys held at one instant, plus the cursor position if known.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeySnapshot {
    held: Vec<Keycode>,
    cursor: Option<(i32, i32)>,
}

impl KeySnapshot {
    pub fn new(held: Vec<Keycode>, cursor: Option<(i32, i32)>) -> Self {
        Self { held, cursor }
    }

    /// Snapshot with the given key names held. Unknown names are ignored.
    pub fn from_names(names: &[&str]) -> Self {
        let held = names
            .iter()
            .filter_map(|name| keycodes(name))
            .filter_map(|codes| codes.first().cloned())
            .collect();
        Self { held, cursor: None }
    }

    pub fn with_cursor(mut self, x: i32, y: i32) -> Self {
        self.cursor = Some((x, y));
        self
    }

    pub fn cursor(&self) -> Option<(i32, i32)> {
        self.cursor
    }

    /// Whether the named key (or `+` chord) is held. Unknown names are never held.
    pub fn is_pressed(&self, name: &str) -> bool {
        let name = name.trim();
        if name.len() > 1 && name.contains('+') {
            return name
                .split('+')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .all(|part| self.is_single_pressed(part));
        }
        self.is_single_pressed(name)
    }

    /// Whether `key` and every modifier are held at the same time.
    pub fn chord_pressed<'a>(
        &self,
        key: &str,
        mut modifiers: impl Iterator<Item = &'a str>,
    ) -> bool {
        !key.is_empty() && self.is_pressed(key) && modifiers.all(|m| self.is_pressed(m))
    }

    fn is_single_pressed(&self, name: &str) -> bool {
        match keycodes(name) {
            Some(codes) => codes.iter().any(|code| self.held.contains(code)),
            None => {
                trace!(target: "keyweave::keys", %name, "Unknown key name");
                false
            }
        }
    }
}

const LETTERS: [Keycode; 26] = [
    Keycode::A,
    Keycode::B,
    Keycode::C,
    Keycode::D,
    Keycode::E,
    Keycode::F,
    Keycode::G,
    Keycode::H,
    Keycode::I,
    Keycode::J,
    Keycode::K,
    Keycode::L,
    Keycode::M,
    Keycode::N,
    Keycode::O,
    Keycode::P,
    Keycode::Q,
    Keycode::R,
    Keycode::S,
    Keycode::T,
    Keycode::U,
    Keycode::V,
    Keycode::W,
    Keycode::X,
    Keycode::Y,
    Keycode::Z,
];

const DIGITS: [Keycode; 10] = [
    Keycode::Key0,
    Keycode::Key1,
    Keycode::Key2,
    Keycode::Key3,
    Keycode::Key4,
    Keycode::Key5,
    Keycode::Key6,
    Keycode::Key7,
    Keycode::Key8,
    Keycode::Key9,
];

const NUMPAD_DIGITS: [Keycode; 10] = [
    Keycode::Numpad0,
    Keycode::Numpad1,
    Keycode::Numpad2,
    Keycode::Numpad3,
    Keycode::Numpad4,
    Keycode::Numpad5,
    Keycode::Numpad6,
    Keycode::Numpad7,
    Keycode::Numpad8,
    Keycode::Numpad9,
];

const FUNCTION_KEYS: [Keycode; 12] = [
    Keycode::F1,
    Keycode::F2,
    Keycode::F3,
    Keycode::F4,
    Keycode::F5,
    Keycode::F6,
    Keycode::F7,
    Keycode::F8,
    Keycode::F9,
    Keycode::F10,
    Keycode::F11,
    Keycode::F12,
];

/// Physical keys a key name may refer to; any of them being held counts.
pub fn keycodes(name: &str) -> Option<Vec<Keycode>> {
    let lower = name.trim().to_lowercase();

    let mut chars = lower.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return single_char_keycode(c).map(|code| vec![code]);
    }

    if let Some(n) = lower.strip_prefix('f').and_then(|n| n.parse::<usize>().ok()) {
        return (1..=FUNCTION_KEYS.len())
            .contains(&n)
            .then(|| vec![FUNCTION_KEYS[n - 1].clone()]);
    }

    if let Some(n) = numpad_digit(&lower) {
        return Some(vec![NUMPAD_DIGITS[n].clone()]);
    }

    let codes = match lower.as_str() {
        "ctrl" | "control" => vec![Keycode::LControl, Keycode::RControl],
        "left ctrl" | "left control" | "lctrl" => vec![Keycode::LControl],
        "right ctrl" | "right control" | "rctrl" => vec![Keycode::RControl],
        "shift" => vec![Keycode::LShift, Keycode::RShift],
        "left shift" | "lshift" => vec![Keycode::LShift],
        "right shift" | "rshift" => vec![Keycode::RShift],
        "alt" | "option" => vec![Keycode::LAlt, Keycode::RAlt],
        "left alt" | "lalt" => vec![Keycode::LAlt],
        "right alt" | "ralt" | "alt gr" | "altgr" => vec![Keycode::RAlt],
        "enter" | "return" => vec![Keycode::Enter],
        "space" | "spacebar" => vec![Keycode::Space],
        "tab" => vec![Keycode::Tab],
        "esc" | "escape" => vec![Keycode::Escape],
        "backspace" => vec![Keycode::Backspace],
        "delete" | "del" => vec![Keycode::Delete],
        "home" => vec![Keycode::Home],
        "end" => vec![Keycode::End],
        "page up" | "pageup" | "pgup" => vec![Keycode::PageUp],
        "page down" | "pagedown" | "pgdn" => vec![Keycode::PageDown],
        "up" | "up arrow" => vec![Keycode::Up],
        "down" | "down arrow" => vec![Keycode::Down],
        "left" | "left arrow" => vec![Keycode::Left],
        "right" | "right arrow" => vec![Keycode::Right],
        "caps lock" | "capslock" => vec![Keycode::CapsLock],
        "insert" | "ins" => vec![Keycode::Insert],
        "windows" | "win" | "left windows" | "right windows" | "meta" | "super" | "cmd"
        | "command" => vec![Keycode::Meta],
        "numpad *" | "multiply" => vec![Keycode::NumpadMultiply],
        "numpad /" | "divide" => vec![Keycode::NumpadDivide],
        "numpad +" => vec![Keycode::NumpadAdd],
        "numpad -" => vec![Keycode::NumpadSubtract],
        "plus" => vec![Keycode::Equal, Keycode::NumpadAdd],
        "minus" => vec![Keycode::Minus, Keycode::NumpadSubtract],
        _ => return None,
    };
    Some(codes)
}

/// Digit of a keypad key name: `"numpad 7"`, `"numpad7"`, `"num 7"`.
pub(crate) fn numpad_digit(lower: &str) -> Option<usize> {
    let rest = lower
        .strip_prefix("numpad")
        .or_else(|| lower.strip_prefix("num"))?
        .trim_start();
    let mut chars = rest.chars();
    match (chars.next(), chars.next()) {
        (Some(c @ '0'..='9'), None) => Some((c as u8 - b'0') as usize),
        _ => None,
    }
}

fn single_char_keycode(c: char) -> Option<Keycode> {
    match c {
        'a'..='z' => Some(LETTERS[(c as u8 - b'a') as usize].clone()),
        '0'..='9' => Some(DIGITS[(c as u8 - b'0') as usize].clone()),
        '-' => Some(Keycode::Minus),
        '=' => Some(Keycode::Equal),
        '[' => Some(Keycode::LeftBracket),
        ']' => Some(Keycode::RightBracket),
        '\\' => Some(Keycode::BackSlash),
        ';' => Some(Keycode::Semicolon),
        '\'' => Some(Keycode::Apostrophe),
        ',' => Some(Keycode::Comma),
        '.' => Some(Keycode::Dot),
        '/' => Some(Keycode::Slash),
        '`' => Some(Keycode::Grave),
        _ => None,
    }
}
