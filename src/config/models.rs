use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Profile used whenever the foreground process has no profile of its own.
pub const DESKTOP_PROFILE: &str = "Desktop";

/// Profile whose `function` macros run once at startup.
pub const ON_BOOT_PROFILE: &str = "OnBoot";

/// Seconds between repetitions when a macro has no `Interval`.
pub const DEFAULT_INTERVAL_SECS: f64 = 0.05;

/// Seconds between dispatch ticks when `global.loop_delay` is absent.
pub const DEFAULT_LOOP_DELAY_SECS: f64 = 0.001;

/// Separator between modifier names in a macro's `modifier` field.
pub const MODIFIER_DELIMITER: char = '&';

/// Root configuration document.
///
/// ```json
/// {
///   "profiles": {
///     "Desktop": { "macros": [ ... ] },
///     "Games":   { "game.exe": { "macros": [ ... ] } }
///   },
///   "global": { "loop_delay": 0.001 }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct Config {
    /// Named profiles. `Desktop` and `OnBoot` are reserved.
    #[serde(default)]
    pub profiles: Profiles,

    /// Settings shared by every profile.
    #[serde(default)]
    pub global: GlobalSettings,
}

/// Profiles keyed by name.
pub type Profiles = BTreeMap<String, Profile>;

/// A profile is either one macro list or a map of executable name to macro list.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Profile {
    /// `{ "macros": [...] }`
    Flat(MacroList),

    /// `{ "app.exe": { "macros": [...] }, ... }`
    Scoped(BTreeMap<String, MacroList>),

    /// Any other shape. Kept so one bad profile does not reject the whole document;
    /// resolving it falls back to `Desktop`.
    Malformed(serde_json::Value),
}

impl Profile {
    /// The macro list this profile provides for `exe`, if any.
    ///
    /// Flat profiles ignore `exe`. Scoped profiles need an exact executable match.
    pub fn macros_for(&self, exe: Option<&str>) -> Option<&[MacroDef]> {
        match self {
            Profile::Flat(list) => Some(&list.macros),
            Profile::Scoped(map) => exe
                .and_then(|exe| map.get(exe))
                .map(|list| list.macros.as_slice()),
            Profile::Malformed(_) => None,
        }
    }

    /// Why a malformed profile matched neither shape, naming the first macro that failed
    /// to parse when there is one. `None` for well-formed profiles.
    pub fn malformed_reason(&self) -> Option<String> {
        let Profile::Malformed(value) = self else {
            return None;
        };
        let Some(map) = value.as_object() else {
            return Some(format!("expected an object, found {}", json_kind(value)));
        };
        if let Some(macros) = map.get("macros") {
            return Some(
                first_macro_error(macros).unwrap_or_else(|| "invalid macro list".to_string()),
            );
        }
        for (exe, list) in map {
            let reason = match list.get("macros") {
                Some(macros) => first_macro_error(macros),
                None if list.is_object() => Some("missing field `macros`".to_string()),
                None => Some(format!("expected an object, found {}", json_kind(list))),
            };
            if let Some(reason) = reason {
                return Some(format!("executable `{exe}`: {reason}"));
            }
        }
        Some("neither a macro list nor a map of executables".to_string())
    }
}

fn first_macro_error(macros: &serde_json::Value) -> Option<String> {
    let Some(items) = macros.as_array() else {
        return Some(format!(
            "`macros` must be an array, found {}",
            json_kind(macros)
        ));
    };
    items.iter().enumerate().find_map(|(i, item)| {
        serde_json::from_value::<MacroDef>(item.clone())
            .err()
            .map(|err| {
                let name = item
                    .get("name")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("?");
                format!("macro #{i} ({name}): {err}")
            })
    })
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Wrapper object around a list of macros.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct MacroList {
    pub macros: Vec<MacroDef>,
}

/// One trigger-to-action binding.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct MacroDef {
    /// Unique within its list; used as the state-tracking key.
    pub name: String,

    /// Trigger key (e.g. "f6"). Only `OnBoot` macros may omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Modifier names joined with `&` (e.g. "ctrl&shift"); all must be held.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifier: Option<String>,

    /// What the macro does when triggered.
    #[serde(rename = "type")]
    pub kind: MacroKind,

    /// Key to press (`keyboard_press`) or button description (`click_loop`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_to_press: Option<String>,

    /// Script name in the user functions directory (`function`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,

    /// Seconds between repeated actions.
    #[serde(
        rename = "Interval",
        alias = "interval",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub interval: Option<f64>,

    /// Fire once per press. On a `click_loop` this toggles the loop instead.
    #[serde(default)]
    pub run_once: bool,

    /// Start/stop a repeating action on each press. Ignored for `click_loop`.
    #[serde(default)]
    pub toggle: bool,
}

impl MacroDef {
    /// Trigger key, if one is configured.
    pub fn trigger_key(&self) -> Option<&str> {
        self.key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    /// Modifier names, trimmed, empty entries removed.
    pub fn modifiers(&self) -> impl Iterator<Item = &str> {
        self.modifier
            .as_deref()
            .into_iter()
            .flat_map(|m| m.split(MODIFIER_DELIMITER))
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }

    /// Repetition interval; negative or non-finite values fall back to the default.
    pub fn interval(&self) -> Duration {
        self.interval
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_INTERVAL_SECS))
    }

    /// Button a `click_loop` clicks.
    pub fn mouse_button(&self) -> MouseButton {
        MouseButton::from_description(self.key_to_press.as_deref())
    }

    /// The single trigger policy governing this macro.
    pub fn policy(&self) -> TriggerPolicy {
        let is_loop = self.kind == MacroKind::ClickLoop;
        if self.run_once && is_loop {
            TriggerPolicy::LoopLatch
        } else if self.run_once {
            TriggerPolicy::RunOnce
        } else if self.toggle && !is_loop {
            TriggerPolicy::Toggle
        } else {
            TriggerPolicy::Hold
        }
    }
}

/// Macro action type.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MacroKind {
    /// Press a single key.
    KeyboardPress,
    /// Click a mouse button repeatedly.
    ClickLoop,
    /// Launch a user script.
    Function,
    /// Anything else; logged and ignored.
    #[serde(other)]
    Unknown,
}

/// How key state drives a macro's activation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TriggerPolicy {
    /// `click_loop` with `run_once`: each press starts or stops the click loop.
    LoopLatch,
    /// One action per press-release cycle.
    RunOnce,
    /// Each press arms or disarms a loop repeating the whole action.
    Toggle,
    /// Active only while the trigger is held.
    Hold,
}

/// Mouse button enumeration.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

impl MouseButton {
    /// Parse a loose description such as "Right Click". Defaults to left.
    pub fn from_description(description: Option<&str>) -> Self {
        let description = description.unwrap_or_default().to_lowercase();
        if description.contains("left") {
            MouseButton::Left
        } else if description.contains("right") {
            MouseButton::Right
        } else if description.contains("middle") {
            MouseButton::Middle
        } else {
            MouseButton::Left
        }
    }
}

/// Settings shared by every profile.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
pub struct GlobalSettings {
    /// Seconds the dispatch loop sleeps between ticks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_delay: Option<f64>,

    /// Directory holding user function scripts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functions_dir: Option<PathBuf>,

    /// Program used to run `.py` function scripts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
}

impl GlobalSettings {
    pub fn loop_delay(&self) -> Duration {
        self.loop_delay
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_LOOP_DELAY_SECS))
    }
}

/// Result of resolving a profile to a macro list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub macros: Vec<MacroDef>,
    /// True when the requested profile could not be used and `Desktop` was.
    pub fell_back: bool,
}

impl Config {
    /// Resolve the macro list for `profile`, optionally scoped to `exe`.
    ///
    /// Falls back to the `Desktop` list when the profile is missing, malformed, or has
    /// no entry for `exe`. Without a usable `Desktop` profile the list is empty.
    pub fn resolve_macros(&self, profile: &str, exe: Option<&str>) -> Resolution {
        if let Some(macros) = self
            .profiles
            .get(profile)
            .and_then(|p| p.macros_for(exe))
        {
            return Resolution {
                macros: macros.to_vec(),
                fell_back: false,
            };
        }

        let macros = self
            .profiles
            .get(DESKTOP_PROFILE)
            .and_then(|p| p.macros_for(None))
            .map(<[MacroDef]>::to_vec)
            .unwrap_or_default();
        Resolution {
            macros,
            fell_back: true,
        }
    }

    /// `(process name, profile name)` pairs the dispatcher registers runners for.
    ///
    /// Scoped profiles bind each executable key; a flat profile other than the
    /// reserved ones binds its own name as the process name.
    pub fn process_bindings(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (name, profile) in &self.profiles {
            if name == DESKTOP_PROFILE || name == ON_BOOT_PROFILE {
                continue;
            }
            match profile {
                Profile::Scoped(map) => {
                    out.extend(map.keys().map(|exe| (exe.clone(), name.clone())));
                }
                Profile::Flat(_) => out.push((name.clone(), name.clone())),
                Profile::Malformed(_) => {}
            }
        }
        out
    }

    /// Script names of the `function` macros in the `OnBoot` profile.
    pub fn on_boot_functions(&self) -> Vec<String> {
        self.profiles
            .get(ON_BOOT_PROFILE)
            .and_then(|p| p.macros_for(None))
            .unwrap_or_default()
            .iter()
            .filter(|m| m.kind == MacroKind::Function)
            .filter_map(|m| m.function_name.clone())
            .collect()
    }
}
