use schemars::{Schema, schema_for};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, warn};

use super::models::{Config, MacroDef, MacroKind, ON_BOOT_PROFILE, Profile};
use crate::error::ConfigError;
use crate::executor::actions::enigo_key;
use crate::utils::keys::keycodes;

/// Load configuration from a string slice.
pub fn load_from_str(s: &str) -> Result<Config, ConfigError> {
    let cfg: Config = serde_json::from_str(s)?;
    validate_config(&cfg);
    Ok(cfg)
}

/// Load configuration from any reader (e.g., a file).
pub fn load_from_reader<R: Read>(reader: R) -> Result<Config, ConfigError> {
    let cfg: Config = serde_json::from_reader(reader)?;
    validate_config(&cfg);
    Ok(cfg)
}

/// Load configuration from a file path synchronously.
pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path_ref = path.as_ref();
    let shown = path_ref.display().to_string();
    let file = File::open(path_ref).map_err(|e| ConfigError::read(&shown, e))?;
    let cfg: Config = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| ConfigError::parse(&shown, e))?;
    validate_config(&cfg);
    debug!(target: "keyweave::config", path = %shown, "Loaded config");
    Ok(cfg)
}

/// Load configuration from a file path asynchronously (Tokio).
pub async fn load_from_path_async<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    use tokio::fs;
    let path_ref = path.as_ref();
    let shown = path_ref.display().to_string();
    let bytes = fs::read(path_ref)
        .await
        .map_err(|e| ConfigError::read(&shown, e))?;
    let cfg: Config =
        serde_json::from_slice(&bytes).map_err(|e| ConfigError::parse(&shown, e))?;
    validate_config(&cfg);
    debug!(target: "keyweave::config", path = %shown, "Loaded config");
    Ok(cfg)
}

/// Current modification time of the config file.
pub fn modified_time<P: AsRef<Path>>(path: P) -> io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}

/// Whether the file's modification time differs from `last_seen`.
///
/// Unreadable metadata counts as unchanged so a file that is briefly missing while an
/// editor rewrites it does not trigger a reload.
pub fn has_changed<P: AsRef<Path>>(path: P, last_seen: Option<SystemTime>) -> bool {
    match modified_time(path) {
        Ok(mtime) => Some(mtime) != last_seen,
        Err(_) => false,
    }
}

/// Generate the JSON Schema for the Config model (for external validation or tooling).
pub fn generate_schema() -> Schema {
    schema_for!(Config)
}

/// Write the JSON Schema for the Config model to any writer (pretty-printed).
pub fn write_schema_to_writer<W: Write>(mut writer: W) -> anyhow::Result<()> {
    use anyhow::Context;
    let schema = generate_schema();
    let json = serde_json::to_string_pretty(&schema).context("Failed to serialize schema")?;
    writer
        .write_all(json.as_bytes())
        .context("Failed to write schema to writer")?;
    Ok(())
}

/// Log everything in the document that will not behave as the author probably expects.
///
/// Never fails: the engine tolerates all of these at runtime, and a document with one
/// bad profile should still drive the others.
pub fn validate_config(cfg: &Config) {
    for (name, profile) in &cfg.profiles {
        match profile {
            Profile::Flat(list) => validate_macros(name, None, &list.macros),
            Profile::Scoped(map) => {
                for (exe, list) in map {
                    validate_macros(name, Some(exe), &list.macros);
                }
            }
            Profile::Malformed(_) => warn!(
                target: "keyweave::config",
                profile = %name,
                reason = %profile.malformed_reason().unwrap_or_default(),
                "Profile could not be parsed; it will fall back to Desktop"
            ),
        }
    }
}

fn validate_macros(profile: &str, exe: Option<&str>, macros: &[MacroDef]) {
    let exe = exe.unwrap_or("-");
    let mut seen = BTreeSet::new();
    for m in macros {
        if !seen.insert(m.name.as_str()) {
            warn!(
                target: "keyweave::config",
                %profile, %exe, name = %m.name,
                "Duplicate macro name; both macros share trigger state"
            );
        }
        if m.trigger_key().is_none() && profile != ON_BOOT_PROFILE {
            warn!(
                target: "keyweave::config",
                %profile, %exe, name = %m.name,
                "Macro has no trigger key and will never fire"
            );
        }
        for key in unresolved_key_names(m) {
            warn!(
                target: "keyweave::config",
                %profile, %exe, name = %m.name, %key,
                "Unknown trigger or modifier key; the macro will never fire"
            );
        }
        if let (MacroKind::KeyboardPress, Some(key)) = (&m.kind, m.key_to_press.as_deref()) {
            if enigo_key(key).is_none() {
                warn!(
                    target: "keyweave::config",
                    %profile, %exe, name = %m.name, %key,
                    "Unknown key_to_press; the key cannot be synthesized"
                );
            }
        }
        match m.kind {
            MacroKind::Function if m.function_name.is_none() => warn!(
                target: "keyweave::config",
                %profile, %exe, name = %m.name,
                "Function macro has no function_name"
            ),
            MacroKind::KeyboardPress if m.key_to_press.is_none() => warn!(
                target: "keyweave::config",
                %profile, %exe, name = %m.name,
                "Keyboard macro has no key_to_press"
            ),
            MacroKind::Unknown => warn!(
                target: "keyweave::config",
                %profile, %exe, name = %m.name,
                "Unknown macro type; the macro will do nothing"
            ),
            _ => {}
        }
    }
}

/// Trigger and modifier names of `m` that do not name any physical key.
fn unresolved_key_names(m: &MacroDef) -> Vec<&str> {
    m.trigger_key()
        .into_iter()
        .chain(m.modifiers())
        .flat_map(chord_parts)
        .filter(|name| keycodes(name).is_none())
        .collect()
}

fn chord_parts(name: &str) -> Vec<&str> {
    if name.len() > 1 && name.contains('+') {
        name.split('+')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect()
    } else {
        vec![name.trim()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::time::Duration;

    const SCENARIO: &str = r#"{"profiles":{"Desktop":{"macros":[{"name":"a","key":"f6","type":"keyboard_press","key_to_press":"a","Interval":0.01,"run_once":true}]}}}"#;

    #[test]
    fn test_load_from_str() {
        let cfg = load_from_str(SCENARIO).unwrap();
        let macros = cfg.resolve_macros("Desktop", None).macros;
        assert_eq!(macros.len(), 1);
        assert_eq!(macros[0].key.as_deref(), Some("f6"));
        assert!(macros[0].run_once);
    }

    #[test]
    fn test_load_errors() {
        assert!(matches!(load_from_str("{ not json"), Err(ConfigError::Json(_))));

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(load_from_path(&missing), Err(ConfigError::Read { .. })));

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "[1, 2").unwrap();
        assert!(matches!(load_from_path(&bad), Err(ConfigError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_load_async_matches_sync() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, SCENARIO).unwrap();
        let a = load_from_path_async(&path).await.unwrap();
        let b = load_from_path(&path).unwrap();
        assert_eq!(
            a.resolve_macros("Desktop", None),
            b.resolve_macros("Desktop", None)
        );
    }

    #[test]
    fn test_has_changed_tracks_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, SCENARIO).unwrap();

        let seen = modified_time(&path).ok();
        assert!(!has_changed(&path, seen));
        assert!(has_changed(&path, None));

        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(10))
            .unwrap();
        assert!(has_changed(&path, seen));

        assert!(!has_changed(dir.path().join("gone.json"), seen));
    }

    #[test]
    fn test_unresolved_key_names() {
        let def = |key: &str, modifier: Option<&str>| -> MacroDef {
            serde_json::from_value(serde_json::json!({
                "name": "m", "key": key, "modifier": modifier,
                "type": "keyboard_press", "key_to_press": "a"
            }))
            .unwrap()
        };
        assert!(unresolved_key_names(&def("insert", Some("windows&ctrl"))).is_empty());
        assert!(unresolved_key_names(&def("numpad 1", None)).is_empty());
        assert!(unresolved_key_names(&def("ctrl+alt+m", None)).is_empty());
        assert_eq!(
            unresolved_key_names(&def("insert", Some("windows&hyper"))),
            vec!["hyper"]
        );
        assert_eq!(unresolved_key_names(&def("ctrl+bogus", None)), vec!["bogus"]);
        assert_eq!(unresolved_key_names(&def("f13", None)), vec!["f13"]);
    }

    #[test]
    fn test_schema_mentions_profiles() {
        let mut out = Vec::new();
        write_schema_to_writer(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("profiles"));
        assert!(text.contains("loop_delay"));
    }
}
