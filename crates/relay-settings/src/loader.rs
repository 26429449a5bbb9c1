//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::RelaySettings;

/// Resolve the default settings path (`~/.interview-relay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home)
        .join(".interview-relay")
        .join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. A file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are logged and ignored. `RELAY_PORT` wins over `PORT`, and
/// `RELAY_DB_PATH` wins over `DATABASE_URL`.
pub fn apply_overrides<F>(settings: &mut RelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("PORT").and_then(|v| parse_in_range("PORT", &v, 1, u64::from(u16::MAX))) {
        settings.server.port = u16::try_from(v).unwrap_or(settings.server.port);
    }
    if let Some(v) =
        read("RELAY_PORT").and_then(|v| parse_in_range("RELAY_PORT", &v, 1, u64::from(u16::MAX)))
    {
        settings.server.port = u16::try_from(v).unwrap_or(settings.server.port);
    }
    if let Some(v) = read("RELAY_SEND_QUEUE")
        .and_then(|v| parse_in_range("RELAY_SEND_QUEUE", &v, 1, 1_000_000))
    {
        settings.server.send_queue_capacity = usize::try_from(v).unwrap_or(settings.server.send_queue_capacity);
    }
    if let Some(v) = read("RELAY_HEARTBEAT_INTERVAL_SECS")
        .and_then(|v| parse_in_range("RELAY_HEARTBEAT_INTERVAL_SECS", &v, 0, 3600))
    {
        settings.server.heartbeat_interval_secs = v;
    }

    if let Some(url) = read("DATABASE_URL") {
        match sqlite_path_from_url(&url) {
            Some(path) => settings.database.path = Some(path),
            None => warn!(key = "DATABASE_URL", "not a sqlite URL, ignoring"),
        }
    }
    if let Some(v) = read("RELAY_DB_PATH") {
        settings.database.path = Some(PathBuf::from(v));
    }

    if let Some(v) = read("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("RELAY_LOG_JSON") {
        match parse_bool(&v) {
            Some(b) => settings.logging.json = b,
            None => warn!(key = "RELAY_LOG_JSON", value = %v, "invalid boolean env var, ignoring"),
        }
    }
}

/// Extract the file path from a `sqlite:///` URL.
///
/// `sqlite:///relative.db` yields `relative.db`; `sqlite:////abs/x.db`
/// yields `/abs/x.db`.
pub fn sqlite_path_from_url(url: &str) -> Option<PathBuf> {
    let rest = url.strip_prefix("sqlite:///")?;
    (!rest.is_empty()).then(|| PathBuf::from(rest))
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_in_range(key: &str, val: &str, min: u64, max: u64) -> Option<u64> {
    let parsed = val.parse::<u64>().ok().filter(|n| (min..=max).contains(n));
    if parsed.is_none() {
        warn!(key, value = %val, "invalid numeric env var, ignoring");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    use crate::errors::SettingsError;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8000, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_scalar_replaces_object() {
        let merged = deep_merge(serde_json::json!({"a": {"b": 1}}), serde_json::json!({"a": 5}));
        assert_eq!(merged["a"], 5);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_file_layer(&dir.path().join("nope.json")).unwrap();
        assert_eq!(s.server.port, 8000);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(br#"{"server":{"port":7001},"database":{"path":"/srv/db.sqlite"}}"#)
            .unwrap();

        let s = load_file_layer(&path).unwrap();
        assert_eq!(s.server.port, 7001);
        assert_eq!(s.server.send_queue_capacity, 256);
        assert_eq!(s.database.path, Some(PathBuf::from("/srv/db.sqlite")));
    }

    #[test]
    fn invalid_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_file_layer(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn env_port_overrides() {
        let mut s = RelaySettings::default();
        apply_overrides(&mut s, env(&[("PORT", "10000")]));
        assert_eq!(s.server.port, 10000);
    }

    #[test]
    fn relay_port_wins_over_port() {
        let mut s = RelaySettings::default();
        apply_overrides(&mut s, env(&[("PORT", "10000"), ("RELAY_PORT", "9100")]));
        assert_eq!(s.server.port, 9100);
    }

    #[test]
    fn invalid_port_ignored() {
        let mut s = RelaySettings::default();
        apply_overrides(&mut s, env(&[("PORT", "70000"), ("RELAY_PORT", "abc")]));
        assert_eq!(s.server.port, 8000);
    }

    #[test]
    fn database_url_parsed() {
        let mut s = RelaySettings::default();
        apply_overrides(&mut s, env(&[("DATABASE_URL", "sqlite:///./data/interview_app.db")]));
        assert_eq!(s.database.path, Some(PathBuf::from("./data/interview_app.db")));
    }

    #[test]
    fn relay_db_path_wins_over_database_url() {
        let mut s = RelaySettings::default();
        apply_overrides(
            &mut s,
            env(&[("DATABASE_URL", "sqlite:///a.db"), ("RELAY_DB_PATH", "/b.db")]),
        );
        assert_eq!(s.database.path, Some(PathBuf::from("/b.db")));
    }

    #[test]
    fn non_sqlite_database_url_ignored() {
        let mut s = RelaySettings::default();
        apply_overrides(&mut s, env(&[("DATABASE_URL", "postgres://u@h/db")]));
        assert!(s.database.path.is_none());
    }

    #[test]
    fn sqlite_url_forms() {
        assert_eq!(sqlite_path_from_url("sqlite:////abs/x.db"), Some(PathBuf::from("/abs/x.db")));
        assert_eq!(sqlite_path_from_url("sqlite:///rel.db"), Some(PathBuf::from("rel.db")));
        assert_eq!(sqlite_path_from_url("sqlite:///"), None);
        assert_eq!(sqlite_path_from_url("mysql://x"), None);
    }

    #[test]
    fn logging_overrides() {
        let mut s = RelaySettings::default();
        apply_overrides(&mut s, env(&[("RELAY_LOG_LEVEL", "debug"), ("RELAY_LOG_JSON", "yes")]));
        assert_eq!(s.logging.level, "debug");
        assert!(s.logging.json);
    }

    #[test]
    fn heartbeat_and_queue_overrides() {
        let mut s = RelaySettings::default();
        apply_overrides(
            &mut s,
            env(&[("RELAY_HEARTBEAT_INTERVAL_SECS", "15"), ("RELAY_SEND_QUEUE", "32")]),
        );
        assert_eq!(s.server.heartbeat_interval_secs, 15);
        assert_eq!(s.server.send_queue_capacity, 32);
    }

    #[test]
    fn empty_values_ignored() {
        let mut s = RelaySettings::default();
        apply_overrides(&mut s, env(&[("RELAY_HOST", ""), ("RELAY_LOG_LEVEL", "")]));
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.logging.level, "info");
    }

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
