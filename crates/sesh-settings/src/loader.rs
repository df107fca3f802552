//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SeshSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `SESH_*` environment overrides (highest priority)
//! 4. Validate

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::SeshSettings;

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

/// Default settings file location (`~/.sesh/settings.json`).
pub fn settings_path() -> PathBuf {
    home_dir().join(".sesh").join("settings.json")
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None => PathBuf::from(path),
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SeshSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<SeshSettings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

/// Load with an injectable environment lookup.
pub fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<SeshSettings> {
    let defaults = serde_json::to_value(SeshSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: SeshSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, arrays and primitives are replaced, and nulls in
/// `source` are skipped.
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
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `SESH_*` overrides. Out-of-range or unparsable values are logged
/// and ignored.
pub fn apply_env_overrides(settings: &mut SeshSettings, env: impl Fn(&str) -> Option<String>) {
    let reader = EnvReader { env: &env };

    if let Some(v) = reader.u64("SESH_GAP_THRESHOLD_MS", 1, 7 * 24 * 3_600_000) {
        settings.clustering.gap_threshold_ms = v;
    }
    if let Some(v) = reader.u64("SESH_MEMBERSHIP_BUFFER_MS", 0, 24 * 3_600_000) {
        settings.clustering.membership_window_buffer_ms = v;
    }
    if let Some(v) = reader.u64("SESH_BACKFILL_BATCH_SIZE", 1, 1_000_000) {
        settings.backfill.batch_size = v as u32;
    }
    if let Some(v) = reader.u64("SESH_BACKFILL_INTERVAL_SECS", 1, 86_400) {
        settings.backfill.interval_secs = v;
    }
    if let Some(v) = reader.u64("SESH_FEED_PAGE_SIZE", 1, u64::from(settings.feed.max_page_size)) {
        settings.feed.default_page_size = v as u32;
    }
    if let Some(v) = reader.string("SESH_DB_PATH") {
        settings.database.path = v;
    }
    if let Some(v) = reader.string("SESH_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = reader.bool("SESH_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<'a, F: Fn(&str) -> Option<String>> {
    env: &'a F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<'_, F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.env)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.env)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.env)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, min, max, "invalid numeric env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn deep_merge_nested_objects() {
        let target = json!({"clustering": {"gapThresholdMs": 1, "membershipWindowBufferMs": 2}});
        let source = json!({"clustering": {"gapThresholdMs": 5}});
        let merged = deep_merge(target, source);
        assert_eq!(
            merged,
            json!({"clustering": {"gapThresholdMs": 5, "membershipWindowBufferMs": 2}})
        );
    }

    #[test]
    fn deep_merge_skips_nulls() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null, "b": 2}));
        assert_eq!(merged, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_with_env(&dir.path().join("absent.json"), no_env).unwrap();
        assert_eq!(settings, SeshSettings::default());
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"backfill": {"batchSize": 250}, "logging": {"json": true}}"#,
        )
        .unwrap();

        let settings = load_with_env(&path, no_env).unwrap();
        assert_eq!(settings.backfill.batch_size, 250);
        assert_eq!(settings.backfill.interval_secs, 300);
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_with_env(&path, no_env), Err(crate::SettingsError::Json(_))));
    }

    #[test]
    fn zero_in_file_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"clustering": {"gapThresholdMs": 0}}"#).unwrap();
        assert!(matches!(
            load_with_env(&path, no_env),
            Err(crate::SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn env_overrides_win() {
        let mut settings = SeshSettings::default();
        apply_env_overrides(
            &mut settings,
            env_of(&[
                ("SESH_GAP_THRESHOLD_MS", "3600000"),
                ("SESH_BACKFILL_BATCH_SIZE", "100"),
                ("SESH_DB_PATH", "/data/sesh.db"),
                ("SESH_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(settings.clustering.gap_threshold_ms, 3_600_000);
        assert_eq!(settings.backfill.batch_size, 100);
        assert_eq!(settings.database.path, "/data/sesh.db");
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = SeshSettings::default();
        apply_env_overrides(
            &mut settings,
            env_of(&[
                ("SESH_GAP_THRESHOLD_MS", "0"),
                ("SESH_BACKFILL_BATCH_SIZE", "lots"),
                ("SESH_FEED_PAGE_SIZE", "1000"),
                ("SESH_LOG_JSON", "maybe"),
                ("SESH_DB_PATH", ""),
            ]),
        );
        assert_eq!(settings, SeshSettings::default());
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nah"), None);
        assert_eq!(parse_u64_range(" 42 ", 1, 100), Some(42));
        assert_eq!(parse_u64_range("0", 1, 100), None);
    }

    #[test]
    fn expand_home_only_touches_tilde_prefix() {
        assert_eq!(expand_home("/abs/path.db"), PathBuf::from("/abs/path.db"));
        assert!(expand_home("~/x.db").ends_with("x.db"));
        assert!(!expand_home("~/x.db").starts_with("~"));
    }
}
