//! Settings loading.
//!
//! The file is partial: every struct is `#[serde(default)]`, so keys missing
//! from the file keep their compiled default. Explicit `null` values are
//! treated the same as missing keys. `CVPC_*` environment variables are
//! applied last.

use std::fmt::Display;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::CvpcSettings;

/// `~/.cvpc/settings.json`, falling back to `/tmp` when `HOME` is unset.
pub fn settings_path() -> PathBuf {
    let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
    home.join(".cvpc").join("settings.json")
}

/// Load [`settings_path`] and apply environment overrides.
pub fn load_settings() -> Result<CvpcSettings> {
    load_settings_from_path(&settings_path())
}

/// Load `path` and apply environment overrides.
///
/// A missing file yields defaults. An unreadable or malformed one is an error.
pub fn load_settings_from_path(path: &Path) -> Result<CvpcSettings> {
    let mut settings = read_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn read_file(path: &Path) -> Result<CvpcSettings> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(CvpcSettings::default());
        }
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    debug!(path = %path.display(), "loading settings file");

    let parse_err = |source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    };
    let mut raw: Value = serde_json::from_str(&text).map_err(parse_err)?;
    drop_nulls(&mut raw);
    serde_json::from_value(raw).map_err(parse_err)
}

/// Remove `null` object members at every depth so they fall back to defaults.
pub fn drop_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(drop_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(drop_nulls),
        _ => {}
    }
}

/// Apply `CVPC_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut CvpcSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply `CVPC_*` overrides read through `lookup`.
///
/// Empty values are ignored. Numbers outside their accepted range are
/// ignored with a warning, leaving the file or default value in place.
pub fn apply_overrides_from<F>(settings: &mut CvpcSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvSource(lookup);
    let ws = &mut settings.ws;

    if let Some(url) = env.text("CVPC_WS_URL") {
        ws.url = url;
    }
    env.number("CVPC_WS_CONNECT_TIMEOUT_MS", 1..=600_000, &mut ws.connect_timeout_ms);
    env.number("CVPC_WS_PING_INTERVAL_MS", 0..=3_600_000, &mut ws.ping_interval_ms);
    env.number("CVPC_WS_PING_TIMEOUT_MS", 1..=600_000, &mut ws.ping_timeout_ms);
    env.number("CVPC_WS_SEND_QUEUE_CAPACITY", 1..=1_000_000, &mut ws.send_queue_capacity);
    env.number("CVPC_WS_SEND_RETRY_DELAY_MS", 0..=60_000, &mut ws.send_retry_delay_ms);

    if let Some(level) = env.text("CVPC_LOG_LEVEL") {
        settings.logging.level = level;
    }
}

struct EnvSource<F>(F);

impl<F: Fn(&str) -> Option<String>> EnvSource<F> {
    fn text(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.trim().is_empty())
    }

    fn number<T>(&self, name: &str, range: std::ops::RangeInclusive<T>, slot: &mut T)
    where
        T: FromStr + PartialOrd + Display,
    {
        let Some(raw) = self.text(name) else {
            return;
        };
        match raw.trim().parse::<T>() {
            Ok(n) if range.contains(&n) => *slot = n,
            _ => warn!(
                key = name,
                value = %raw,
                min = %range.start(),
                max = %range.end(),
                "ignoring out-of-range environment override"
            ),
        }
    }
}

/// Fractional seconds, as accepted on the command line, to milliseconds.
///
/// Negative, non-finite, and longer-than-a-year values are rejected.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn secs_to_millis(secs: f64) -> Option<u64> {
    const YEAR_SECS: f64 = 31_536_000.0;
    (secs.is_finite() && (0.0..=YEAR_SECS).contains(&secs))
        .then(|| (secs * 1000.0).round() as u64)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::WsSettings;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    fn write_settings(body: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, body).unwrap();
        (dir, path)
    }

    #[test]
    fn missing_file_gives_defaults() {
        let settings = read_file(Path::new("/nonexistent/cvpc/settings.json")).unwrap();
        assert_eq!(settings.ws, WsSettings::default());
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let (_dir, path) = write_settings(
            r#"{"ws": {"url": "wss://edge.example.com", "pingTimeoutMs": 4000}}"#,
        );
        let settings = read_file(&path).unwrap();
        assert_eq!(settings.ws.url, "wss://edge.example.com");
        assert_eq!(settings.ws.ping_timeout_ms, 4000);
        assert_eq!(settings.ws.connect_timeout_ms, 10_000);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn null_values_fall_back_to_defaults() {
        let (_dir, path) = write_settings(r#"{"ws": {"url": null, "pingIntervalMs": 0}, "logging": null}"#);
        let settings = read_file(&path).unwrap();
        assert!(settings.ws.url.is_empty());
        assert_eq!(settings.ws.ping_interval_ms, 0);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let (_dir, path) = write_settings("not valid json");
        assert_matches!(read_file(&path), Err(SettingsError::Parse { path: p, .. }) if p == path);
    }

    #[test]
    fn wrong_type_is_a_parse_error() {
        let (_dir, path) = write_settings(r#"{"ws": {"connectTimeoutMs": "soon"}}"#);
        assert_matches!(read_file(&path), Err(SettingsError::Parse { .. }));
    }

    #[test]
    fn directory_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(read_file(dir.path()), Err(SettingsError::Read { .. }));
    }

    #[test]
    fn drop_nulls_recurses_into_arrays() {
        let mut value = json!({"a": null, "b": [{"c": null, "d": 1}], "e": {"f": null}});
        drop_nulls(&mut value);
        assert_eq!(value, json!({"b": [{"d": 1}], "e": {}}));
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        let mut settings = CvpcSettings::default();
        settings.ws.url = "ws://from-file".to_owned();
        apply_overrides_from(
            &mut settings,
            env(&[
                ("CVPC_WS_URL", "ws://from-env"),
                ("CVPC_WS_CONNECT_TIMEOUT_MS", "2500"),
                ("CVPC_WS_PING_INTERVAL_MS", "0"),
                ("CVPC_WS_SEND_QUEUE_CAPACITY", " 16 "),
                ("CVPC_WS_SEND_RETRY_DELAY_MS", "5"),
                ("CVPC_LOG_LEVEL", "debug"),
            ]),
        );
        assert_eq!(settings.ws.url, "ws://from-env");
        assert_eq!(settings.ws.connect_timeout_ms, 2500);
        assert_eq!(settings.ws.ping_interval_ms, 0);
        assert_eq!(settings.ws.send_queue_capacity, 16);
        assert_eq!(settings.ws.send_retry_delay_ms, 5);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn bad_env_values_are_ignored() {
        let mut settings = CvpcSettings::default();
        apply_overrides_from(
            &mut settings,
            env(&[
                ("CVPC_WS_CONNECT_TIMEOUT_MS", "soon"),
                ("CVPC_WS_PING_TIMEOUT_MS", "0"),
                ("CVPC_WS_PING_INTERVAL_MS", "9999999999"),
                ("CVPC_WS_SEND_QUEUE_CAPACITY", "-1"),
                ("CVPC_WS_URL", "  "),
            ]),
        );
        assert_eq!(settings.ws, WsSettings::default());
    }

    #[test]
    fn secs_to_millis_conversion() {
        assert_eq!(secs_to_millis(10.0), Some(10_000));
        assert_eq!(secs_to_millis(0.25), Some(250));
        assert_eq!(secs_to_millis(0.0), Some(0));
        assert_eq!(secs_to_millis(-1.0), None);
        assert_eq!(secs_to_millis(f64::NAN), None);
        assert_eq!(secs_to_millis(f64::INFINITY), None);
    }
}
