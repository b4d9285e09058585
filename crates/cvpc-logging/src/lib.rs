//! # cvpc-logging
//!
//! Structured logging with `tracing`.
//!
//! This crate provides:
//! - [`init_subscriber`] for setting up the global `tracing` subscriber
//! - [`effective_level`] for folding `--debug` / `-v` flags into a level
//! - [`capture_logs`] for asserting on emitted events in tests
//!
//! Log context (connection URL, event type, frame size) travels as structured
//! fields on each event rather than being formatted into the message.

#![deny(unsafe_code)]

pub mod capture;

pub use capture::{CapturedEvent, CapturedLogs, capture_logs};

/// Level names ordered from least to most verbose.
const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Initialize the global tracing subscriber with stderr output.
///
/// Call once at application startup. Subsequent calls are no-ops.
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init fails if a global subscriber is already installed
    let _ = subscriber.try_init();
}

/// Normalize a level name, accepting common aliases.
///
/// Returns `None` for names that do not map to a `tracing` level.
pub fn normalize_level(name: &str) -> Option<&'static str> {
    match name.trim().to_lowercase().as_str() {
        "critical" | "fatal" | "error" => Some("error"),
        "warning" | "warn" => Some("warn"),
        "info" => Some("info"),
        "debug" => Some("debug"),
        "trace" | "notset" => Some("trace"),
        _ => None,
    }
}

/// Fold the configured level and the command-line flags into one level.
///
/// `debug` forces at least `debug`; each `verbose` step raises verbosity by
/// one level, saturating at `trace`. Unknown names fall back to `info`.
pub fn effective_level(base: &str, debug: bool, verbose: u8) -> &'static str {
    let base = normalize_level(base).unwrap_or("info");
    let mut idx = LEVELS.iter().position(|l| *l == base).unwrap_or(2);
    if debug {
        idx = idx.max(3);
    }
    idx = (idx + usize::from(verbose)).min(LEVELS.len() - 1);
    LEVELS[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_subscriber_does_not_panic() {
        // Multiple calls should be safe (no-op after first)
        init_subscriber("warn");
        init_subscriber("debug");
    }

    #[test]
    fn normalize_aliases() {
        assert_eq!(normalize_level("WARNING"), Some("warn"));
        assert_eq!(normalize_level("critical"), Some("error"));
        assert_eq!(normalize_level(" info "), Some("info"));
        assert_eq!(normalize_level("notset"), Some("trace"));
        assert_eq!(normalize_level("loud"), None);
    }

    #[test]
    fn effective_level_passthrough() {
        assert_eq!(effective_level("warn", false, 0), "warn");
        assert_eq!(effective_level("info", false, 0), "info");
    }

    #[test]
    fn debug_flag_forces_debug() {
        assert_eq!(effective_level("error", true, 0), "debug");
        // already more verbose than debug stays put
        assert_eq!(effective_level("trace", true, 0), "trace");
    }

    #[test]
    fn verbose_steps_up_and_saturates() {
        assert_eq!(effective_level("info", false, 1), "debug");
        assert_eq!(effective_level("info", false, 2), "trace");
        assert_eq!(effective_level("info", true, 5), "trace");
    }

    #[test]
    fn unknown_base_falls_back_to_info() {
        assert_eq!(effective_level("shouty", false, 0), "info");
    }
}
