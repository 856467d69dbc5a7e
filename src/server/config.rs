//! Process wide configuration for the connection core.
//!
//! The values are written by the configuration loader at startup or reload
//! and read lock-free by every connection. Readers tolerate stale values
//! across operation boundaries.

use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

static SETSTAT_MODE: AtomicI32 = AtomicI32::new(0);
static SHUTTING_DOWN: AtomicBool = AtomicBool::new(false);

/// How setstat requests (chmod, chown, chtimes) are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetstatMode {
    /// Perform the backend call.
    Honor,
    /// Silently ignore the request and report success.
    Ignore,
    /// Perform the backend call but ignore "unsupported" failures.
    IgnoreErrors,
}

impl SetstatMode {
    fn from_i32(value: i32) -> SetstatMode {
        match value {
            1 => SetstatMode::Ignore,
            2 => SetstatMode::IgnoreErrors,
            _ => SetstatMode::Honor,
        }
    }

    fn as_i32(self) -> i32 {
        match self {
            SetstatMode::Honor => 0,
            SetstatMode::Ignore => 1,
            SetstatMode::IgnoreErrors => 2,
        }
    }
}

/// The deserializable configuration record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Setstat mode: 0 honor, 1 ignore, 2 honor but ignore unsupported
    /// errors.
    #[serde(default)]
    pub setstat_mode: i32,
}

impl Config {
    /// Parses a configuration from its JSON representation.
    pub fn from_json(data: &str) -> serde_json::Result<Config> {
        serde_json::from_str(data)
    }

    /// Publishes this configuration process wide.
    pub fn initialize(&self) {
        SETSTAT_MODE.store(SetstatMode::from_i32(self.setstat_mode).as_i32(), Ordering::Relaxed);
    }
}

/// The currently configured setstat mode.
pub fn setstat_mode() -> SetstatMode {
    SetstatMode::from_i32(SETSTAT_MODE.load(Ordering::Relaxed))
}

/// Replaces the setstat mode. Reserved for the configuration loader.
pub fn set_setstat_mode(mode: SetstatMode) {
    SETSTAT_MODE.store(mode.as_i32(), Ordering::Relaxed);
}

/// True once the server started shutting down. New filesystem operations are
/// rejected from that point on.
pub fn is_shutting_down() -> bool {
    SHUTTING_DOWN.load(Ordering::Relaxed)
}

/// Marks the server as shutting down or back up again.
pub fn set_shutting_down(value: bool) {
    SHUTTING_DOWN.store(value, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setstat_mode_roundtrip() {
        assert_eq!(SetstatMode::from_i32(0), SetstatMode::Honor);
        assert_eq!(SetstatMode::from_i32(1), SetstatMode::Ignore);
        assert_eq!(SetstatMode::from_i32(2), SetstatMode::IgnoreErrors);
        // out of range values fall back to honoring the request
        assert_eq!(SetstatMode::from_i32(42), SetstatMode::Honor);
    }

    #[test]
    fn config_parses_from_json() {
        let config = Config::from_json(r#"{"setstat_mode": 2}"#).unwrap();
        assert_eq!(config.setstat_mode, 2);
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config.setstat_mode, 0);
    }
}
