//! Demo configuration – reads/writes `courier.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default file name looked up in the working directory.
pub const DEFAULT_FILE: &str = "courier.toml";

/// Settings for the clock / squarer demo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Pause between two clock ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Number of ticks before the clock announces termination.
    #[serde(default = "default_duration_ticks")]
    pub duration_ticks: u64,

    /// How many workers answer `Square` requests.
    #[serde(default = "default_squarers")]
    pub squarers: usize,

    /// How long the requester waits for each answer.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_tick_interval_ms() -> u64 {
    100
}
fn default_duration_ticks() -> u64 {
    20
}
fn default_squarers() -> usize {
    2
}
fn default_request_timeout_ms() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            duration_ticks: default_duration_ticks(),
            squarers: default_squarers(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Config {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Reject settings the demo cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.duration_ticks == 0 {
            return Err("duration_ticks must be at least 1".to_string());
        }
        if self.squarers == 0 {
            return Err("squarers must be at least 1".to_string());
        }
        if self.request_timeout_ms == 0 {
            return Err("request_timeout_ms must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Pick the config file: `--config` first, then `COURIER_CONFIG`, then
/// `./courier.toml`.
pub fn resolve_path(cli: Option<PathBuf>) -> PathBuf {
    resolve_path_with(cli, std::env::var("COURIER_CONFIG").ok())
}

pub(crate) fn resolve_path_with(cli: Option<PathBuf>, env: Option<String>) -> PathBuf {
    cli.or_else(|| env.filter(|v| !v.is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FILE))
}

/// Load the config at `path` and apply `COURIER_*` overrides.
pub fn load(path: &Path) -> Result<Config, String> {
    let mut cfg = load_from(path)?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Read `path`; a missing file yields the defaults.
pub(crate) fn load_from(path: &Path) -> Result<Config, String> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))
}

/// Apply `COURIER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `COURIER_TICK_INTERVAL_MS` | `tick_interval_ms` |
/// | `COURIER_DURATION_TICKS` | `duration_ticks` |
/// | `COURIER_SQUARERS` | `squarers` |
/// | `COURIER_REQUEST_TIMEOUT_MS` | `request_timeout_ms` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(v) = env_number("COURIER_TICK_INTERVAL_MS") {
        cfg.tick_interval_ms = v;
    }
    if let Some(v) = env_number("COURIER_DURATION_TICKS") {
        cfg.duration_ticks = v;
    }
    if let Some(v) = env_number("COURIER_SQUARERS") {
        cfg.squarers = v;
    }
    if let Some(v) = env_number("COURIER_REQUEST_TIMEOUT_MS") {
        cfg.request_timeout_ms = v;
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

/// Write `cfg` to `path`, creating parent directories as needed.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_path_wins_over_env() {
        let p = resolve_path_with(Some(PathBuf::from("/etc/courier.toml")), Some("/tmp/x.toml".into()));
        assert_eq!(p, PathBuf::from("/etc/courier.toml"));
    }

    #[test]
    fn env_path_used_without_cli_flag() {
        let p = resolve_path_with(None, Some("/tmp/x.toml".into()));
        assert_eq!(p, PathBuf::from("/tmp/x.toml"));
    }

    #[test]
    fn falls_back_to_working_directory() {
        assert_eq!(resolve_path_with(None, None), PathBuf::from(DEFAULT_FILE));
        assert_eq!(resolve_path_with(None, Some(String::new())), PathBuf::from(DEFAULT_FILE));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let cfg = load_from(&dir.path().join("absent.toml")).expect("no error");
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn roundtrip_custom_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("nested").join(DEFAULT_FILE);
        let cfg = Config {
            tick_interval_ms: 5,
            duration_ticks: 3,
            squarers: 4,
            request_timeout_ms: 250,
        };
        save_to(&cfg, &path).expect("save");
        assert_eq!(load_from(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join(DEFAULT_FILE);
        std::fs::write(&path, "squarers = 3\n").expect("write");
        let cfg = load_from(&path).expect("load");
        assert_eq!(cfg.squarers, 3);
        assert_eq!(cfg.duration_ticks, default_duration_ticks());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join(DEFAULT_FILE);
        std::fs::write(&path, "squarers = \"many\"\n").expect("write");
        let err = load_from(&path).expect_err("should not parse");
        assert!(err.starts_with("Failed to parse config"));
    }

    #[test]
    fn validate_rejects_zero_squarers() {
        let cfg = Config {
            squarers: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn apply_env_overrides_changes_squarers() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("COURIER_SQUARERS", "6") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.squarers, 6);
        unsafe { std::env::remove_var("COURIER_SQUARERS") };
    }

    #[test]
    fn apply_env_overrides_changes_tick_interval() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("COURIER_TICK_INTERVAL_MS", " 15 ") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.tick_interval_ms, 15);
        unsafe { std::env::remove_var("COURIER_TICK_INTERVAL_MS") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_number() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("COURIER_DURATION_TICKS", "forever") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.duration_ticks, default_duration_ticks());
        unsafe { std::env::remove_var("COURIER_DURATION_TICKS") };
    }
}
