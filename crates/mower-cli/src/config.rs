//! Configuration Vault – reads/writes `~/.mower/config.toml`.

use mower_runtime::ControllerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted daemon configuration stored in `~/.mower/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket URL of the relay the mower reports to.
    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    /// Port the relay listens on when `mowerd relay` is run.
    #[serde(default = "default_relay_port")]
    pub relay_port: u16,

    /// Stream camera frames upstream.
    #[serde(default = "default_video_enabled")]
    pub video_enabled: bool,

    /// Loop timing, thresholds and speeds.
    #[serde(default)]
    pub controller: ControllerConfig,
}

fn default_relay_url() -> String {
    "ws://localhost:5000".to_string()
}
fn default_relay_port() -> u16 {
    5000
}
fn default_video_enabled() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            relay_port: default_relay_port(),
            video_enabled: default_video_enabled(),
            controller: ControllerConfig::default(),
        }
    }
}

/// Return the path to `~/.mower/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".mower").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `MOWER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `MOWER_RELAY_URL` | `relay_url` |
/// | `MOWER_RELAY_PORT` | `relay_port` |
/// | `MOWER_VIDEO_ENABLED` | `video_enabled` (`true`/`false`/`1`/`0`) |
/// | `MOWER_OBSTACLE_THRESHOLD_CM` | `controller.obstacle_threshold_cm` |
/// | `MOWER_HEARTBEAT_TIMEOUT_MS` | `controller.heartbeat_timeout_ms` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("MOWER_RELAY_URL") {
        cfg.relay_url = v;
    }
    if let Some(port) = lookup("MOWER_RELAY_PORT").and_then(|v| v.parse::<u16>().ok()) {
        cfg.relay_port = port;
    }
    if let Some(enabled) = lookup("MOWER_VIDEO_ENABLED").and_then(|v| parse_flag(&v)) {
        cfg.video_enabled = enabled;
    }
    if let Some(cm) = lookup("MOWER_OBSTACLE_THRESHOLD_CM").and_then(|v| v.parse::<f32>().ok()) {
        cfg.controller.obstacle_threshold_cm = cm;
    }
    if let Some(ms) = lookup("MOWER_HEARTBEAT_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
        cfg.controller.heartbeat_timeout_ms = ms;
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Save the config to disk, creating `~/.mower/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
