//! Configuration for the live-reload server.
//!
//! Layered, lowest precedence first:
//! - Default values
//! - TOML configuration file (`.mdlive/settings.toml`, found by walking up
//!   from the current directory, or an explicit `--config` path)
//! - Environment variable overrides
//! - CLI argument overrides (applied by the caller)
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `MDLIVE_` and use double
//! underscores to separate nested levels:
//! - `MDLIVE_SERVER__BIND=0.0.0.0:4000` sets `server.bind`
//! - `MDLIVE_WATCH__DEBOUNCE_MS=50` sets `watch.debounce_ms`
//! - `MDLIVE_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::broadcast::DEFAULT_KEEPALIVE_SECS;
use crate::watcher::{DEFAULT_DEBOUNCE_MS, DEFAULT_SIGNAL_CAPACITY};

/// Directory holding the settings file.
pub const CONFIG_DIR: &str = ".mdlive";
/// Settings file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "settings.toml";

const ENV_PREFIX: &str = "MDLIVE_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Only files under this directory may be served
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// File watching and push channel settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatchConfig {
    /// Quiet period after the first raw change signal
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Seconds between keepalive pings on open channels
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// Undelivered messages buffered per channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Raw signals buffered between OS callbacks and the dispatcher
    #[serde(default = "default_signal_capacity")]
    pub signal_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `mdlive::watcher = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}
fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}
fn default_keepalive_secs() -> u64 {
    DEFAULT_KEEPALIVE_SECS
}
fn default_channel_capacity() -> usize {
    16
}
fn default_signal_capacity() -> usize {
    DEFAULT_SIGNAL_CAPACITY
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            root: None,
            server: ServerConfig::default(),
            watch: WatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            keepalive_secs: default_keepalive_secs(),
            channel_capacity: default_channel_capacity(),
            signal_capacity: default_signal_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources, discovering the settings file.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file plus the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nesting; single underscores stay
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find `.mdlive/settings.toml` from the current directory upwards.
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join(CONFIG_FILE));
            }
        }

        None
    }

    /// Save current configuration to file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Write a default settings file under the current directory.
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join(CONFIG_FILE);
        Self::init_config_file_at(&config_path, force)?;
        Ok(config_path)
    }

    /// Write default settings to `path`, refusing to overwrite unless `force`.
    pub fn init_config_file_at(
        path: impl AsRef<Path>,
        force: bool,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let path = path.as_ref();
        if !force && path.exists() {
            return Err(format!(
                "Configuration file already exists at: {}. Use --force to overwrite",
                path.display()
            )
            .into());
        }

        Settings::default().save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.server.bind, "127.0.0.1:3000");
        assert_eq!(settings.watch.debounce_ms, 200);
        assert_eq!(settings.watch.keepalive_secs, 30);
        assert!(settings.root.is_none());
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
root = "/srv/notes"

[server]
bind = "127.0.0.1:8123"

[watch]
debounce_ms = 75
keepalive_secs = 10

[logging]
default = "debug"

[logging.modules]
"mdlive::watcher" = "trace"
"#;

        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.root, Some(PathBuf::from("/srv/notes")));
        assert_eq!(settings.server.bind, "127.0.0.1:8123");
        assert_eq!(settings.watch.debounce_ms, 75);
        assert_eq!(settings.watch.keepalive_secs, 10);
        // Untouched values keep their defaults
        assert_eq!(settings.watch.channel_capacity, 16);
        assert_eq!(settings.logging.default, "debug");
        assert_eq!(settings.logging.modules["mdlive::watcher"], "trace");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load_from(temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.watch, WatchConfig::default());
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.watch.debounce_ms = 20;
        settings.server.bind = "127.0.0.1:9999".to_string();

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.watch.debounce_ms, 20);
        assert_eq!(loaded.server.bind, "127.0.0.1:9999");
    }

    #[test]
    fn test_init_refuses_overwrite_without_force() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(CONFIG_DIR).join(CONFIG_FILE);

        Settings::init_config_file_at(&config_path, false).unwrap();
        fs::write(&config_path, "[watch]\ndebounce_ms = 5\n").unwrap();

        let err = Settings::init_config_file_at(&config_path, false).unwrap_err();
        assert!(err.to_string().contains("--force"));
        assert_eq!(Settings::load_from(&config_path).unwrap().watch.debounce_ms, 5);

        Settings::init_config_file_at(&config_path, true).unwrap();
        assert_eq!(Settings::load_from(&config_path).unwrap().watch.debounce_ms, 200);
    }

    #[test]
    fn test_invalid_value_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[watch]\ndebounce_ms = \"soon\"\n").unwrap();

        assert!(Settings::load_from(&config_path).is_err());
    }
}
