//! Configuration management for picapture.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::capture::CommandTemplate;
use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default configuration directory name.
const CONFIG_DIR_NAME: &str = "picapture";

/// Prefix for namespaced environment variables.
const ENV_PREFIX: &str = "PICAPTURE_";

/// Environment names understood by earlier deployments of the capture
/// service, mapped onto their configuration keys.
const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("OUTPUT_DIR", "capture.output_dir"),
    ("HOST_OUTPUT_PATH", "capture.host_output_path"),
    ("CAPTURE_CMD", "capture.command"),
    ("CAPTURE_INTERVAL", "capture.interval_secs"),
    ("MAX_SAVED", "retention.max_saved"),
    ("REDIS_HOST", "store.host"),
    ("REDIS_PORT", "store.port"),
    ("REDIS_DB", "store.db"),
    ("REDIS_KEY", "store.key"),
];

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables prefixed with `PICAPTURE_` (sections separated
///    by `__`, e.g. `PICAPTURE_STORE__HOST`)
/// 2. Unprefixed legacy variables such as `OUTPUT_DIR` and `REDIS_HOST`
/// 3. TOML config file at `~/.config/picapture/config.toml`
/// 4. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capture configuration.
    pub capture: CaptureConfig,
    /// Retention configuration.
    pub retention: RetentionConfig,
    /// Shared store configuration.
    pub store: StoreConfig,
}

/// Capture-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Directory capture files are written to and rotated in.
    pub output_dir: PathBuf,
    /// Host path corresponding to `output_dir`, when the daemon runs inside
    /// a container with `output_dir` bind-mounted.
    pub host_output_path: Option<PathBuf>,
    /// Capture program and arguments, with `{path}`, `{filename}` and
    /// `{timestamp}` placeholders.
    pub command: CommandTemplate,
    /// Seconds to wait between capture cycles.
    pub interval_secs: f64,
}

/// Retention-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Number of most recent capture files to keep on disk.
    pub max_saved: usize,
    /// Regex matched against file names to select files subject to rotation.
    pub pattern: String,
}

/// Shared store (Redis) configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis host name.
    pub host: String,
    /// Redis port.
    pub port: u16,
    /// Redis database index.
    pub db: i64,
    /// Hash key holding the latest capture record.
    pub key: String,
    /// Pub/sub channel notified after every capture.
    pub channel: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("/captures"),
            host_output_path: None,
            command: CommandTemplate::default(),
            interval_secs: 5.0,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_saved: 10,
            pattern: r"\.jpg$".to_string(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "redis".to_string(),
            port: 6379,
            db: 0,
            key: "camera:latest".to_string(),
            channel: "camera:updates".to_string(),
        }
    }
}

impl StoreConfig {
    /// Connection URL for the configured Redis instance.
    #[must_use]
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);
        Self::from_figment(Self::figment(&config_file))
    }

    /// Build the layered figment for the given config file.
    #[must_use]
    pub fn figment(config_file: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file))
            .merge(legacy_env())
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Extract and validate a configuration from a figment.
    ///
    /// # Errors
    ///
    /// Returns an error if extraction or validation fails.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let mut config: Config = figment.extract()?;
        // `HOST_OUTPUT_PATH=` in a compose file means "no mapping".
        config.capture.host_output_path = config
            .capture
            .host_output_path
            .take()
            .filter(|p| !p.as_os_str().is_empty());
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if !self.capture.interval_secs.is_finite() || self.capture.interval_secs <= 0.0 {
            return Err(Error::config_validation(format!(
                "interval_secs must be greater than 0 (got {})",
                self.capture.interval_secs
            )));
        }

        if self.capture.command.is_empty() {
            return Err(Error::config_validation("capture command must not be empty"));
        }

        if let Err(e) = regex::Regex::new(&self.retention.pattern) {
            return Err(Error::config_validation(format!(
                "invalid retention pattern {}: {e}",
                self.retention.pattern
            )));
        }

        if self.store.key.is_empty() {
            return Err(Error::config_validation("store key must not be empty"));
        }

        if self.store.channel.is_empty() {
            return Err(Error::config_validation("store channel must not be empty"));
        }

        Ok(())
    }

    /// Get the capture interval as a Duration.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.capture.interval_secs)
    }
}

/// Environment provider for the unprefixed variable names.
fn legacy_env() -> Env {
    Env::raw().filter_map(|key| {
        LEGACY_ENV_KEYS
            .iter()
            .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
            .map(|(_, path)| (*path).into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use crate::paths::PathMapper;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.capture.output_dir, PathBuf::from("/captures"));
        assert!(config.capture.host_output_path.is_none());
        assert_eq!(config.retention.max_saved, 10);
        assert_eq!(config.store.key, "camera:latest");
        assert_eq!(config.store.channel, "camera:updates");
    }

    #[test]
    fn test_default_capture_command() {
        let capture = CaptureConfig::default();
        assert_eq!(
            capture.command.args(),
            ["libcamera-jpeg", "-o", "{path}", "-n"]
        );
    }

    #[test]
    fn test_store_url() {
        let store = StoreConfig {
            host: "localhost".to_string(),
            port: 6380,
            db: 2,
            ..StoreConfig::default()
        };
        assert_eq!(store.url(), "redis://localhost:6380/2");
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_interval() {
        let mut config = Config::default();
        config.capture.interval_secs = 0.0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("interval_secs"));
    }

    #[test]
    fn test_validate_nan_interval() {
        let mut config = Config::default();
        config.capture.interval_secs = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_command() {
        let mut config = Config::default();
        config.capture.command = CommandTemplate::from_line("   ");

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("capture command"));
    }

    #[test]
    fn test_validate_invalid_pattern() {
        let mut config = Config::default();
        config.retention.pattern = "[invalid".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("retention pattern"));
    }

    #[test]
    fn test_validate_empty_key() {
        let mut config = Config::default();
        config.store.key = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_interval() {
        let mut config = Config::default();
        assert_eq!(config.interval(), Duration::from_secs(5));

        config.capture.interval_secs = 0.5;
        assert_eq!(config.interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("picapture"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            let config = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(config, Config::default());
            Ok(())
        });
    }

    #[test]
    fn test_load_toml_file() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "picapture.toml",
                r#"
                [capture]
                output_dir = "/data/captures"
                host_output_path = "/mnt/storage/cam"
                command = ["rpicam-still", "-o", "{path}"]
                interval_secs = 2.5

                [retention]
                max_saved = 3

                [store]
                host = "localhost"
                "#,
            )?;

            let config = Config::load_from(Some(PathBuf::from("picapture.toml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.capture.output_dir, PathBuf::from("/data/captures"));
            assert_eq!(
                config.capture.host_output_path,
                Some(PathBuf::from("/mnt/storage/cam"))
            );
            assert_eq!(config.capture.command.args(), ["rpicam-still", "-o", "{path}"]);
            assert_eq!(config.interval(), Duration::from_millis(2500));
            assert_eq!(config.retention.max_saved, 3);
            assert_eq!(config.store.host, "localhost");
            assert_eq!(config.store.port, 6379);
            Ok(())
        });
    }

    #[test]
    fn test_empty_host_output_path_is_unset() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("OUTPUT_DIR", "/captures");
            jail.set_env("HOST_OUTPUT_PATH", "");

            let config = Config::load_from(Some(PathBuf::from("missing.toml")))
                .map_err(|e| e.to_string())?;
            assert!(config.capture.host_output_path.is_none());

            let mapper = PathMapper::new(
                &config.capture.output_dir,
                config.capture.host_output_path.clone(),
            );
            let path = Path::new("/captures/capture_20240501T120005Z.jpg");
            assert_eq!(mapper.map(path), path);
            Ok(())
        });
    }

    #[test]
    fn test_legacy_env_names() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("OUTPUT_DIR", "/srv/captures");
            jail.set_env("HOST_OUTPUT_PATH", "/mnt/storage/camera_capture");
            jail.set_env("CAPTURE_CMD", "fswebcam --no-banner {path}");
            jail.set_env("CAPTURE_INTERVAL", "10");
            jail.set_env("MAX_SAVED", "4");
            jail.set_env("REDIS_HOST", "cache");
            jail.set_env("REDIS_PORT", "6380");
            jail.set_env("REDIS_DB", "1");
            jail.set_env("REDIS_KEY", "cam:front");

            let config = Config::load_from(Some(PathBuf::from("missing.toml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.capture.output_dir, PathBuf::from("/srv/captures"));
            assert_eq!(
                config.capture.host_output_path,
                Some(PathBuf::from("/mnt/storage/camera_capture"))
            );
            assert_eq!(
                config.capture.command.args(),
                ["fswebcam", "--no-banner", "{path}"]
            );
            assert_eq!(config.interval(), Duration::from_secs(10));
            assert_eq!(config.retention.max_saved, 4);
            assert_eq!(config.store.url(), "redis://cache:6380/1");
            assert_eq!(config.store.key, "cam:front");
            Ok(())
        });
    }

    #[test]
    fn test_prefixed_env_overrides_legacy() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("MAX_SAVED", "4");
            jail.set_env("PICAPTURE_RETENTION__MAX_SAVED", "7");
            jail.set_env("PICAPTURE_STORE__CHANNEL", "cam:events");

            let config = Config::load_from(Some(PathBuf::from("missing.toml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.retention.max_saved, 7);
            assert_eq!(config.store.channel, "cam:events");
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("CAPTURE_INTERVAL", "0");
            let result = Config::load_from(Some(PathBuf::from("missing.toml")));
            assert!(matches!(result, Err(Error::ConfigValidation { .. })));
            Ok(())
        });
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("max_saved"));
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
