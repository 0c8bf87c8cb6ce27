//! Configuration file support for multiloader.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (MULTILOADER_*)
//! 3. Fleet manifest (--manifest)
//! 4. Local config file (./multiloader.toml)
//! 5. Global config file (~/.config/multiloader/config.toml)
//!
//! `--config <PATH>` replaces both config files.

use directories::ProjectDirs;
use log::{debug, warn};
use multiloader::OneOrMany;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-directory config file.
pub const LOCAL_CONFIG_FILE: &str = "multiloader.toml";

/// avrdude settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Path to the avrdude executable.
    pub path: Option<PathBuf>,
    /// avrdude configuration file.
    pub config_path: Option<PathBuf>,
    /// Per-invocation timeout in seconds.
    pub timeout_secs: Option<u64>,
}

/// Default fleet parameters. Each may be a single value or a per-board list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetDefaults {
    /// Microcontroller part number(s).
    pub part_number: Option<OneOrMany<String>>,
    /// Programmer identifier(s).
    pub programmer_id: Option<OneOrMany<String>>,
    /// Baud rate(s).
    pub baud_rate: Option<OneOrMany<u32>>,
    /// Serial port(s).
    pub port: Option<OneOrMany<String>>,
    /// Firmware image(s).
    pub hex_file: Option<OneOrMany<PathBuf>>,
}

/// Scheduling settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    /// Drive all boards at once.
    #[serde(default)]
    pub parallel: bool,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// avrdude configuration.
    #[serde(default)]
    pub tool: ToolConfig,
    /// Fleet defaults.
    #[serde(default)]
    pub fleet: FleetDefaults,
    /// Scheduling configuration.
    #[serde(default)]
    pub run: RunConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "multiloader").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set values in `other` win.
    fn merge(&mut self, other: Self) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.tool.path, other.tool.path);
        take(&mut self.tool.config_path, other.tool.config_path);
        take(&mut self.tool.timeout_secs, other.tool.timeout_secs);

        take(&mut self.fleet.part_number, other.fleet.part_number);
        take(&mut self.fleet.programmer_id, other.fleet.programmer_id);
        take(&mut self.fleet.baud_rate, other.fleet.baud_rate);
        take(&mut self.fleet.port, other.fleet.port);
        take(&mut self.fleet.hex_file, other.fleet.hex_file);

        if other.run.parallel {
            self.run.parallel = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.tool.path.is_none());
        assert!(config.tool.timeout_secs.is_none());
        assert!(config.fleet.part_number.is_none());
        assert!(config.fleet.port.is_none());
        assert!(!config.run.parallel);
    }

    #[test]
    fn test_config_merge_overrides() {
        let mut base = Config::default();
        base.tool.timeout_secs = Some(15);
        base.fleet.part_number = Some(OneOrMany::One("atmega328p".to_string()));

        let mut other = Config::default();
        other.tool.timeout_secs = Some(30);
        other.fleet.port = Some(OneOrMany::Many(vec!["COM3".to_string(), "COM4".to_string()]));
        other.run.parallel = true;

        base.merge(other);
        assert_eq!(base.tool.timeout_secs, Some(30));
        assert_eq!(base.fleet.part_number, Some(OneOrMany::One("atmega328p".to_string())));
        assert_eq!(base.fleet.port.as_ref().and_then(OneOrMany::len), Some(2));
        assert!(base.run.parallel);
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.tool.path = Some(PathBuf::from("/usr/local/bin/avrdude"));
        base.fleet.baud_rate = Some(OneOrMany::One(57600));
        base.run.parallel = true;

        base.merge(Config::default());
        assert_eq!(base.tool.path, Some(PathBuf::from("/usr/local/bin/avrdude")));
        assert_eq!(base.fleet.baud_rate, Some(OneOrMany::One(57600)));
        assert!(base.run.parallel);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[tool]
path = "/opt/avr/bin/avrdude"
config_path = "/opt/avr/etc/avrdude.conf"
timeout_secs = 30

[fleet]
part_number = "atmega328p"
programmer_id = ["arduino", "usbasp"]
baud_rate = 57600
port = ["/dev/ttyUSB0", "/dev/ttyUSB1"]
hex_file = "blink.hex"

[run]
parallel = true
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.tool.path, Some(PathBuf::from("/opt/avr/bin/avrdude")));
        assert_eq!(config.tool.timeout_secs, Some(30));
        assert_eq!(
            config.fleet.part_number,
            Some(OneOrMany::One("atmega328p".to_string()))
        );
        assert_eq!(
            config.fleet.programmer_id,
            Some(OneOrMany::Many(vec!["arduino".to_string(), "usbasp".to_string()]))
        );
        assert_eq!(config.fleet.baud_rate, Some(OneOrMany::One(57600)));
        assert_eq!(config.fleet.hex_file, Some(OneOrMany::One(PathBuf::from("blink.hex"))));
        assert!(config.run.parallel);
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.tool.path.is_none());
        assert!(config.fleet.port.is_none());
        assert!(!config.run.parallel);
    }

    #[test]
    fn test_config_from_partial_toml() {
        let config: Config = toml::from_str("[run]\nparallel = true\n").unwrap();
        assert!(config.tool.config_path.is_none());
        assert!(config.run.parallel);
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[fleet]\nport = \"/dev/ttyACM0\"\n").unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.fleet.port, Some(OneOrMany::One("/dev/ttyACM0".to_string())));
    }

    #[test]
    fn test_load_from_path_invalid_toml_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[fleet\nport = ").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.fleet.port.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.tool.path.is_none());
    }

    #[test]
    fn test_global_config_path() {
        if let Some(p) = Config::global_config_path() {
            assert!(p.to_string_lossy().contains("multiloader"));
            assert!(p.to_string_lossy().ends_with("config.toml"));
        }
    }
}
