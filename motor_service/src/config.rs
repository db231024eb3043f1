use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use motion_engine::{AxisConfig, CardConfig, PollerConfig};
use serde::{Deserialize, Serialize};

const MIN_TIMEOUT_MS: u64 = 1000;
const MAX_TIMEOUT_MS: u64 = 3000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found at {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to read configuration file: {source}")]
    ReadError { source: std::io::Error },

    #[error("Failed to parse configuration: {source}")]
    ParseError { source: toml::de::Error },

    #[error("Failed to serialize configuration: {source}")]
    SerializeError { source: toml::ser::Error },

    #[error("Failed to write configuration file: {source}")]
    WriteError { source: std::io::Error },

    #[error("Configuration validation failed: {message}")]
    ValidationError { message: String },
}

fn invalid(message: String) -> ConfigError {
    ConfigError::ValidationError { message }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is not set.
    pub level: String,
    /// Daily rolling JSON log files go here when set.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "motor_service".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/motor_service.sock"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Em2rs,
    Mcdc2805,
}

fn default_retries() -> u32 {
    3
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    Tcp {
        address: String,
        #[serde(default = "default_retries")]
        max_retries: u32,
        #[serde(default = "default_connect_timeout_ms")]
        connect_timeout_ms: u64,
    },
    Serial {
        path: String,
        baud_rate: u32,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Tcp {
            address: "127.0.0.1:4001".to_string(),
            max_retries: default_retries(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisEntry {
    /// Modbus slave id of an EM2RS drive; unused by MCDC nodes, which are
    /// addressed by position.
    pub address: u8,
    /// EM2RS SI inputs wired to the limit switches.
    pub low_limit: u8,
    pub high_limit: u8,
    /// Overrides the card-wide resolution.
    pub steps_per_rev: Option<u32>,
    pub encoder_present: bool,
    pub pre_motion: Option<String>,
    pub post_motion: Option<String>,
    pub no_motion_threshold: u32,
    pub motion_timeout_cycles: Option<u32>,
}

impl Default for AxisEntry {
    fn default() -> Self {
        let engine = AxisConfig::default();
        Self {
            address: 1,
            low_limit: 0,
            high_limit: 1,
            steps_per_rev: None,
            encoder_present: engine.encoder_present,
            pre_motion: engine.pre_motion,
            post_motion: engine.post_motion,
            no_motion_threshold: engine.no_motion_threshold,
            motion_timeout_cycles: engine.motion_timeout_cycles,
        }
    }
}

impl AxisEntry {
    pub fn engine(&self) -> AxisConfig {
        AxisConfig {
            encoder_present: self.encoder_present,
            pre_motion: self.pre_motion.clone(),
            post_motion: self.post_motion.clone(),
            no_motion_threshold: self.no_motion_threshold,
            motion_timeout_cycles: self.motion_timeout_cycles,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardEntry {
    pub name: String,
    pub driver: DriverKind,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default = "CardEntry::default_steps_per_rev")]
    pub steps_per_rev: u32,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub axes: Vec<AxisEntry>,
}

impl CardEntry {
    fn default_steps_per_rev() -> u32 {
        10_000
    }

    pub fn steps_per_rev(&self, axis: &AxisEntry) -> u32 {
        axis.steps_per_rev.unwrap_or(self.steps_per_rev)
    }

    pub fn engine(&self) -> CardConfig {
        CardConfig {
            name: self.name.clone(),
            poller: self.poller.clone(),
            axes: self.axes.iter().map(AxisEntry::engine).collect(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(invalid("card name must not be empty".to_string()));
        }
        if self.name.contains(':') {
            return Err(invalid(format!("card name {:?} must not contain ':'", self.name)));
        }

        let timeout = self.poller.timeout_ms;
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&timeout) {
            return Err(invalid(format!(
                "{}: timeout_ms {} outside {}..={}",
                self.name, timeout, MIN_TIMEOUT_MS, MAX_TIMEOUT_MS
            )));
        }
        if self.poller.moving_period_ms == 0 || self.poller.idle_period_ms == 0 {
            return Err(invalid(format!("{}: poll periods must be positive", self.name)));
        }

        for (index, axis) in self.axes.iter().enumerate() {
            if self.steps_per_rev(axis) == 0 {
                return Err(invalid(format!(
                    "{}: axis {} steps_per_rev must be positive",
                    self.name, index
                )));
            }
            if self.driver == DriverKind::Em2rs {
                if !(1..=247).contains(&axis.address) {
                    return Err(invalid(format!(
                        "{}: axis {} Modbus address {} outside 1..=247",
                        self.name, index, axis.address
                    )));
                }
                if axis.low_limit > 7 || axis.high_limit > 7 {
                    return Err(invalid(format!(
                        "{}: axis {} limit inputs must be SI0..SI7",
                        self.name, index
                    )));
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub service: ServiceConfig,
    pub cards: Vec<CardEntry>,
}

impl Config {
    /// A starter file: one EM2RS pair behind a Modbus gateway and one MCDC
    /// chain on a serial port.
    pub fn example() -> Self {
        let em2rs_axis = |address| AxisEntry {
            address,
            ..Default::default()
        };

        Self {
            cards: vec![
                CardEntry {
                    name: "slits".to_string(),
                    driver: DriverKind::Em2rs,
                    transport: TransportConfig::default(),
                    steps_per_rev: 10_000,
                    poller: PollerConfig::default(),
                    axes: vec![em2rs_axis(1), em2rs_axis(2)],
                },
                CardEntry {
                    name: "table".to_string(),
                    driver: DriverKind::Mcdc2805,
                    transport: TransportConfig::Serial {
                        path: "/dev/ttyUSB0".to_string(),
                        baud_rate: 9600,
                    },
                    steps_per_rev: 3000,
                    poller: PollerConfig::default(),
                    axes: vec![AxisEntry {
                        encoder_present: true,
                        post_motion: Some("DI".to_string()),
                        pre_motion: Some("EN".to_string()),
                        ..Default::default()
                    }],
                },
            ],
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for card in &self.cards {
            card.validate()?;
            if !names.insert(card.name.as_str()) {
                return Err(invalid(format!("duplicate card name {:?}", card.name)));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ConfigOptions {
    pub config_path: PathBuf,
    pub create_if_missing: bool,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            create_if_missing: true,
        }
    }
}

impl ConfigOptions {
    pub fn default_config_path() -> PathBuf {
        std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("default_config.toml"))
    }

    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            config_path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }
}

#[derive(Debug)]
pub struct ConfigManager {
    options: ConfigOptions,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            options: ConfigOptions::default(),
        }
    }

    pub fn with_options(options: ConfigOptions) -> Self {
        Self { options }
    }

    pub fn load(&self) -> anyhow::Result<Config> {
        let config_path = &self.options.config_path;

        if !config_path.exists() {
            if self.options.create_if_missing {
                let config = Config::example();
                self.save(&config)
                    .context("Failed to save default config")?;
                return Ok(config);
            }
            return Err(ConfigError::FileNotFound {
                path: config_path.clone(),
            }
            .into());
        }

        let content =
            fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError { source: e })?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError { source: e })?;
        config.validate()?;

        Ok(config)
    }

    pub fn save(&self, config: &Config) -> anyhow::Result<()> {
        let config_path = &self.options.config_path;

        if let Some(parent) = config_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError { source: e })?;
        }

        let content = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::SerializeError { source: e })?;
        fs::write(config_path, content).map_err(|e| ConfigError::WriteError { source: e })?;

        Ok(())
    }
}

pub fn init_config() -> anyhow::Result<(ConfigManager, Config)> {
    let manager = ConfigManager::new();
    let config = manager.load()?;
    Ok((manager, config))
}

pub fn create_default_config<P: AsRef<Path>>(path: Option<P>) -> anyhow::Result<()> {
    let config_path = path
        .map(|p| p.as_ref().to_path_buf())
        .unwrap_or_else(ConfigOptions::default_config_path);

    ConfigManager::with_options(ConfigOptions::with_path(config_path)).save(&Config::example())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &tempfile::TempDir, create_if_missing: bool) -> ConfigManager {
        ConfigManager::with_options(ConfigOptions {
            config_path: dir.path().join("nested").join("motors.toml"),
            create_if_missing,
        })
    }

    #[test]
    fn example_survives_a_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir, false);

        manager.save(&Config::example()).unwrap();
        assert_eq!(manager.load().unwrap(), Config::example());
    }

    #[test]
    fn missing_file_is_created_or_reported() {
        let dir = tempfile::tempdir().unwrap();

        let err = manager(&dir, false).load().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::FileNotFound { .. })
        ));

        let config = manager(&dir, true).load().unwrap();
        assert_eq!(config.cards.len(), 2);
        assert!(dir.path().join("nested").join("motors.toml").exists());
    }

    #[test]
    fn hand_written_file_takes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("motors.toml");
        fs::write(
            &path,
            r#"
[service]
socket_path = "/tmp/test_motors.sock"

[[cards]]
name = "bench"
driver = "mcdc2805"
transport = { kind = "serial", path = "/dev/ttyS1", baud_rate = 19200 }
steps_per_rev = 3000

[cards.poller]
moving_period_ms = 50
timeout_ms = 2000

[[cards.axes]]
post_motion = "DI"

[[cards.axes]]
steps_per_rev = 512
"#,
        )
        .unwrap();

        let config = ConfigManager::with_options(ConfigOptions::with_path(&path))
            .load()
            .unwrap();
        let card = &config.cards[0];

        assert_eq!(config.logging, LoggingConfig::default());
        assert_eq!(card.driver, DriverKind::Mcdc2805);
        assert_eq!(card.poller.moving_period_ms, 50);
        assert_eq!(card.poller.idle_period_ms, 1000);
        assert_eq!(card.steps_per_rev(&card.axes[0]), 3000);
        assert_eq!(card.steps_per_rev(&card.axes[1]), 512);

        let engine = card.engine();
        assert_eq!(engine.axes.len(), 2);
        assert_eq!(engine.axes[0].post_motion.as_deref(), Some("DI"));
        assert_eq!(engine.poller.timeout_ms, 2000);
    }

    #[test]
    fn invalid_cards_are_rejected() {
        let mut config = Config::example();
        config.cards[1].name = "slits".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { .. })
        ));

        let mut config = Config::example();
        config.cards[0].poller.timeout_ms = 5000;
        assert!(config.validate().is_err());

        let mut config = Config::example();
        config.cards[0].axes[0].address = 0;
        assert!(config.validate().is_err());

        let mut config = Config::example();
        config.cards[0].axes[1].high_limit = 8;
        assert!(config.validate().is_err());

        assert!(Config::example().validate().is_ok());
    }
}
