//! Focustimer configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::SessionKind;

/// Main focustimer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Timer durations, cadences and thresholds
    pub timer: TimerConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .focustimer.yml
        let local_config = PathBuf::from(".focustimer.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/focustimer/focustimer.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("focustimer").join("focustimer.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        // Timer values are validated while deserializing
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding state and logs
    #[serde(rename = "data-dir")]
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // ~/.local/share/focustimer on Linux
        let data_dir = dirs::data_local_dir()
            .map(|d| d.join("focustimer"))
            .unwrap_or_else(|| PathBuf::from(".focustimer"))
            .to_string_lossy()
            .into_owned();

        Self { data_dir }
    }
}

impl StorageConfig {
    pub fn state_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("state")
    }

    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("logs")
    }
}

/// Rejected timer settings
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("staleness-multiplier must be at least 2, got {0}")]
    MultiplierTooSmall(u32),

    #[error("paused heartbeat interval ({paused_ms}ms) must be below the staleness threshold ({threshold_ms}ms)")]
    PausedCadenceTooSlow { paused_ms: u64, threshold_ms: u64 },

    #[error("min-background-interval-ms ({background_ms}ms) must be below the staleness threshold ({threshold_ms}ms)")]
    BackgroundIntervalTooCoarse { background_ms: u64, threshold_ms: u64 },
}

/// Raw timer settings as written in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    #[serde(rename = "work-ms")]
    pub work_ms: u64,

    #[serde(rename = "short-break-ms")]
    pub short_break_ms: u64,

    #[serde(rename = "long-break-ms")]
    pub long_break_ms: u64,

    /// Cadence of heartbeat ticks while running
    #[serde(rename = "heartbeat-interval-ms")]
    pub heartbeat_interval_ms: u64,

    /// Paused cadence is the running cadence times this factor
    #[serde(rename = "paused-heartbeat-factor")]
    pub paused_heartbeat_factor: u32,

    /// Lower bound on the staleness threshold
    #[serde(rename = "staleness-floor-ms")]
    pub staleness_floor_ms: u64,

    /// Staleness threshold as a multiple of the heartbeat interval
    #[serde(rename = "staleness-multiplier")]
    pub staleness_multiplier: u32,

    /// Accepted distance between a completion signal and its target
    #[serde(rename = "completion-tolerance-ms")]
    pub completion_tolerance_ms: u64,

    /// Finest recurring interval the in-process host allows
    #[serde(rename = "min-background-interval-ms")]
    pub min_background_interval_ms: u64,

    #[serde(rename = "history-limit")]
    pub history_limit: usize,

    #[serde(rename = "history-max-age-days")]
    pub history_max_age_days: u32,

    /// Delay before the single retry of a failed write
    #[serde(rename = "persistence-retry-backoff-ms")]
    pub persistence_retry_backoff_ms: u64,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            work_ms: 25 * 60 * 1000,
            short_break_ms: 5 * 60 * 1000,
            long_break_ms: 15 * 60 * 1000,
            heartbeat_interval_ms: 30_000,
            paused_heartbeat_factor: 2,
            staleness_floor_ms: 120_000,
            staleness_multiplier: 4,
            completion_tolerance_ms: 60_000,
            min_background_interval_ms: 1_000,
            history_limit: 100,
            history_max_age_days: 30,
            persistence_retry_backoff_ms: 200,
        }
    }
}

/// Validated timer configuration
///
/// Only constructible through [`TryFrom<TimerSettings>`], so every instance
/// holds positive durations and a staleness threshold strictly above both
/// heartbeat cadences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TimerSettings", into = "TimerSettings")]
pub struct TimerConfig {
    settings: TimerSettings,
}

impl TryFrom<TimerSettings> for TimerConfig {
    type Error = ConfigError;

    fn try_from(settings: TimerSettings) -> Result<Self, Self::Error> {
        let positive = [
            ("work-ms", settings.work_ms),
            ("short-break-ms", settings.short_break_ms),
            ("long-break-ms", settings.long_break_ms),
            ("heartbeat-interval-ms", settings.heartbeat_interval_ms),
            ("staleness-floor-ms", settings.staleness_floor_ms),
            ("min-background-interval-ms", settings.min_background_interval_ms),
            ("paused-heartbeat-factor", u64::from(settings.paused_heartbeat_factor)),
            ("history-limit", settings.history_limit as u64),
            ("history-max-age-days", u64::from(settings.history_max_age_days)),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero(*name));
        }
        if settings.staleness_multiplier < 2 {
            return Err(ConfigError::MultiplierTooSmall(settings.staleness_multiplier));
        }

        let config = Self { settings };
        let paused_ms = config.paused_heartbeat_interval_ms();
        let threshold_ms = config.staleness_threshold_ms();
        if paused_ms >= threshold_ms {
            return Err(ConfigError::PausedCadenceTooSlow { paused_ms, threshold_ms });
        }
        let background_ms = config.settings.min_background_interval_ms;
        if background_ms >= threshold_ms {
            return Err(ConfigError::BackgroundIntervalTooCoarse {
                background_ms,
                threshold_ms,
            });
        }
        Ok(config)
    }
}

impl From<TimerConfig> for TimerSettings {
    fn from(config: TimerConfig) -> Self {
        config.settings
    }
}

impl TimerConfig {
    pub fn settings(&self) -> &TimerSettings {
        &self.settings
    }

    pub fn heartbeat_interval_ms(&self) -> u64 {
        self.settings.heartbeat_interval_ms
    }

    pub fn paused_heartbeat_interval_ms(&self) -> u64 {
        self.settings
            .heartbeat_interval_ms
            .saturating_mul(u64::from(self.settings.paused_heartbeat_factor))
    }

    /// max(interval x multiplier, floor)
    pub fn staleness_threshold_ms(&self) -> u64 {
        self.settings
            .heartbeat_interval_ms
            .saturating_mul(u64::from(self.settings.staleness_multiplier))
            .max(self.settings.staleness_floor_ms)
    }

    pub fn completion_tolerance_ms(&self) -> u64 {
        self.settings.completion_tolerance_ms
    }

    pub fn min_background_interval(&self) -> Duration {
        Duration::from_millis(self.settings.min_background_interval_ms)
    }

    pub fn history_limit(&self) -> usize {
        self.settings.history_limit
    }

    pub fn history_max_age_days(&self) -> u32 {
        self.settings.history_max_age_days
    }

    pub fn persistence_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.settings.persistence_retry_backoff_ms)
    }
}

/// Read-only timing configuration injected into the engine and recovery
pub trait ConfigProvider: Send + Sync {
    /// Default planned duration for a session kind, in milliseconds
    fn planned_duration(&self, kind: SessionKind) -> u64;

    /// Running heartbeat cadence
    fn heartbeat_interval(&self) -> Duration;

    /// Cadence kept alive while paused
    fn paused_heartbeat_interval(&self) -> Duration;

    /// Age at which a heartbeat counts as stale
    fn staleness_threshold(&self) -> Duration;

    /// Accepted distance between a completion signal and its target
    fn completion_tolerance(&self) -> Duration;
}

impl ConfigProvider for TimerConfig {
    fn planned_duration(&self, kind: SessionKind) -> u64 {
        match kind {
            SessionKind::Work => self.settings.work_ms,
            SessionKind::ShortBreak => self.settings.short_break_ms,
            SessionKind::LongBreak => self.settings.long_break_ms,
        }
    }

    fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms())
    }

    fn paused_heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.paused_heartbeat_interval_ms())
    }

    fn staleness_threshold(&self) -> Duration {
        Duration::from_millis(self.staleness_threshold_ms())
    }

    fn completion_tolerance(&self) -> Duration {
        Duration::from_millis(self.completion_tolerance_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.timer.planned_duration(SessionKind::Work), 1_500_000);
        assert_eq!(config.timer.planned_duration(SessionKind::ShortBreak), 300_000);
        assert_eq!(config.timer.planned_duration(SessionKind::LongBreak), 900_000);
        assert_eq!(config.timer.staleness_threshold_ms(), 120_000);
        assert_eq!(config.timer.paused_heartbeat_interval_ms(), 60_000);
        assert_eq!(config.timer.history_limit(), 100);
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
timer:
  work-ms: 3000000
  heartbeat-interval-ms: 10000
  staleness-floor-ms: 5000
storage:
  data-dir: /tmp/focustimer-test
log-level: debug
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.timer.planned_duration(SessionKind::Work), 3_000_000);
        // Unset keys keep their defaults
        assert_eq!(config.timer.planned_duration(SessionKind::ShortBreak), 300_000);
        // 4 x 10s beats the 5s floor
        assert_eq!(config.timer.staleness_threshold_ms(), 40_000);
        assert_eq!(config.storage.data_dir, "/tmp/focustimer-test");
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_zero_duration_rejected_at_parse() {
        let yaml = "timer:\n  short-break-ms: 0\n";
        let err = serde_yaml::from_str::<Config>(yaml).unwrap_err();
        assert!(err.to_string().contains("short-break-ms"));
    }

    #[test]
    fn test_validation_rules() {
        let low_multiplier = TimerSettings {
            staleness_multiplier: 1,
            ..TimerSettings::default()
        };
        assert_eq!(
            TimerConfig::try_from(low_multiplier),
            Err(ConfigError::MultiplierTooSmall(1))
        );

        let slow_paused = TimerSettings {
            paused_heartbeat_factor: 4,
            ..TimerSettings::default()
        };
        assert_eq!(
            TimerConfig::try_from(slow_paused),
            Err(ConfigError::PausedCadenceTooSlow {
                paused_ms: 120_000,
                threshold_ms: 120_000
            })
        );

        let coarse_background = TimerSettings {
            min_background_interval_ms: 900_000,
            ..TimerSettings::default()
        };
        assert_eq!(
            TimerConfig::try_from(coarse_background),
            Err(ConfigError::BackgroundIntervalTooCoarse {
                background_ms: 900_000,
                threshold_ms: 120_000
            })
        );

        let no_history = TimerSettings {
            history_limit: 0,
            ..TimerSettings::default()
        };
        assert_eq!(TimerConfig::try_from(no_history), Err(ConfigError::Zero("history-limit")));
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("ft.yml");
        fs::write(&path, "timer:\n  long-break-ms: 1200000\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.timer.planned_duration(SessionKind::LongBreak), 1_200_000);
    }

    #[test]
    fn test_load_explicit_path_invalid() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("ft.yml");
        fs::write(&path, "timer:\n  heartbeat-interval-ms: 0\n").unwrap();

        assert!(Config::load(Some(&path)).is_err());
    }
}
