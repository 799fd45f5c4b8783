use std::{env, fmt, fs, io, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitoring::SchedulerConfig;
use crate::notify::{CircuitBreakerConfig, EmailConfig, RetryConfig, WebhookConfig};
use crate::orchestrator::RetentionPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: io::Error },

    #[error("failed to write config {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: io::Error },

    #[error("failed to parse config {path}: {source}")]
    ParseFailed { path: path::PathBuf, source: toml::de::Error },

    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("no config directory available, set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: Logging,
    pub database: DatabaseSettings,
    pub scheduler: SchedulerConfig,
    pub retention: RetentionPolicy,
    pub notifications: Notifications,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// Default level, `RUST_LOG` overrides it
    pub level: String,
    /// "compact" or "json"
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: path::PathBuf,
    pub pool_size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Notifications {
    pub retry: RetryConfig,
    pub breaker: CircuitBreakerConfig,
    pub email: Option<EmailConfig>,
    pub webhook: Option<WebhookConfig>,
}

impl Default for Logging {
    fn default() -> Self {
        Self { level: "info".into(), format: "compact".into() }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self { path: default_database_path(), pool_size: 8 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: Logging::default(),
            database: DatabaseSettings::default(),
            scheduler: SchedulerConfig::default(),
            retention: RetentionPolicy::default(),
            notifications: Notifications::default(),
        }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

fn xdg_dir(variable: &str, fallback: &str) -> Option<path::PathBuf> {
    if let Ok(dir) = env::var(variable) {
        if !dir.is_empty() {
            return Some(path::PathBuf::from(dir));
        }
    }
    env::home_dir().map(|home| home.join(fallback))
}

/// Get default config path ($XDG_CONFIG_HOME/uppe/sentinel.toml or
/// $HOME/.config/...)
pub fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    xdg_dir("XDG_CONFIG_HOME", ".config")
        .map(|dir| dir.join("uppe/sentinel.toml"))
        .ok_or(ConfigError::ConfigPathUnavailable)
}

/// $XDG_DATA_HOME/uppe/sentinel.db, or the working directory without a home
fn default_database_path() -> path::PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share")
        .map(|dir| dir.join("uppe/sentinel.db"))
        .unwrap_or_else(|| path::PathBuf::from("sentinel.db"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_title_2 = write_title_indented(2);
        let write_1 = write_indented(1);
        let write_2 = write_indented(2);

        writeln!(f, "Current Internal Configuration State:")?;

        write_title_1(f, "Logging")?;
        write_1(f, "Level", &self.logging.level)?;
        write_1(f, "Format", &self.logging.format)?;

        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path.display())?;
        write_1(f, "Pool Size", &self.database.pool_size)?;

        write_title_1(f, "Scheduler")?;
        write_1(f, "Tick Interval (s)", &self.scheduler.tick_interval_secs)?;
        write_1(f, "Max Concurrent Checks", &self.scheduler.max_concurrent_checks)?;
        write_1(f, "Respect Check Interval", &self.scheduler.respect_check_interval)?;
        write_1(f, "Alert Context Checks", &self.scheduler.alert_context_checks)?;

        write_title_1(f, "Retention")?;
        write_1(f, "Check Retention (days)", &self.retention.check_retention_days)?;
        write_1(f, "Cleanup Interval (s)", &self.retention.cleanup_interval_secs)?;

        let notifications = &self.notifications;
        write_title_1(f, "Notifications")?;
        write_title_2(f, "Retry")?;
        write_2(f, "Max Retries", &notifications.retry.max_retries)?;
        write_2(f, "Initial Delay (ms)", &notifications.retry.initial_delay_ms)?;
        write_2(f, "Max Delay (ms)", &notifications.retry.max_delay_ms)?;
        write_2(f, "Jitter", &notifications.retry.jitter)?;
        write_title_2(f, "Circuit Breaker")?;
        write_2(f, "Failure Threshold", &notifications.breaker.failure_threshold)?;
        write_2(f, "Reset Timeout (ms)", &notifications.breaker.reset_timeout_ms)?;

        write_title_2(f, "Email")?;
        match &notifications.email {
            Some(email) => {
                write_2(f, "SMTP", &format!("{}:{}", email.smtp_host, email.smtp_port))?;
                write_2(f, "From", &email.from_address)?;
                write_2(f, "Recipients", &email.recipients.join(", "))?;
            }
            None => write_2(f, "Enabled", &false)?,
        }

        write_title_2(f, "Webhook")?;
        match &notifications.webhook {
            Some(webhook) => write_2(f, "URLs", &webhook.urls.join(", "))?,
            None => write_2(f, "Enabled", &false)?,
        }

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/uppe/sentinel.toml
    ///  or the specified path if one does not exist
    ///
    /// ```no_run
    /// use uppe_sentinel::config::Config;
    ///
    /// let cfg = Config::from_config(None::<&std::path::Path>)?;
    /// println!("{}", cfg);
    /// # Ok::<(), uppe_sentinel::config::ConfigError>(())
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::ReadFailed { path: config_path.clone(), source })?;
            toml::from_str(raw_string.as_str())
                .map_err(|source| ConfigError::ParseFailed { path: config_path.clone(), source })?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })?;
        }

        fs::write(path, config_str).map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.max_concurrent_checks == 0 {
            return Err(ConfigError::Invalid("scheduler.max_concurrent_checks must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.notifications.retry.jitter) {
            return Err(ConfigError::Invalid("notifications.retry.jitter must be between 0 and 1".into()));
        }
        if self.notifications.retry.initial_delay_ms > self.notifications.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "notifications.retry.initial_delay_ms exceeds max_delay_ms".into(),
            ));
        }
        if self.retention.check_retention_days <= 0 {
            return Err(ConfigError::Invalid("retention.check_retention_days must be positive".into()));
        }
        Ok(())
    }
}
