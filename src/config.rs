use anyhow::{Context, Result};
use chrono::Weekday;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::scheduler::Trigger;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the inventory API. Entities are fetched from `{base_url}/api/{entity}`.
    #[serde(default = "default_source_url")]
    pub base_url: String,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_source_url(),
            timeout_secs: default_source_timeout(),
        }
    }
}

fn default_source_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_source_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
        }
    }
}

impl StorageConfig {
    pub fn backups_dir(&self) -> PathBuf {
        self.base_dir.join("backups")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.base_dir.join("reports")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }
}

fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".stockwatch")
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
    #[serde(default = "default_report_max_age_days")]
    pub report_max_age_days: u64,
    #[serde(default = "default_log_max_age_days")]
    pub log_max_age_days: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_backups: default_max_backups(),
            report_max_age_days: default_report_max_age_days(),
            log_max_age_days: default_log_max_age_days(),
        }
    }
}

fn default_max_backups() -> usize {
    10
}

fn default_report_max_age_days() -> u64 {
    60
}

fn default_log_max_age_days() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// How long `stop` waits for the worker thread before giving up on it.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    /// Number of job executions kept in the in-memory history.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
            history_size: default_history_size(),
        }
    }
}

fn default_tick_secs() -> u64 {
    60
}

fn default_stop_timeout_secs() -> u64 {
    5
}

fn default_history_size() -> usize {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_backup_trigger")]
    pub backup: Trigger,
    #[serde(default = "default_reports_trigger")]
    pub reports: Trigger,
    #[serde(default = "default_alerts_trigger")]
    pub alerts: Trigger,
    #[serde(default = "default_maintenance_trigger")]
    pub maintenance: Trigger,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            backup: default_backup_trigger(),
            reports: default_reports_trigger(),
            alerts: default_alerts_trigger(),
            maintenance: default_maintenance_trigger(),
        }
    }
}

fn default_backup_trigger() -> Trigger {
    Trigger::Daily { hour: 2, minute: 0 }
}

fn default_reports_trigger() -> Trigger {
    Trigger::Weekly {
        day: Weekday::Mon,
        hour: 8,
        minute: 0,
    }
}

fn default_alerts_trigger() -> Trigger {
    Trigger::Interval { every_hours: 4 }
}

fn default_maintenance_trigger() -> Trigger {
    Trigger::Daily {
        hour: 3,
        minute: 30,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_bind")]
    pub bind: String,
    /// Bearer token required by the control API. Mandatory for non-localhost binds.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_api_bind(),
            api_key: None,
        }
    }
}

fn default_api_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.retention.max_backups == 0 {
            anyhow::bail!("[retention] max_backups must be at least 1");
        }
        if self.scheduler.tick_secs == 0 {
            anyhow::bail!("[scheduler] tick_secs must be greater than zero");
        }
        let triggers = [
            ("backup", &self.schedule.backup),
            ("reports", &self.schedule.reports),
            ("alerts", &self.schedule.alerts),
            ("maintenance", &self.schedule.maintenance),
        ];
        for (name, trigger) in triggers {
            trigger
                .validate()
                .with_context(|| format!("Invalid [schedule] {name} trigger"))?;
        }
        Ok(())
    }
}

pub fn load(path: &str) -> Result<Config> {
    let path = expand_tilde(path);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config.toml")?;
    config.storage.base_dir = expand_tilde(&config.storage.base_dir.to_string_lossy());
    config.validate()?;
    Ok(config)
}

/// Create the artifact directories under `base_dir`.
pub fn ensure_dirs(storage: &StorageConfig) -> Result<()> {
    for dir in [
        storage.backups_dir(),
        storage.reports_dir(),
        storage.logs_dir(),
    ] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    Ok(())
}

pub async fn init_config_dir(config_path: &str) -> Result<PathBuf> {
    let storage = StorageConfig::default();
    ensure_dirs(&storage)?;

    let config_path = expand_tilde(config_path);
    if let Some(parent) = config_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if !config_path.exists() {
        tokio::fs::write(&config_path, DEFAULT_CONFIG).await?;
    }
    Ok(config_path)
}

const DEFAULT_CONFIG: &str = r#"[source]
base_url = "http://localhost:3000"
timeout_secs = 30

[storage]
base_dir = "~/.stockwatch"

[retention]
max_backups = 10
report_max_age_days = 60
log_max_age_days = 30

[scheduler]
tick_secs = 60
stop_timeout_secs = 5
history_size = 50

# Trigger kinds:
#   { kind = "daily", hour = 2, minute = 0 }
#   { kind = "weekly", day = "mon", hour = 8, minute = 0 }
#   { kind = "interval", every_hours = 4 }
[schedule]
backup = { kind = "daily", hour = 2, minute = 0 }
reports = { kind = "weekly", day = "mon", hour = 8, minute = 0 }
alerts = { kind = "interval", every_hours = 4 }
maintenance = { kind = "daily", hour = 3, minute = 30 }

[api]
bind = "127.0.0.1:8000"
# api_key = "CHANGE_ME"  # required when binding to a non-localhost address
"#;

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    Path::new(path).to_path_buf()
}
