use anyhow::Result;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::db::ChatSettings;
use crate::error::StorylineError;
use crate::provider::SourceType;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub media: MediaConfig,

    #[serde(default)]
    pub google_drive: GoogleDriveConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub locks: LockConfig,

    #[serde(default)]
    pub posting: PostingConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub instagram: InstagramConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub sqlite_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Provider used when neither the caller nor the tenant names one.
    #[serde(default)]
    pub source_type: SourceType,

    /// Global source root: a directory for `local`, a folder id for cloud providers.
    #[serde(default)]
    pub source_root: Option<String>,

    /// Fallback directory for the local provider when no root is configured.
    #[serde(default = "default_local_media_dir")]
    pub local_media_dir: PathBuf,

    #[serde(default = "default_media_extensions")]
    pub extensions: Vec<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            source_type: SourceType::default(),
            source_root: None,
            local_media_dir: default_local_media_dir(),
            extensions: default_media_extensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleDriveConfig {
    #[serde(default)]
    pub folder_id: Option<String>,

    /// OAuth access token with the `drive.readonly` scope.
    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GoogleDriveConfig {
    fn default() -> Self {
        Self {
            folder_id: None,
            access_token: None,
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_posts_per_day")]
    pub posts_per_day: u32,

    /// Start of the posting window, hour of day in UTC (0-23).
    #[serde(default = "default_window_start")]
    pub window_start_hour: u32,

    /// End of the posting window (0-24). Smaller than the start means the
    /// window crosses midnight.
    #[serde(default = "default_window_end")]
    pub window_end_hour: u32,

    #[serde(default = "default_jitter_minutes")]
    pub jitter_minutes: i64,

    /// Category name to proportion of slots. Empty disables allocation.
    #[serde(default)]
    pub category_mix: BTreeMap<String, f64>,
}

fn default_posts_per_day() -> u32 {
    3
}

fn default_window_start() -> u32 {
    9
}

fn default_window_end() -> u32 {
    21
}

fn default_jitter_minutes() -> i64 {
    30
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            posts_per_day: default_posts_per_day(),
            window_start_hour: default_window_start(),
            window_end_hour: default_window_end(),
            jitter_minutes: default_jitter_minutes(),
            category_mix: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Retention after a successful post before the item may be reselected.
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u32,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_ttl_days() -> u32 {
    30
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_days: default_ttl_days(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostingConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Pending items this far past their slot are skipped by the cleanup sweep.
    #[serde(default = "default_stale_after_hours")]
    pub stale_after_hours: i64,
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_stale_after_hours() -> i64 {
    48
}

impl Default for PostingConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            stale_after_hours: default_stale_after_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: Option<String>,

    /// Chat used for items that belong to no tenant.
    #[serde(default)]
    pub default_chat_id: Option<i64>,

    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            default_chat_id: None,
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstagramConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default)]
    pub account_id: Option<String>,

    /// Public URL prefix under which media files are reachable by the Graph API.
    #[serde(default)]
    pub media_base_url: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for InstagramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            access_token: None,
            account_id: None,
            media_base_url: None,
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("storyline")
        .join("storyline.db")
}

fn default_local_media_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("storyline")
        .join("media")
}

fn default_media_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "webp", "heic", "mp4", "mov"]
        .iter()
        .map(|e| e.to_string())
        .collect()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load from `path`, writing a default file there when none exists.
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save_to(path)?;
            config
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("STORYLINE_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("storyline")
    }

    pub fn validate(&self) -> Result<(), StorylineError> {
        let s = &self.schedule;
        check_cadence(
            "schedule",
            Some(s.posts_per_day),
            Some(s.window_start_hour),
            Some(s.window_end_hour),
        )?;
        if s.jitter_minutes < 0 {
            return Err(StorylineError::InvalidConfig(
                "schedule.jitter_minutes cannot be negative".to_string(),
            ));
        }
        if let Some((name, _)) = s.category_mix.iter().find(|(_, r)| !(**r >= 0.0)) {
            return Err(StorylineError::InvalidConfig(format!(
                "category ratio for '{}' must be a non-negative number",
                name
            )));
        }
        Ok(())
    }
}

/// Range checks shared by the global schedule and tenant overrides.
/// A window whose start equals its end has no length, so it is rejected.
pub fn check_cadence(
    scope: &str,
    posts_per_day: Option<u32>,
    window_start: Option<u32>,
    window_end: Option<u32>,
) -> Result<(), StorylineError> {
    if posts_per_day == Some(0) {
        return Err(StorylineError::InvalidConfig(format!(
            "{}: posts_per_day must be at least 1",
            scope
        )));
    }
    if window_start.is_some_and(|h| h > 23) || window_end.is_some_and(|h| h > 24) {
        return Err(StorylineError::InvalidConfig(format!(
            "{}: posting window {:?}-{:?} is out of range",
            scope, window_start, window_end
        )));
    }
    if let (Some(start), Some(end)) = (window_start, window_end) {
        if start == end {
            return Err(StorylineError::InvalidConfig(format!(
                "{}: posting window {}-{} is empty",
                scope, start, end
            )));
        }
    }
    Ok(())
}

/// Where a sync run reads from, resolved once per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub source_type: SourceType,
    pub source_root: String,
}

impl SyncSettings {
    /// Precedence: explicit argument, then the tenant row, then the global config.
    /// An empty local root falls back to the default media directory.
    pub fn resolve(
        source_type: Option<SourceType>,
        source_root: Option<&str>,
        tenant: Option<&ChatSettings>,
        config: &Config,
    ) -> Self {
        let source_type = source_type
            .or_else(|| tenant.and_then(|t| t.media_source_type))
            .unwrap_or(config.media.source_type);

        let root = source_root
            .map(str::to_string)
            .or_else(|| tenant.and_then(|t| t.media_source_root.clone()))
            .or_else(|| match source_type {
                SourceType::Local => config.media.source_root.clone(),
                SourceType::GoogleDrive => config
                    .google_drive
                    .folder_id
                    .clone()
                    .or_else(|| config.media.source_root.clone()),
            })
            .unwrap_or_default();

        let source_root = if root.trim().is_empty() && source_type == SourceType::Local {
            config.media.local_media_dir.to_string_lossy().to_string()
        } else {
            root
        };

        Self {
            source_type,
            source_root,
        }
    }
}

/// Posting cadence for one tenant.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleSettings {
    pub posts_per_day: u32,
    pub window_start_hour: u32,
    pub window_end_hour: u32,
    pub jitter_minutes: i64,
    pub ttl_days: u32,
    pub category_mix: BTreeMap<String, f64>,
}

impl ScheduleSettings {
    pub fn resolve(tenant: Option<&ChatSettings>, config: &Config) -> Self {
        let s = &config.schedule;
        Self {
            posts_per_day: tenant
                .and_then(|t| t.posts_per_day)
                .unwrap_or(s.posts_per_day)
                .max(1),
            window_start_hour: tenant
                .and_then(|t| t.posting_window_start)
                .unwrap_or(s.window_start_hour),
            window_end_hour: tenant
                .and_then(|t| t.posting_window_end)
                .unwrap_or(s.window_end_hour),
            jitter_minutes: s.jitter_minutes,
            ttl_days: config.locks.ttl_days,
            category_mix: s.category_mix.clone(),
        }
    }

    /// Window length in hours; `end < start` wraps past midnight.
    pub fn window_hours(&self) -> f64 {
        let start = self.window_start_hour as f64;
        let end = self.window_end_hour as f64;
        if self.window_end_hour < self.window_start_hour {
            (24.0 - start) + end
        } else {
            end - start
        }
    }

    /// Nominal spacing between two consecutive slots.
    pub fn slot_interval(&self) -> Duration {
        let minutes = self.window_hours() * 60.0 / self.posts_per_day.max(1) as f64;
        Duration::minutes(minutes.round() as i64)
    }
}
