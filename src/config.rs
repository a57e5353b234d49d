//! Agent settings persisted as JSON.
//!
//! The file keeps the original agent's PascalCase key names so an existing
//! `settings.json` keeps working. A missing file is replaced with defaults;
//! a `LastGradeCheck` in the future is discarded on load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Minimum grade check interval, in seconds (1 minute).
pub const MIN_CHECK_INTERVAL: u64 = 60;
/// Default grade check interval, in seconds (30 minutes).
pub const DEFAULT_CHECK_INTERVAL: u64 = 1800;
/// Maximum grade check interval, in seconds (12 hours).
pub const MAX_CHECK_INTERVAL: u64 = 43200;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read or write settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(rename = "CheckingEnabled")]
    pub checking_enabled: bool,

    #[serde(rename = "CoursesPublic")]
    pub courses_public: bool,

    /// Seconds between grade checks, clamped to
    /// [`MIN_CHECK_INTERVAL`]..=[`MAX_CHECK_INTERVAL`] when read.
    #[serde(rename = "GradeCheckInterval")]
    pub grade_check_interval: u64,

    #[serde(rename = "LastGradeCheck")]
    pub last_grade_check: Option<DateTime<Utc>>,

    #[serde(rename = "LogLevel")]
    pub log_level: String,

    #[serde(rename = "CustomHostname")]
    pub custom_hostname: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            checking_enabled: true,
            courses_public: false,
            grade_check_interval: DEFAULT_CHECK_INTERVAL,
            last_grade_check: None,
            log_level: "info".to_string(),
            custom_hostname: None,
        }
    }
}

impl Settings {
    /// Loads settings from `path`, writing defaults back when the file is
    /// missing.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            warn!(path = %path.display(), "settings file missing, writing defaults");
            let settings = Settings::default();
            settings.save(path)?;
            return Ok(settings);
        }

        let json = fs::read_to_string(path)?;
        let mut settings: Settings = serde_json::from_str(&json)?;

        if let Some(last) = settings.last_grade_check {
            if last > Utc::now() {
                warn!("last grade check is in the future, resetting it");
                settings.last_grade_check = None;
            }
        }

        info!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    /// Reads just the log level out of an existing settings file.
    ///
    /// Emits no log events: the subscriber filter has to be built from this
    /// value before [`Settings::load`] can announce anything.
    pub fn peek_log_level(path: &Path) -> Option<String> {
        let json = fs::read_to_string(path).ok()?;
        let settings: Settings = serde_json::from_str(&json).ok()?;
        Some(settings.log_level)
    }

    /// Saves settings to `path`.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// The check interval as a duration, clamped into the allowed range.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(
            self.grade_check_interval
                .clamp(MIN_CHECK_INTERVAL, MAX_CHECK_INTERVAL),
        )
    }
}
