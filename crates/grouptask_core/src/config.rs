//! Injected configuration for the task core.
//!
//! # Responsibility
//! - Carry every tunable the model and services use (reminder window,
//!   default reminder counts, completion quorum).
//! - Keep defaults in one place instead of module-level statics.
//!
//! # Invariants
//! - A config must pass `validate()` before services accept it.

use crate::model::daytime::{DaytimeWindow, MAX_OFFSET_MINUTES};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Local-hour window reminders are clamped into.
    pub daytime: DaytimeWindow,
    /// Reminders further in the past than this are suppressed.
    pub stale_reminder_grace_minutes: i64,
    /// Meeting locations are truncated to this many characters.
    pub meeting_location_max_chars: usize,
    /// Reminder lead time for new to-dos when the caller gives none.
    pub default_todo_reminder_minutes: i64,
    /// Reminder count for new to-dos when the caller gives none.
    pub default_todo_reminder_count: u32,
    /// Completion percentage at which a to-do counts as done.
    pub completion_threshold_percent: f64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            daytime: DaytimeWindow::default(),
            stale_reminder_grace_minutes: 60,
            meeting_location_max_chars: 50,
            default_todo_reminder_minutes: 60,
            default_todo_reminder_count: 2,
            completion_threshold_percent: 50.0,
        }
    }
}

impl TaskConfig {
    /// Parses a JSON document; missing keys take their defaults.
    pub fn from_json_str(value: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(value).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.daytime
            .validate()
            .map_err(|err| ConfigError::invalid("daytime", err.to_string()))?;
        for (field, minutes) in [
            ("stale_reminder_grace_minutes", self.stale_reminder_grace_minutes),
            ("default_todo_reminder_minutes", self.default_todo_reminder_minutes),
        ] {
            if !(0..=MAX_OFFSET_MINUTES).contains(&minutes) {
                return Err(ConfigError::invalid(
                    field,
                    format!("must be in 0..={MAX_OFFSET_MINUTES}, got {minutes}"),
                ));
            }
        }
        if self.meeting_location_max_chars == 0 {
            return Err(ConfigError::invalid(
                "meeting_location_max_chars",
                "must be positive",
            ));
        }
        if !(self.completion_threshold_percent > 0.0 && self.completion_threshold_percent <= 100.0)
        {
            return Err(ConfigError::invalid(
                "completion_threshold_percent",
                format!("must be in (0, 100], got {}", self.completion_threshold_percent),
            ));
        }
        Ok(())
    }

    pub fn stale_reminder_grace(&self) -> Duration {
        Duration::try_minutes(self.stale_reminder_grace_minutes).unwrap_or(Duration::MAX)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid task config: {err}"),
            Self::Invalid { field, reason } => write!(f, "invalid task config `{field}`: {reason}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Invalid { .. } => None,
        }
    }
}
