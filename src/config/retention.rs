//! Retention configuration.
//!
//! Selects which directory tree is swept and how old a log file must be
//! before it is deleted.
//!
//! # Example
//!
//! ```toml
//! [retention]
//! base_path = "/var/log/iis"
//! expire_days = 30
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::ValidationError;

/// Field names used in validation messages.
const BASE_PATH_FIELD: &str = "base_path";
const EXPIRE_DAYS_FIELD: &str = "expire_days";

/// Retention section as written in the config file.
///
/// Both fields are optional here so that command-line flags can fill in or
/// override them. Nothing is checked until [`RetentionSection::resolve`] is
/// called, which happens every time a sweep is about to start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionSection {
    /// Directory whose immediate subdirectories hold the log files.
    #[serde(default)]
    pub base_path: Option<String>,

    /// Age in days after which a log file is deleted.
    /// Accepts a TOML integer or a string.
    #[serde(default)]
    pub expire_days: Option<ExpireDaysInput>,
}

/// Raw expiry value, kept as typed so it can be validated with a useful message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpireDaysInput {
    Number(i64),
    Text(String),
}

impl ExpireDaysInput {
    fn as_text(&self) -> String {
        match self {
            ExpireDaysInput::Number(n) => n.to_string(),
            ExpireDaysInput::Text(s) => s.clone(),
        }
    }
}

impl RetentionSection {
    /// Return a copy with command-line values taking precedence.
    pub fn with_overrides(&self, base_path: Option<&str>, expire_days: Option<&str>) -> Self {
        Self {
            base_path: base_path
                .map(str::to_string)
                .or_else(|| self.base_path.clone()),
            expire_days: expire_days
                .map(|d| ExpireDaysInput::Text(d.to_string()))
                .or_else(|| self.expire_days.clone()),
        }
    }

    /// Validate the section into a [`RetentionConfig`].
    pub fn resolve(&self) -> Result<RetentionConfig, ValidationError> {
        let base_path = self.base_path.as_deref().unwrap_or_default();
        let expire_days = self
            .expire_days
            .as_ref()
            .map(ExpireDaysInput::as_text)
            .unwrap_or_default();
        RetentionConfig::from_input(base_path, &expire_days)
    }
}

/// Validated retention settings for a single sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Existing directory containing one subdirectory per site.
    pub base_path: PathBuf,
    /// Files last modified more than this many days ago are deleted.
    pub expire_days: u32,
}

impl RetentionConfig {
    /// Build a config from raw operator input.
    ///
    /// Checks run in a fixed order: base path present, expiry present,
    /// expiry numeric, base path exists. The first failure is returned.
    pub fn from_input(base_path: &str, expire_days_text: &str) -> Result<Self, ValidationError> {
        if base_path.trim().is_empty() {
            return Err(ValidationError::Required {
                field: BASE_PATH_FIELD,
            });
        }

        let expire_days_text = expire_days_text.trim();
        if expire_days_text.is_empty() {
            return Err(ValidationError::Required {
                field: EXPIRE_DAYS_FIELD,
            });
        }

        let expire_days =
            expire_days_text
                .parse::<u32>()
                .map_err(|_| ValidationError::NotANumber {
                    field: EXPIRE_DAYS_FIELD,
                    value: expire_days_text.to_string(),
                })?;

        let base_path = PathBuf::from(base_path);
        if !base_path.is_dir() {
            return Err(ValidationError::DirectoryNotFound {
                field: BASE_PATH_FIELD,
                path: base_path,
            });
        }

        Ok(Self {
            base_path,
            expire_days,
        })
    }

    pub fn new(base_path: impl AsRef<Path>, expire_days: u32) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            expire_days,
        }
    }

    /// Retention window as a duration.
    pub fn expiry_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.expire_days))
    }
}
