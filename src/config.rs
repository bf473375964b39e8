//! Runtime settings for the attendance pipeline.
//!
//! Every field has a default, so an absent or partial JSON file is valid.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::decode::Encoding;
use crate::error::{ProcessError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogTableMode {
    #[default]
    Global,
    Cohort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    pub schema: String,
    pub timeout_ms: u64,
    pub retry_count: u32,
    pub max_connections: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            schema: "attendance".to_string(),
            timeout_ms: 5000,
            retry_count: 2,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub presence_threshold_fraction: f64,
    /// Used when the export carries no "Meeting duration" line.
    pub default_meeting_minutes: u32,
    pub min_row_fields: usize,
    pub log_table: LogTableMode,
    pub encodings: Vec<Encoding>,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_resume_delay_secs: u64,
    pub store: StoreSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            presence_threshold_fraction: 0.10,
            default_meeting_minutes: 90,
            min_row_fields: 4,
            log_table: LogTableMode::Global,
            encodings: vec![
                Encoding::Utf8,
                Encoding::Utf16,
                Encoding::Latin1,
                Encoding::Cp1252,
            ],
            heartbeat_interval_secs: 30,
            heartbeat_resume_delay_secs: 5,
            store: StoreSettings::default(),
        }
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)?;
                serde_json::from_str(&contents)
                    .map_err(|e| ProcessError::Settings(e.to_string()))?
            }
            None => Self::default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let fraction = self.presence_threshold_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(ProcessError::Settings(format!(
                "presenceThresholdFraction must be in (0, 1], got {fraction}"
            )));
        }
        // Name and duration live in the first four columns.
        if self.min_row_fields < 4 {
            return Err(ProcessError::Settings(format!(
                "minRowFields must be at least 4, got {}",
                self.min_row_fields
            )));
        }
        if self.encodings.is_empty() {
            return Err(ProcessError::Settings("encodings must not be empty".into()));
        }
        let schema = &self.store.schema;
        let schema_ok = schema
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase())
            && schema
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !schema_ok {
            return Err(ProcessError::Settings(format!(
                "store.schema must be a lowercase identifier, got '{schema}'"
            )));
        }
        Ok(())
    }
}
