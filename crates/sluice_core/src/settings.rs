//! Settings management

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::EXCESS_BUFFER_COUNT;

/// Errors that can occur while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed settings")]
    Parse(#[from] serde_json::Error),

    #[error("invalid setting '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Allocator settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub diagnostics: DiagnosticsSettings,
    pub upload: UploadSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsSettings {
    pub stat_prefix: String,
    pub excess_buffer_count: u64,
    pub long_allocation_threshold_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Dynamic buffers up to this size live on the CPU and are bound inline.
    pub cpu_buffer_max_size: usize,
    pub pool_entry_size: usize,
    pub pool_max_entries: usize,
    pub staging_ring_slot_count: usize,
    /// Writes above this size skip the staging ring and go through the pool.
    pub bump_allocator_max_size: usize,
    /// Overrides the platform constant-buffer offset alignment.
    pub constant_buffer_alignment: Option<usize>,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            stat_prefix: sluice_metrics::DEFAULT_STAT_PREFIX.to_string(),
            excess_buffer_count: EXCESS_BUFFER_COUNT,
            long_allocation_threshold_ms: sluice_metrics::LONG_ALLOCATION_THRESHOLD.as_millis()
                as u64,
        }
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            cpu_buffer_max_size: 4 * 1024,
            pool_entry_size: 64 * 1024,
            pool_max_entries: 8,
            staging_ring_slot_count: 32,
            bump_allocator_max_size: 64 * 1024,
            constant_buffer_alignment: None,
        }
    }
}

impl Settings {
    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let settings = Self::from_json_str(&json)?;
        tracing::debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let upload = &self.upload;
        if upload.staging_ring_slot_count == 0 {
            return Err(SettingsError::Invalid {
                field: "upload.staging_ring_slot_count",
                reason: "must be at least 1".into(),
            });
        }
        if upload.pool_entry_size == 0 {
            return Err(SettingsError::Invalid {
                field: "upload.pool_entry_size",
                reason: "must be non-zero".into(),
            });
        }
        if let Some(alignment) = upload.constant_buffer_alignment {
            if !alignment.is_power_of_two() {
                return Err(SettingsError::Invalid {
                    field: "upload.constant_buffer_alignment",
                    reason: format!("{alignment} is not a power of two"),
                });
            }
        }
        Ok(())
    }
}
