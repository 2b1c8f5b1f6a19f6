use crate::track::store::{TrackStore, DEFAULT_MEMORY_DEPTH_MS};
use crate::track::Timestamp;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors produced when loading or validating [`FusionOptions`].
///
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Cannot read config file `{path}`: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Class that is used to configure the fusion engine.
///
/// Keys follow the aggregator configuration file: `memoryDepth`, `maxTrackDuration`,
/// `onlyReportLPs`. Absent keys take their defaults.
///
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionOptions {
    #[serde(rename = "memoryDepth")]
    memory_depth_ms: Timestamp,
    #[serde(rename = "maxTrackDuration")]
    max_track_duration_ms: Timestamp,
    #[serde(rename = "onlyReportLPs")]
    only_report_linked_plates: bool,
}

impl Default for FusionOptions {
    fn default() -> Self {
        Self {
            memory_depth_ms: DEFAULT_MEMORY_DEPTH_MS,
            max_track_duration_ms: 0,
            only_report_linked_plates: false,
        }
    }
}

impl FusionOptions {
    /// How long a track survives without a single observation, ms. After that it is final-reported
    /// and forgotten.
    ///
    pub fn memory_depth_ms(mut self, ms: Timestamp) -> Self {
        self.memory_depth_ms = ms;
        self
    }

    /// Observation span after which a track is final-reported even though it is still visible.
    /// `0` disables the policy.
    ///
    pub fn max_track_duration_ms(mut self, ms: Timestamp) -> Self {
        self.max_track_duration_ms = ms;
        self
    }

    /// When set, vehicles without a plate are still tracked but never reported and never cropped.
    ///
    pub fn only_report_linked_plates(mut self, v: bool) -> Self {
        self.only_report_linked_plates = v;
        self
    }

    pub fn get_memory_depth_ms(&self) -> Timestamp {
        self.memory_depth_ms
    }

    pub fn get_max_track_duration_ms(&self) -> Timestamp {
        self.max_track_duration_ms
    }

    pub fn get_only_report_linked_plates(&self) -> bool {
        self.only_report_linked_plates
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_depth_ms < 0 {
            return Err(ConfigError::invalid_value("memoryDepth", "must be >= 0"));
        }
        if self.max_track_duration_ms < 0 {
            return Err(ConfigError::invalid_value(
                "maxTrackDuration",
                "must be >= 0",
            ));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let opts: FusionOptions = serde_json::from_str(json)?;
        opts.validate()?;
        Ok(opts)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub(crate) fn store(&self) -> TrackStore {
        TrackStore::new(self.memory_depth_ms, self.max_track_duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use crate::fusion::options::{ConfigError, FusionOptions};
    use std::path::Path;

    #[test]
    fn defaults() {
        let opts = FusionOptions::default();
        assert_eq!(opts.get_memory_depth_ms(), 10_000);
        assert_eq!(opts.get_max_track_duration_ms(), 0);
        assert!(!opts.get_only_report_linked_plates());
        assert_eq!(FusionOptions::from_json_str("{}").unwrap(), opts);
    }

    #[test]
    fn plugin_keys() {
        let opts = FusionOptions::from_json_str(
            r#"{"memoryDepth": 5000, "maxTrackDuration": 60000, "onlyReportLPs": true}"#,
        )
        .unwrap();
        assert_eq!(
            opts,
            FusionOptions::default()
                .memory_depth_ms(5_000)
                .max_track_duration_ms(60_000)
                .only_report_linked_plates(true)
        );
        let store = opts.store();
        assert_eq!(store.memory_depth_ms(), 5_000);
        assert_eq!(store.max_track_duration_ms(), 60_000);
    }

    #[test]
    fn invalid() {
        assert!(matches!(
            FusionOptions::from_json_str(r#"{"memoryDepth": -1}"#),
            Err(ConfigError::InvalidValue { field: "memoryDepth", .. })
        ));
        assert!(matches!(
            FusionOptions::from_json_str(r#"{"memoryDepth": "ten"}"#),
            Err(ConfigError::Json(_))
        ));
        assert!(matches!(
            FusionOptions::from_json_file(Path::new("/nonexistent/fusion.json")),
            Err(ConfigError::FileRead { .. })
        ));
    }
}
