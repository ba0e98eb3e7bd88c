use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::range::AddrRange;

pub const DEFAULT_REGION_LENGTH: u64 = 100_000_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{probe} must have a {manager}")]
    MissingManager {
        probe: &'static str,
        manager: &'static str,
    },
    #[error("invalid address range {start:#x}-{end:#x}")]
    InvalidRange { start: u64, end: u64 },
    #[error("bad address range '{0}', expected START-END")]
    BadRange(String),
    #[error("parse error: {0}")]
    Parse(#[from] std::num::ParseIntError),
    #[error("at least one core is required")]
    NoCores,
    #[error("bad config json: {0}")]
    Json(String),
}

/// Everything needed to set up loop-point analysis on a set of cores.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Instructions per region before a marker may close it.
    pub region_length: u64,
    pub start_listening: bool,
    /// PCs outside this range are never profiled.
    pub bb_valid_range: AddrRange,
    /// Backward branches outside this range are not used as markers.
    pub marker_valid_range: AddrRange,
    pub bb_excluded_ranges: Vec<AddrRange>,
    pub cores: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            region_length: DEFAULT_REGION_LENGTH,
            start_listening: true,
            bb_valid_range: AddrRange::UNBOUNDED,
            marker_valid_range: AddrRange::UNBOUNDED,
            bb_excluded_ranges: Vec::new(),
            cores: 1,
        }
    }
}

impl AnalysisConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Json(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cores == 0 {
            return Err(ConfigError::NoCores);
        }

        self.bb_valid_range.validate()?;
        self.marker_valid_range.validate()?;
        for range in &self.bb_excluded_ranges {
            range.validate()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{AnalysisConfig, ConfigError, DEFAULT_REGION_LENGTH};
    use crate::range::AddrRange;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = AnalysisConfig::from_json(r#"{"cores": 4}"#).unwrap();
        assert_eq!(config.cores, 4);
        assert_eq!(config.region_length, DEFAULT_REGION_LENGTH);
        assert!(config.start_listening);
        assert_eq!(config.bb_valid_range, AddrRange::UNBOUNDED);
        assert!(config.bb_excluded_ranges.is_empty());
    }

    #[test]
    fn ranges_from_json() {
        let config = AnalysisConfig::from_json(
            r#"{
                "region_length": 1000,
                "bb_valid_range": {"start": 4096, "end": 8192},
                "bb_excluded_ranges": [{"start": 5000, "end": 5100}]
            }"#,
        )
        .unwrap();

        assert_eq!(config.region_length, 1000);
        assert_eq!(config.bb_valid_range, AddrRange::new(4096, 8192).unwrap());
        assert_eq!(config.bb_excluded_ranges.len(), 1);
    }

    #[test]
    fn rejects_bad_config() {
        let config = AnalysisConfig {
            cores: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoCores));

        let err = AnalysisConfig::from_json(r#"{"marker_valid_range": {"start": 9, "end": 3}}"#);
        assert_eq!(err, Err(ConfigError::InvalidRange { start: 9, end: 3 }));

        assert!(matches!(
            AnalysisConfig::from_json(r#"{"cores": "two"}"#),
            Err(ConfigError::Json(_))
        ));
    }
}
