// ⚙️ Redistribution configuration - settings as data
// Loaded from JSON; every field falls back to the domain default.

use crate::error::{RedistributionError, RedistributionResult};
use crate::redistribution::RedistributionEngine;
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_MAX_EFFICIENCY: f64 = 1.0;
pub const DEFAULT_CONSERVATION_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedistributionConfig {
    /// Admissible ceiling for a single entity's efficiency
    #[serde(default = "default_max_efficiency")]
    pub max_efficiency: f64,

    /// Reject a negative ceiling instead of warning about it
    #[serde(default = "default_strict")]
    pub strict: bool,

    /// Relative tolerance for conservation checks
    #[serde(default = "default_conservation_tolerance")]
    pub conservation_tolerance: f64,
}

fn default_max_efficiency() -> f64 {
    DEFAULT_MAX_EFFICIENCY
}

fn default_strict() -> bool {
    true
}

fn default_conservation_tolerance() -> f64 {
    DEFAULT_CONSERVATION_TOLERANCE
}

impl RedistributionConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: RedistributionConfig =
            serde_json::from_str(&content).context("Failed to parse redistribution config JSON")?;

        config.validate()?;

        Ok(config)
    }

    /// Check parameter domains (the ceiling sign is left to the engine's strict flag)
    pub fn validate(&self) -> RedistributionResult<()> {
        if !self.max_efficiency.is_finite() {
            return Err(RedistributionError::invalid_parameter(
                "max_efficiency",
                self.max_efficiency,
                "must be finite",
            ));
        }

        if !self.conservation_tolerance.is_finite() || self.conservation_tolerance < 0.0 {
            return Err(RedistributionError::invalid_parameter(
                "conservation_tolerance",
                self.conservation_tolerance,
                "must be finite and non-negative",
            ));
        }

        Ok(())
    }

    pub fn engine(&self) -> RedistributionEngine {
        RedistributionEngine::from_config(self)
    }
}

impl Default for RedistributionConfig {
    fn default() -> Self {
        RedistributionConfig {
            max_efficiency: DEFAULT_MAX_EFFICIENCY,
            strict: true,
            conservation_tolerance: DEFAULT_CONSERVATION_TOLERANCE,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_from_empty_object() {
        let file = write_config("{}");
        let config = RedistributionConfig::from_file(file.path()).unwrap();

        assert_eq!(config, RedistributionConfig::default());
        assert_eq!(config.max_efficiency, 1.0);
        assert!(config.strict);
    }

    #[test]
    fn test_partial_override() {
        let file = write_config(r#"{ "max_efficiency": 0.95, "strict": false }"#);
        let config = RedistributionConfig::from_file(file.path()).unwrap();

        assert_eq!(config.max_efficiency, 0.95);
        assert!(!config.strict);
        assert_eq!(config.conservation_tolerance, DEFAULT_CONSERVATION_TOLERANCE);

        let engine = config.engine();
        assert_eq!(engine.max_efficiency, 0.95);
        assert!(!engine.strict);
    }

    #[test]
    fn test_negative_tolerance_rejected() {
        let file = write_config(r#"{ "conservation_tolerance": -1.0 }"#);
        let err = RedistributionConfig::from_file(file.path()).unwrap_err();

        assert!(err.to_string().contains("conservation_tolerance"));
    }

    #[test]
    fn test_missing_file() {
        let err = RedistributionConfig::from_file("/nonexistent/redistribution.json").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ max_efficiency: ");
        assert!(RedistributionConfig::from_file(file.path()).is_err());
    }
}
