//! Logic service configuration

use chrono::TimeDelta;
use medlogic_diagnostics::{EvalResult, LogicError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Longest rule result lifetime accepted, ten years
pub const MAX_RULE_TTL_SECONDS: i64 = 10 * 366 * 24 * 60 * 60;

/// Configuration for [`crate::LogicService`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogicConfig {
    /// Cache lifetime of rule results, for rules that do not declare one
    pub rule_ttl_seconds: i64,
    /// Concept classes whose concepts are registered as tokens on startup
    pub seed_concept_classes: Vec<String>,
    /// Data source concept rules read from
    pub default_data_source: String,
    /// Name of the concept that coded results must hold to count as true
    pub true_concept_name: String,
    pub cache_enabled: bool,
}

impl Default for LogicConfig {
    fn default() -> Self {
        Self {
            rule_ttl_seconds: 30 * 60,
            seed_concept_classes: ["Test", "Finding", "Diagnosis", "Question", "Symptom"]
                .into_iter()
                .map(String::from)
                .collect(),
            default_data_source: "obs".to_string(),
            true_concept_name: "TRUE".to_string(),
            cache_enabled: true,
        }
    }
}

impl LogicConfig {
    /// Load configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> EvalResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| LogicError::configuration(format!("Invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> EvalResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| LogicError::configuration(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> EvalResult<()> {
        if self.rule_ttl_seconds < 0 {
            return Err(LogicError::configuration(
                "rule_ttl_seconds must not be negative",
            ));
        }
        if self.rule_ttl_seconds > MAX_RULE_TTL_SECONDS {
            return Err(LogicError::configuration(format!(
                "rule_ttl_seconds must not exceed {MAX_RULE_TTL_SECONDS}"
            )));
        }
        if self.default_data_source.trim().is_empty() {
            return Err(LogicError::configuration(
                "default_data_source must not be empty",
            ));
        }
        Ok(())
    }

    pub fn rule_ttl(&self) -> TimeDelta {
        TimeDelta::seconds(self.rule_ttl_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = LogicConfig::from_json(r#"{"rule_ttl_seconds": 60}"#).unwrap();
        assert_eq!(config.rule_ttl(), TimeDelta::minutes(1));
        assert_eq!(config.default_data_source, "obs");
        assert!(config.cache_enabled);
    }

    #[test]
    fn test_rejects_negative_ttl() {
        let err = LogicConfig::from_json(r#"{"rule_ttl_seconds": -1}"#).unwrap_err();
        assert!(matches!(err, LogicError::Configuration { .. }));
    }

    #[test]
    fn test_rejects_ttl_beyond_ten_years() {
        let err = LogicConfig::from_json(r#"{"rule_ttl_seconds": 10000000000000}"#).unwrap_err();
        assert!(matches!(err, LogicError::Configuration { .. }));

        let config =
            LogicConfig::from_json(&format!(r#"{{"rule_ttl_seconds": {MAX_RULE_TTL_SECONDS}}}"#))
                .unwrap();
        assert_eq!(config.rule_ttl(), TimeDelta::seconds(MAX_RULE_TTL_SECONDS));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"seed_concept_classes": ["Drug"], "true_concept_name": "YES"}"#)
            .unwrap();
        file.flush().unwrap();

        let config = LogicConfig::from_file(file.path()).unwrap();
        assert_eq!(config.seed_concept_classes, vec!["Drug".to_string()]);
        assert_eq!(config.true_concept_name, "YES");
    }

    #[test]
    fn test_missing_file() {
        assert!(LogicConfig::from_file("/nonexistent/medlogic.json").is_err());
    }
}
