//! Analyzer configuration.
//!
//! Loaded from `.iac-analyzer.yaml` (or `.yml`) in the analyzed directory:
//!
//! ```yaml
//! ignored: [K8S002]
//! override:
//!   error: [K8S001]
//! failure-threshold: warning
//! exclude: ["vendor/**"]
//! parallel: true
//! engine:
//!   path: /opt/engines/go-template-engine
//!   timeout-ms: 5000
//!   scratch-dir: /var/tmp/iac
//! ```

pub mod types;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analyzer::checks::{RuleCode, Severity};

pub use types::{AnalyzerConfig, DEFAULT_EVALUATION_TIMEOUT, EngineConfig};

const CONFIG_FILE_NAMES: [&str; 2] = [".iac-analyzer.yaml", ".iac-analyzer.yml"];

/// Errors that can occur when loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Invalid value for `{key}`: {message}")]
    InvalidValue { key: String, message: String },
    #[error("Invalid exclude pattern `{0}`")]
    InvalidPattern(String),
    #[error("Template engine not found at {0}")]
    EngineNotFound(PathBuf),
}

impl AnalyzerConfig {
    /// Load config from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml_str(&content)
    }

    /// Load config from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let value: serde_yaml::Value =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        let mut config = Self::default();
        if value.is_null() {
            return Ok(config);
        }

        // Parse ignored rules
        if let Some(ignored) = value.get("ignored").and_then(|v| v.as_sequence()) {
            for item in ignored {
                if let Some(code) = item.as_str() {
                    config.ignored_rules.insert(RuleCode::new(code));
                }
            }
        }

        // Parse override.<severity>
        if let Some(overrides) = value.get("override").and_then(|v| v.as_mapping()) {
            for (key, codes) in overrides {
                let Some(name) = key.as_str() else { continue };
                let severity = Severity::parse(name).ok_or_else(|| ConfigError::InvalidValue {
                    key: format!("override.{name}"),
                    message: "unknown severity".to_string(),
                })?;
                for code in codes.as_sequence().into_iter().flatten() {
                    if let Some(code) = code.as_str() {
                        config.severity_overrides.insert(RuleCode::new(code), severity);
                    }
                }
            }
        }

        if let Some(threshold) = value.get("failure-threshold").and_then(|v| v.as_str()) {
            config.failure_threshold =
                Severity::parse(threshold).ok_or_else(|| ConfigError::InvalidValue {
                    key: "failure-threshold".to_string(),
                    message: format!("unknown severity `{threshold}`"),
                })?;
        }

        if let Some(patterns) = value.get("exclude").and_then(|v| v.as_sequence()) {
            for pattern in patterns.iter().filter_map(|p| p.as_str()) {
                glob::Pattern::new(pattern)
                    .map_err(|_| ConfigError::InvalidPattern(pattern.to_string()))?;
                config.exclude_patterns.push(pattern.to_string());
            }
        }

        if let Some(parallel) = value.get("parallel").and_then(|v| v.as_bool()) {
            config.parallel = parallel;
        }

        if let Some(engine) = value.get("engine").and_then(|v| v.as_mapping()) {
            if let Some(path) = engine.get("path").and_then(|v| v.as_str()) {
                config.engine.path = Some(PathBuf::from(path));
            }
            if let Some(timeout) = engine.get("timeout-ms") {
                let millis = timeout.as_u64().ok_or_else(|| ConfigError::InvalidValue {
                    key: "engine.timeout-ms".to_string(),
                    message: "expected a positive integer".to_string(),
                })?;
                config.engine.timeout = Duration::from_millis(millis);
            }
            if let Some(dir) = engine.get("scratch-dir").and_then(|v| v.as_str()) {
                config.engine.scratch_dir = Some(PathBuf::from(dir));
            }
        }

        Ok(config)
    }

    /// Find and load config from `dir`, falling back to defaults.
    pub fn find_and_load(dir: &Path) -> Result<Self, ConfigError> {
        for name in CONFIG_FILE_NAMES {
            let path = dir.join(name);
            if path.is_file() {
                return Self::from_yaml_file(&path);
            }
        }
        Ok(Self::default())
    }

    /// Checks that must pass before any file is analyzed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.engine.path {
            if !path.is_file() {
                return Err(ConfigError::EngineNotFound(path.clone()));
            }
        }
        for pattern in &self.exclude_patterns {
            glob::Pattern::new(pattern).map_err(|_| ConfigError::InvalidPattern(pattern.clone()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AnalyzerConfig::default();
        assert!(config.ignored_rules.is_empty());
        assert_eq!(config.failure_threshold, Severity::Warning);
        assert_eq!(config.engine.timeout, DEFAULT_EVALUATION_TIMEOUT);
        assert!(config.engine.path.is_none());
        assert!(config.parallel);
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
ignored:
  - K8S002

override:
  error:
    - K8S001
  info:
    - DKR001

failure-threshold: error
exclude:
  - "vendor/**"
parallel: false
engine:
  path: /opt/engine
  timeout-ms: 2500
  scratch-dir: /var/tmp/iac
"#;

        let config = AnalyzerConfig::from_yaml_str(yaml).unwrap();
        assert!(config.is_rule_ignored(&RuleCode::new("K8S002")));
        assert_eq!(
            config.effective_severity(&RuleCode::new("K8S001"), Severity::Warning),
            Severity::Error
        );
        assert_eq!(
            config.effective_severity(&RuleCode::new("DKR001"), Severity::Warning),
            Severity::Info
        );
        assert_eq!(config.failure_threshold, Severity::Error);
        assert!(!config.parallel);
        assert_eq!(config.engine.path, Some(PathBuf::from("/opt/engine")));
        assert_eq!(config.engine.timeout, Duration::from_millis(2500));
        assert_eq!(config.engine.scratch_dir, Some(PathBuf::from("/var/tmp/iac")));
        assert!(config.is_excluded(Path::new("vendor/chart/templates/a.yaml")));
        assert!(!config.is_excluded(Path::new("charts/web/templates/a.yaml")));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            AnalyzerConfig::from_yaml_str("failure-threshold: loud"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            AnalyzerConfig::from_yaml_str("engine:\n  timeout-ms: soon"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            AnalyzerConfig::from_yaml_str("exclude: ['[']"),
            Err(ConfigError::InvalidPattern(_))
        ));
        assert!(matches!(
            AnalyzerConfig::from_yaml_str("ignored: [unclosed"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = AnalyzerConfig::from_yaml_str("").unwrap();
        assert!(config.exclude_patterns.is_empty());
    }

    #[test]
    fn test_builder_pattern() {
        let config = AnalyzerConfig::new()
            .ignore("K8S001")
            .with_threshold(Severity::Error)
            .with_timeout(Duration::from_millis(50))
            .with_parallel(false);

        assert!(config.is_rule_ignored(&RuleCode::new("K8S001")));
        assert_eq!(config.failure_threshold, Severity::Error);
        assert_eq!(config.engine.timeout, Duration::from_millis(50));
        assert!(!config.parallel);
    }

    #[test]
    fn test_validate_reports_missing_engine() {
        let config = AnalyzerConfig::new().with_engine("/definitely/not/here/engine");
        assert_eq!(
            config.validate(),
            Err(ConfigError::EngineNotFound(PathBuf::from("/definitely/not/here/engine")))
        );
        assert!(AnalyzerConfig::new().validate().is_ok());
    }

    #[test]
    fn test_find_and_load() {
        let dir = TempDir::new().unwrap();
        assert!(AnalyzerConfig::find_and_load(dir.path()).unwrap().ignored_rules.is_empty());

        fs::write(dir.path().join(".iac-analyzer.yml"), "ignored: [DKR001]\n").unwrap();
        let config = AnalyzerConfig::find_and_load(dir.path()).unwrap();
        assert!(config.is_rule_ignored(&RuleCode::new("DKR001")));
    }
}
