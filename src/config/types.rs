use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analyzer::checks::{RuleCode, Severity};

/// Default bound on one template evaluation.
pub const DEFAULT_EVALUATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Main analyzer configuration.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Rules to ignore (by code, e.g., "K8S001").
    pub ignored_rules: HashSet<RuleCode>,

    /// Severity overrides for specific rules.
    pub severity_overrides: HashMap<RuleCode, Severity>,

    /// Minimum severity that makes a run fail.
    pub failure_threshold: Severity,

    /// Glob patterns of files to skip, matched against paths relative to the base directory.
    pub exclude_patterns: Vec<String>,

    /// External template engine settings.
    pub engine: EngineConfig,

    /// Analyze charts in parallel.
    pub parallel: bool,
}

/// Settings of the external template engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Resolved path of the engine executable. `None` disables template evaluation.
    pub path: Option<PathBuf>,

    /// Bound on one evaluation.
    pub timeout: Duration,

    /// Directory where per-template work directories are created.
    /// Defaults to the system temporary directory.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: None,
            timeout: DEFAULT_EVALUATION_TIMEOUT,
            scratch_dir: None,
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            ignored_rules: HashSet::new(),
            severity_overrides: HashMap::new(),
            failure_threshold: Severity::Warning,
            exclude_patterns: Vec::new(),
            engine: EngineConfig::default(),
            parallel: true,
        }
    }
}

impl AnalyzerConfig {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule to ignore.
    pub fn ignore(mut self, rule: impl Into<RuleCode>) -> Self {
        self.ignored_rules.insert(rule.into());
        self
    }

    /// Override severity for a specific rule.
    pub fn with_severity(mut self, rule: impl Into<RuleCode>, severity: Severity) -> Self {
        self.severity_overrides.insert(rule.into(), severity);
        self
    }

    /// Set the failure threshold.
    pub fn with_threshold(mut self, threshold: Severity) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the template engine executable.
    pub fn with_engine(mut self, path: impl Into<PathBuf>) -> Self {
        self.engine.path = Some(path.into());
        self
    }

    /// Set the evaluation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.engine.timeout = timeout;
        self
    }

    /// Set the directory for engine work directories.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.engine.scratch_dir = Some(dir.into());
        self
    }

    /// Add an exclusion glob.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }

    /// Enable or disable parallel chart analysis.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Check if a rule is ignored.
    pub fn is_rule_ignored(&self, code: &RuleCode) -> bool {
        self.ignored_rules.contains(code)
    }

    /// Get the effective severity for a rule.
    pub fn effective_severity(&self, code: &RuleCode, default: Severity) -> Severity {
        self.severity_overrides
            .get(code)
            .copied()
            .unwrap_or(default)
    }

    /// Check if a path (relative to the base directory) is excluded.
    pub fn is_excluded(&self, relative: &Path) -> bool {
        let path = relative.to_string_lossy().replace('\\', "/");
        self.exclude_patterns.iter().any(|pattern| {
            glob::Pattern::new(pattern)
                .map(|p| p.matches(&path))
                .unwrap_or(false)
        })
    }
}
