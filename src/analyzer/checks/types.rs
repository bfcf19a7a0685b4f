//! Core types for check results.
//!
//! - `Severity` - issue severity levels
//! - `RuleCode` - rule identifiers (e.g., "K8S001")
//! - `Issue` - one reported finding with its primary and secondary locations
//! - `RuleExecutionFault` - a rule callback that failed while scanning

use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::analyzer::location::TextRange;
use crate::analyzer::tree::NodeKind;

/// Severity levels for issues.
///
/// Ordered from most severe to least severe:
/// `Error > Warning > Info > Style > Ignore`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Critical issues that should always be fixed
    Error,
    /// Important issues that should usually be fixed
    #[default]
    Warning,
    /// Informational findings
    Info,
    /// Style recommendations
    Style,
    /// Ignored (rule disabled)
    Ignore,
}

impl Severity {
    /// Parse a severity from a string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warning" => Some(Self::Warning),
            "info" => Some(Self::Info),
            "style" => Some(Self::Style),
            "ignore" | "none" | "off" => Some(Self::Ignore),
            _ => None,
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Style => "style",
            Self::Ignore => "ignore",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Error => 4,
            Self::Warning => 3,
            Self::Info => 2,
            Self::Style => 1,
            Self::Ignore => 0,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A rule code identifier (e.g., "K8S001", "DKR001").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RuleCode(pub String);

impl RuleCode {
    /// Create a new rule code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Get the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RuleCode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RuleCode {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An auxiliary range pointing at context that contributes to an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecondaryLocation {
    pub range: TextRange,
    pub message: String,
    /// Set when the location lies in another file than the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl SecondaryLocation {
    pub fn new(range: TextRange, message: impl Into<String>) -> Self {
        Self {
            range,
            message: message.into(),
            file: None,
        }
    }

    pub fn in_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }
}

/// A finding reported by a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    /// The rule that raised it.
    pub code: RuleCode,
    /// Effective severity.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
    /// File the issue belongs to.
    pub file: PathBuf,
    /// Primary anchor.
    pub range: TextRange,
    /// Contributing locations, in the order the rule reported them.
    pub secondary: Vec<SecondaryLocation>,
}

impl Issue {
    pub fn new(
        code: impl Into<RuleCode>,
        severity: Severity,
        message: impl Into<String>,
        file: impl Into<PathBuf>,
        range: TextRange,
    ) -> Self {
        Self {
            code: code.into(),
            severity,
            message: message.into(),
            file: file.into(),
            range,
            secondary: Vec::new(),
        }
    }

    pub fn with_secondary(mut self, secondary: impl IntoIterator<Item = SecondaryLocation>) -> Self {
        self.secondary.extend(secondary);
        self
    }

    /// 1-based line of the primary location.
    pub fn line(&self) -> usize {
        self.range.start.line
    }

    /// 0-based column of the primary location.
    pub fn column(&self) -> usize {
        self.range.start.line_offset
    }
}

impl Ord for Issue {
    fn cmp(&self, other: &Self) -> Ordering {
        // Sort by file first, then position, then code
        self.file
            .cmp(&other.file)
            .then(self.range.cmp(&other.range))
            .then(self.code.cmp(&other.code))
    }
}

impl PartialOrd for Issue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A rule callback that panicked while visiting a node.
///
/// Recorded instead of propagated so that the other rules and the other files
/// keep running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleExecutionFault {
    pub code: RuleCode,
    pub file: PathBuf,
    pub kind: NodeKind,
    pub range: TextRange,
    pub message: String,
}

impl fmt::Display for RuleExecutionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed on {} at {}:{}: {}",
            self.code,
            self.kind,
            self.file.display(),
            self.range.start,
            self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert!(Severity::Info > Severity::Style);
        assert!(Severity::Style > Severity::Ignore);
    }

    #[test]
    fn test_severity_from_str() {
        assert_eq!(Severity::parse("error"), Some(Severity::Error));
        assert_eq!(Severity::parse("WARNING"), Some(Severity::Warning));
        assert_eq!(Severity::parse("off"), Some(Severity::Ignore));
        assert_eq!(Severity::parse("invalid"), None);
    }

    #[test]
    fn test_issue_ordering() {
        let issue = |file: &str, line: usize, code: &str| {
            Issue::new(code, Severity::Warning, "msg", file, TextRange::of(line, 0, line, 1))
        };
        let mut issues = vec![
            issue("templates/pod.yaml", 3, "K8S001"),
            issue("Chart.yaml", 9, "K8S002"),
            issue("templates/pod.yaml", 1, "K8S002"),
            issue("templates/pod.yaml", 1, "K8S001"),
        ];
        issues.sort();

        assert_eq!(issues[0].file, PathBuf::from("Chart.yaml"));
        assert_eq!((issues[1].line(), issues[1].code.as_str()), (1, "K8S001"));
        assert_eq!((issues[2].line(), issues[2].code.as_str()), (1, "K8S002"));
        assert_eq!(issues[3].line(), 3);
    }
}
