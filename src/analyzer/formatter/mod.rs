//! Output formatters for analysis reports.
//!
//! - JSON - Machine-readable JSON output
//! - Stylish - Colored terminal output (default)
//! - GitHub - GitHub Actions annotations

pub mod github;
pub mod json;
pub mod stylish;

use crate::analyzer::project::AnalysisReport;

/// Output format for analysis reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// JSON format for machine processing
    Json,
    /// Stylish colored terminal output (default)
    #[default]
    Stylish,
    /// GitHub Actions annotations
    GitHub,
}

impl OutputFormat {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "stylish" => Some(Self::Stylish),
            "github" | "github-actions" => Some(Self::GitHub),
            _ => None,
        }
    }
}

/// Format a report according to the specified format.
pub fn format_report(report: &AnalysisReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => json::format(report),
        OutputFormat::Stylish => stylish::format(report),
        OutputFormat::GitHub => github::format(report),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;

    use crate::analyzer::checks::{Issue, SecondaryLocation, Severity};
    use crate::analyzer::helm::processor::{FileEvaluationError, FileParseError};
    use crate::analyzer::location::{TextPointer, TextRange};
    use crate::analyzer::project::AnalysisReport;

    pub fn report() -> AnalysisReport {
        let issue = Issue::new(
            "K8S001",
            Severity::Warning,
            "Bind this resource's automounted service account to RBAC or disable automounting.",
            "/work/chart/templates/pod.yaml",
            TextRange::of(7, 2, 7, 12),
        )
        .with_secondary([SecondaryLocation::new(
            TextRange::of(4, 2, 4, 30),
            "Change this setting",
        )
        .in_file("/work/chart/templates/sa.yaml")]);
        let url = Issue::new(
            "K8S002",
            Severity::Error,
            "Make sure that using clear-text protocols is safe here.",
            "/work/chart/templates/pod.yaml",
            TextRange::of(12, 16, 12, 34),
        );
        AnalysisReport {
            base_dir: PathBuf::from("/work"),
            issues: vec![issue, url],
            parse_errors: vec![FileParseError {
                file: PathBuf::from("/work/broken.yaml"),
                message: "YAML syntax error: did not find expected node content".to_string(),
                position: TextPointer::new(3, 4),
            }],
            evaluation_errors: vec![FileEvaluationError {
                file: PathBuf::from("/work/chart/templates/job.yaml"),
                message: "template evaluation timed out after 10s".to_string(),
                timed_out: true,
            }],
            files_analyzed: 4,
            charts: 1,
            error_count: 1,
            warning_count: 1,
            ..AnalysisReport::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::parse("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("JSON"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("stylish"), Some(OutputFormat::Stylish));
        assert_eq!(OutputFormat::parse("github"), Some(OutputFormat::GitHub));
        assert_eq!(OutputFormat::parse("invalid"), None);
    }

    #[test]
    fn test_format_dispatch() {
        let report = test_support::report();
        assert!(format_report(&report, OutputFormat::Json).starts_with('{'));
        assert!(format_report(&report, OutputFormat::GitHub).starts_with("::"));
    }
}
