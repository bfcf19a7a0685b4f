//! GitHub Actions output formatter.
//!
//! Produces output in GitHub Actions workflow command format:
//! ::error file={name},line={line},col={col}::{message}

use crate::analyzer::checks::Severity;
use crate::analyzer::project::AnalysisReport;

/// Format a report for GitHub Actions.
pub fn format(report: &AnalysisReport) -> String {
    let mut output = String::new();

    for err in &report.parse_errors {
        output.push_str(&format!(
            "::error file={},line={}::Parse error: {}\n",
            report.display_path(&err.file),
            err.position.line,
            escape_github(&err.message)
        ));
    }

    for err in &report.evaluation_errors {
        output.push_str(&format!(
            "::warning file={}::Template evaluation failed: {}\n",
            report.display_path(&err.file),
            escape_github(&err.message)
        ));
    }

    for issue in &report.issues {
        let level = match issue.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info | Severity::Style | Severity::Ignore => "notice",
        };
        output.push_str(&format!(
            "::{} file={},line={},col={},endLine={},endColumn={},title={}::{}\n",
            level,
            report.display_path(&issue.file),
            issue.range.start.line,
            // GitHub columns are 1-based
            issue.range.start.line_offset + 1,
            issue.range.end.line,
            issue.range.end.line_offset + 1,
            issue.code,
            escape_github(&issue.message)
        ));
    }

    output
}

/// Escape special characters for GitHub Actions.
fn escape_github(s: &str) -> String {
    s.replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}
