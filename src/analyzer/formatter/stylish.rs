//! Stylish (colored terminal) output formatter.

use std::collections::BTreeMap;
use std::path::Path;

use colored::Colorize;

use crate::analyzer::checks::Severity;
use crate::analyzer::project::AnalysisReport;

fn severity_label(severity: Severity) -> String {
    match severity {
        Severity::Error => "error".red().to_string(),
        Severity::Warning => "warning".yellow().to_string(),
        Severity::Info => "info".blue().to_string(),
        Severity::Style | Severity::Ignore => severity.as_str().dimmed().to_string(),
    }
}

fn plural(count: usize, word: &str) -> String {
    format!("{} {}{}", count, word, if count == 1 { "" } else { "s" })
}

/// Format a report in stylish format, grouped by file.
pub fn format(report: &AnalysisReport) -> String {
    let mut by_file: BTreeMap<&Path, Vec<String>> = BTreeMap::new();

    for err in &report.parse_errors {
        by_file.entry(&err.file).or_default().push(format!(
            "  {}  {}  {}",
            err.position,
            severity_label(Severity::Error),
            err.message
        ));
    }
    for err in &report.evaluation_errors {
        by_file.entry(&err.file).or_default().push(format!(
            "  {}  {} (analyzed as plain YAML)",
            severity_label(Severity::Warning),
            err.message
        ));
    }
    for issue in &report.issues {
        let lines = by_file.entry(&issue.file).or_default();
        lines.push(format!(
            "  {}:{}  {}  {}  {}",
            issue.line(),
            issue.column(),
            severity_label(issue.severity),
            issue.message,
            issue.code.as_str().dimmed()
        ));
        for secondary in &issue.secondary {
            let location = match &secondary.file {
                Some(file) => format!("{}:{}", report.display_path(file), secondary.range.start),
                None => secondary.range.start.to_string(),
            };
            lines.push(format!("      {} {}", location.dimmed(), secondary.message));
        }
    }
    for fault in &report.faults {
        by_file
            .entry(&fault.file)
            .or_default()
            .push(format!("  {}  {}  {}", fault.range.start, "fault".magenta(), fault));
    }

    let mut output = String::new();
    for (file, lines) in &by_file {
        output.push_str(&format!("\n{}\n", report.display_path(file).to_string().underline()));
        for line in lines {
            output.push_str(line);
            output.push('\n');
        }
    }

    let errors = report.error_count + report.parse_errors.len();
    let warnings = report.warning_count;
    let others = report.info_count + report.style_count;
    if errors + warnings + others > 0 {
        let mut parts = vec![plural(errors, "error"), plural(warnings, "warning")];
        if others > 0 {
            parts.push(plural(others, "note"));
        }
        output.push('\n');
        output.push_str(&format!(
            "  {} ({})\n",
            plural(errors + warnings + others, "problem").bold(),
            parts.join(", ")
        ));
    }
    if !report.evaluation_errors.is_empty() {
        output.push_str(&format!(
            "  {} could not be evaluated\n",
            plural(report.evaluation_errors.len(), "template")
        ));
    }

    output
}
