//! JSON output formatter.

use serde_json::json;

use crate::analyzer::project::AnalysisReport;

/// Format a report as JSON. Paths are relative to the analyzed directory and
/// positions are 1-based lines with 0-based columns.
pub fn format(report: &AnalysisReport) -> String {
    let path = |p: &std::path::Path| report.display_path(p).to_string();

    let issues: Vec<serde_json::Value> = report
        .issues
        .iter()
        .map(|issue| {
            let secondary: Vec<serde_json::Value> = issue
                .secondary
                .iter()
                .map(|s| {
                    json!({
                        "file": path(s.file.as_deref().unwrap_or(&issue.file)),
                        "message": s.message,
                        "range": s.range,
                    })
                })
                .collect();
            json!({
                "ruleId": issue.code.as_str(),
                "severity": issue.severity.as_str(),
                "message": issue.message,
                "file": path(&issue.file),
                "range": issue.range,
                "secondary": secondary,
            })
        })
        .collect();

    let parse_errors: Vec<serde_json::Value> = report
        .parse_errors
        .iter()
        .map(|e| json!({ "file": path(&e.file), "message": e.message, "position": e.position }))
        .collect();
    let evaluation_errors: Vec<serde_json::Value> = report
        .evaluation_errors
        .iter()
        .map(|e| json!({ "file": path(&e.file), "message": e.message, "timedOut": e.timed_out }))
        .collect();
    let faults: Vec<serde_json::Value> = report
        .faults
        .iter()
        .map(|f| {
            json!({
                "ruleId": f.code.as_str(),
                "file": path(&f.file),
                "range": f.range,
                "message": f.message,
            })
        })
        .collect();

    let output = json!({
        "issues": issues,
        "parseErrors": parse_errors,
        "evaluationErrors": evaluation_errors,
        "faults": faults,
        "summary": {
            "filesAnalyzed": report.files_analyzed,
            "filesSkipped": report.files_skipped,
            "charts": report.charts,
            "errorCount": report.error_count,
            "warningCount": report.warning_count,
            "infoCount": report.info_count,
            "styleCount": report.style_count,
        }
    });

    serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::formatter::test_support;

    #[test]
    fn test_json_format() {
        let output = format(&test_support::report());
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();

        let issues = parsed["issues"].as_array().unwrap();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0]["ruleId"], "K8S001");
        assert_eq!(issues[0]["file"], "chart/templates/pod.yaml");
        assert_eq!(issues[0]["secondary"][0]["file"], "chart/templates/sa.yaml");
        assert_eq!(issues[1]["severity"], "error");

        assert_eq!(parsed["parseErrors"][0]["file"], "broken.yaml");
        assert_eq!(parsed["evaluationErrors"][0]["timedOut"], true);
        assert_eq!(parsed["summary"]["filesAnalyzed"], 4);
        assert_eq!(parsed["summary"]["errorCount"], 1);
    }
}
