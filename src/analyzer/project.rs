//! Project orchestration.
//!
//! Files are grouped by the chart that owns them; files outside any chart
//! form one standalone group, in which each file only sees resources of its
//! own directory tree. Each group runs in two phases:
//!
//! 1. **collect** - every file is evaluated and parsed, and the resources it
//!    declares go into the group's [`ChartAccumulator`]
//! 2. **check** - the accumulator is frozen into a [`ChartContext`] and every
//!    tree is scanned with it
//!
//! Groups are independent and run in parallel, as do the files of a group
//! within a phase.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};
use rayon::prelude::*;
use serde::Serialize;
use walkdir::WalkDir;

use crate::analyzer::checks::{all_checks, ChecksVisitor, Issue, RuleExecutionFault, Severity};
use crate::analyzer::docker::dockerfile::{is_dockerfile, parse_dockerfile};
use crate::analyzer::helm::chart::{find_chart_root, skip_reason, Chart};
use crate::analyzer::helm::engine::{PassthroughEngine, ProcessTemplateEngine, TemplateEngine};
use crate::analyzer::helm::processor::{
    Correlation, FileEvaluationError, FileParseError, HelmProcessor, ProcessedFile,
};
use crate::analyzer::kubernetes::context::{ChartAccumulator, ChartContext};
use crate::analyzer::kubernetes::resources::collect_resources;
use crate::analyzer::location::TextPointer;
use crate::config::AnalyzerConfig;
use crate::error::{AnalysisError, Result};

const YAML_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// Outcome of analyzing a project.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisReport {
    /// Canonical analyzed directory.
    pub base_dir: PathBuf,
    /// Findings, sorted by file then position.
    pub issues: Vec<Issue>,
    pub parse_errors: Vec<FileParseError>,
    pub evaluation_errors: Vec<FileEvaluationError>,
    pub faults: Vec<RuleExecutionFault>,
    pub files_analyzed: usize,
    pub files_skipped: usize,
    pub charts: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
    pub style_count: usize,
}

impl AnalysisReport {
    /// Sort findings and refresh the counts.
    fn finish(&mut self) {
        self.issues.sort();
        self.parse_errors.sort_by(|a, b| a.file.cmp(&b.file));
        self.evaluation_errors.sort_by(|a, b| a.file.cmp(&b.file));
        self.faults.sort_by(|a, b| a.file.cmp(&b.file).then(a.range.cmp(&b.range)));
        self.error_count = self.count(Severity::Error);
        self.warning_count = self.count(Severity::Warning);
        self.info_count = self.count(Severity::Info);
        self.style_count = self.count(Severity::Style);
    }

    /// Number of issues with exactly `severity`.
    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }

    /// Get the maximum severity in the results.
    pub fn max_severity(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity).max()
    }

    /// `path` relative to the analyzed directory, for display.
    pub fn display_path<'a>(&self, path: &'a Path) -> std::path::Display<'a> {
        path.strip_prefix(&self.base_dir).unwrap_or(path).display()
    }

    /// Check if the results should cause a non-zero exit.
    pub fn should_fail(&self, threshold: Severity) -> bool {
        if threshold == Severity::Ignore {
            return false;
        }
        self.max_severity().is_some_and(|max| max >= threshold)
    }

    fn merge(&mut self, other: AnalysisReport) {
        self.issues.extend(other.issues);
        self.parse_errors.extend(other.parse_errors);
        self.evaluation_errors.extend(other.evaluation_errors);
        self.faults.extend(other.faults);
        self.files_analyzed += other.files_analyzed;
        self.files_skipped += other.files_skipped;
        self.charts += other.charts;
    }
}

/// Engine selected by the configuration: the external executable when one
/// is configured, otherwise an engine that only accepts plain text.
pub fn build_engine(config: &AnalyzerConfig) -> Arc<dyn TemplateEngine> {
    match ProcessTemplateEngine::from_config(&config.engine) {
        Some(engine) => {
            info!("Using template engine at {}", engine.program().display());
            Arc::new(engine)
        }
        None => {
            debug!("No template engine configured, templates fall back to plain YAML");
            Arc::new(PassthroughEngine::new())
        }
    }
}

/// Analyze every supported file under `base_dir`.
pub fn analyze_project(base_dir: &Path, config: &AnalyzerConfig) -> Result<AnalysisReport> {
    config.validate()?;
    let engine = build_engine(config);
    analyze_project_with_engine(base_dir, config, engine)
}

/// Analyze every supported file under `base_dir` with the given engine.
pub fn analyze_project_with_engine(
    base_dir: &Path,
    config: &AnalyzerConfig,
    engine: Arc<dyn TemplateEngine>,
) -> Result<AnalysisReport> {
    if !base_dir.is_dir() {
        return Err(AnalysisError::InvalidBaseDir(base_dir.to_path_buf()));
    }
    let base_dir = base_dir.canonicalize()?;

    let groups = group_by_chart(&base_dir, discover_files(&base_dir, config));
    info!("Analyzing {} file group(s) under {}", groups.len(), base_dir.display());

    let checks = all_checks();
    let run = GroupRun {
        base_dir: &base_dir,
        processor: HelmProcessor::new(engine, config.engine.timeout),
        visitor: ChecksVisitor::with_config(&checks, config),
        parallel: config.parallel,
    };

    let reports: Vec<AnalysisReport> = if config.parallel {
        groups
            .into_par_iter()
            .map(|(root, files)| run.analyze_group(root, files))
            .collect()
    } else {
        groups
            .into_iter()
            .map(|(root, files)| run.analyze_group(root, files))
            .collect()
    };

    let mut report = AnalysisReport {
        base_dir: base_dir.clone(),
        ..AnalysisReport::default()
    };
    for group in reports {
        report.merge(group);
    }
    report.finish();
    Ok(report)
}

/// YAML files and Dockerfiles under `base_dir`, minus excluded paths and
/// hidden directories.
pub fn discover_files(base_dir: &Path, config: &AnalyzerConfig) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(base_dir)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_supported(path))
        .filter(|path| {
            let relative = path.strip_prefix(base_dir).unwrap_or(path);
            let excluded = config.is_excluded(relative);
            if excluded {
                debug!("Excluded {}", relative.display());
            }
            !excluded
        })
        .collect();
    files.sort();
    files
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

fn is_supported(path: &Path) -> bool {
    is_yaml(path) || is_dockerfile(path)
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| YAML_EXTENSIONS.contains(&e))
}

/// Files keyed by chart root; `None` holds the files outside any chart.
fn group_by_chart(base_dir: &Path, files: Vec<PathBuf>) -> BTreeMap<Option<PathBuf>, Vec<PathBuf>> {
    let mut groups: BTreeMap<Option<PathBuf>, Vec<PathBuf>> = BTreeMap::new();
    for file in files {
        let root = if is_yaml(&file) {
            find_chart_root(&file, base_dir)
        } else {
            None
        };
        groups.entry(root).or_default().push(file);
    }
    groups
}

struct GroupRun<'a> {
    base_dir: &'a Path,
    processor: HelmProcessor,
    visitor: ChecksVisitor,
    parallel: bool,
}

impl GroupRun<'_> {
    fn analyze_group(&self, root: Option<PathBuf>, files: Vec<PathBuf>) -> AnalysisReport {
        let mut report = AnalysisReport::default();
        let chart = match &root {
            Some(root) => {
                report.charts = 1;
                Chart::load(root).unwrap_or_else(|e| {
                    debug!("Cannot read chart {}: {}", root.display(), e);
                    Chart::standalone(root)
                })
            }
            None => Chart::standalone(self.base_dir),
        };

        let analyzed: Vec<PathBuf> = files
            .into_iter()
            .filter(|file| match skip_reason(file, root.as_deref()) {
                Some(reason) => {
                    debug!("Skipping {} ({})", file.display(), reason);
                    report.files_skipped += 1;
                    false
                }
                None => true,
            })
            .collect();
        report.files_analyzed = analyzed.len();

        let metadata = root.as_ref().map(|_| chart.metadata().clone());
        let accumulator = ChartAccumulator::new(root.clone(), metadata);
        let collect = |file: &PathBuf| self.collect(file, &chart, &accumulator);
        let collected: Vec<ProcessedFile> = if self.parallel {
            analyzed.par_iter().map(collect).collect()
        } else {
            analyzed.iter().map(collect).collect()
        };

        // every file is collected before any check runs
        let context = accumulator.freeze();

        let check = |processed: &ProcessedFile| self.check(processed, &context);
        let outcomes: Vec<AnalysisReport> = if self.parallel {
            collected.par_iter().map(check).collect()
        } else {
            collected.iter().map(check).collect()
        };
        for outcome in outcomes {
            report.merge(outcome);
        }
        for processed in collected {
            if let Some(error) = processed.evaluation_error {
                report.evaluation_errors.push(error);
            }
            if let Err(error) = processed.tree {
                report.parse_errors.push(error);
            }
        }
        report
    }

    fn collect(&self, file: &PathBuf, chart: &Chart, accumulator: &ChartAccumulator) -> ProcessedFile {
        let source = match fs::read_to_string(file) {
            Ok(source) => source,
            Err(e) => {
                return ProcessedFile {
                    file: file.clone(),
                    tree: Err(FileParseError {
                        file: file.clone(),
                        message: format!("Cannot read file: {e}"),
                        position: TextPointer::new(1, 0),
                    }),
                    correlation: Correlation::Identity,
                    evaluation_error: None,
                };
            }
        };

        if is_dockerfile(file) {
            return ProcessedFile {
                file: file.clone(),
                tree: Ok(parse_dockerfile(&source)),
                correlation: Correlation::Identity,
                evaluation_error: None,
            };
        }

        let processed = self.processor.process(file, &source, chart);
        if let Ok(tree) = &processed.tree {
            let mut resources = collect_resources(tree, file);
            for resource in &mut resources {
                resource.map_ranges(|range| processed.original_range(range));
            }
            accumulator.extend(resources);
        }
        processed
    }

    fn check(&self, processed: &ProcessedFile, context: &ChartContext) -> AnalysisReport {
        let Ok(tree) = &processed.tree else {
            return AnalysisReport::default();
        };
        let result = self.visitor.scan(tree, &processed.file, Some(context));

        let issues = result
            .issues
            .into_iter()
            .map(|mut issue| {
                issue.range = processed.original_range(&issue.range);
                for secondary in &mut issue.secondary {
                    // ranges in other files are already in their own coordinates
                    if secondary.file.is_none() {
                        secondary.range = processed.original_range(&secondary.range);
                    }
                }
                issue
            })
            .collect();
        let faults = result
            .faults
            .into_iter()
            .map(|mut fault| {
                fault.range = processed.original_range(&fault.range);
                fault
            })
            .collect();

        AnalysisReport {
            issues,
            faults,
            ..AnalysisReport::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::location::TextRange;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn codes(report: &AnalysisReport) -> Vec<&str> {
        report.issues.iter().map(|i| i.code.as_str()).collect()
    }

    #[test]
    fn test_plain_manifests() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "k8s/pod.yaml",
            "kind: Pod\nspec:\n  containers:\n    - image: nginx\n      env:\n        - value: http://api.example.com\n",
        );
        let report = analyze_project(dir.path(), &AnalyzerConfig::default()).unwrap();
        assert_eq!(report.files_analyzed, 1);
        assert_eq!(report.charts, 0);
        assert_eq!(codes(&report), vec!["K8S001", "K8S002"]);
        assert_eq!(report.warning_count, 2);
        assert!(report.should_fail(Severity::Warning));
        assert!(!report.should_fail(Severity::Error));
    }

    #[test]
    fn test_resources_are_shared_across_standalone_files() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "pod.yaml",
            "kind: Pod\nspec:\n  serviceAccountName: app\n  containers: []\n",
        );
        write(
            dir.path(),
            "sa.yaml",
            "kind: ServiceAccount\nmetadata:\n  name: app\nautomountServiceAccountToken: false\n",
        );
        let report = analyze_project(dir.path(), &AnalyzerConfig::default()).unwrap();
        assert!(report.issues.is_empty(), "{:?}", report.issues);
    }

    #[test]
    fn test_standalone_resources_do_not_cross_sibling_directories() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "team-a/pod.yaml",
            "kind: Pod\nspec:\n  serviceAccountName: app\n  containers: []\n",
        );
        write(
            dir.path(),
            "team-b/sa.yaml",
            "kind: ServiceAccount\nmetadata:\n  name: app\nautomountServiceAccountToken: false\n",
        );
        let report = analyze_project(dir.path(), &AnalyzerConfig::default()).unwrap();
        assert_eq!(codes(&report), vec!["K8S001"]);
        assert!(report.issues[0].file.ends_with("team-a/pod.yaml"));
    }

    #[test]
    fn test_standalone_file_does_not_see_parent_directory() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "sub/pod.yaml",
            "kind: Pod\nspec:\n  serviceAccountName: app\n  containers: []\n",
        );
        write(
            dir.path(),
            "sa.yaml",
            "kind: ServiceAccount\nmetadata:\n  name: app\nautomountServiceAccountToken: false\n",
        );
        let report = analyze_project(dir.path(), &AnalyzerConfig::default()).unwrap();
        assert_eq!(codes(&report), vec!["K8S001"]);
    }

    #[test]
    fn test_standalone_file_sees_subdirectories() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "pod.yaml",
            "kind: Pod\nspec:\n  serviceAccountName: app\n  containers: []\n",
        );
        write(
            dir.path(),
            "rbac/binding.yaml",
            "kind: ClusterRoleBinding\nsubjects:\n  - kind: ServiceAccount\n    name: app\n    namespace: ''\n",
        );
        let report = analyze_project(dir.path(), &AnalyzerConfig::default()).unwrap();
        assert!(report.issues.is_empty(), "{:?}", report.issues);
    }

    #[test]
    fn test_resources_do_not_cross_charts() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a/Chart.yaml", "name: a\n");
        write(
            dir.path(),
            "a/templates/pod.yaml",
            "kind: Pod\nspec:\n  serviceAccountName: app\n  containers: []\n",
        );
        write(dir.path(), "b/Chart.yaml", "name: b\n");
        write(
            dir.path(),
            "b/templates/sa.yaml",
            "kind: ServiceAccount\nmetadata:\n  name: app\nautomountServiceAccountToken: false\n",
        );
        let report = analyze_project(dir.path(), &AnalyzerConfig::default()).unwrap();
        assert_eq!(report.charts, 2);
        assert_eq!(codes(&report), vec!["K8S001"]);
        assert_eq!(report.issues[0].range, TextRange::of(3, 22, 3, 25));
    }

    #[test]
    fn test_chart_inputs_are_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "chart/Chart.yaml", "name: demo\nhome: http://example.com\n");
        write(dir.path(), "chart/values.yaml", "url: http://example.com\n");
        write(dir.path(), "chart/templates/cm.yaml", "kind: ConfigMap\n");
        let report = analyze_project(dir.path(), &AnalyzerConfig::default()).unwrap();
        assert_eq!(report.files_analyzed, 1);
        assert_eq!(report.files_skipped, 2);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_templates_without_engine_fall_back() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "chart/Chart.yaml", "name: demo\n");
        write(
            dir.path(),
            "chart/templates/cm.yaml",
            "kind: ConfigMap\ndata:\n  url: http://{{ .Values.host }}\n",
        );
        let report = analyze_project(dir.path(), &AnalyzerConfig::default()).unwrap();
        assert_eq!(report.evaluation_errors.len(), 1);
        assert!(!report.evaluation_errors[0].timed_out);
        assert!(report.parse_errors.is_empty());
        assert_eq!(codes(&report), vec!["K8S002"]);
    }

    #[test]
    fn test_parse_errors_are_collected() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "bad.yaml", "a: [1, 2\n");
        write(dir.path(), "good.yaml", "a: 1\n");
        let report = analyze_project(dir.path(), &AnalyzerConfig::default()).unwrap();
        assert_eq!(report.files_analyzed, 2);
        assert_eq!(report.parse_errors.len(), 1);
        assert!(report.parse_errors[0].file.ends_with("bad.yaml"));
    }

    #[test]
    fn test_exclude_and_hidden_directories() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "vendor/x.yaml", "url: http://example.com\n");
        write(dir.path(), ".git/config.yaml", "url: http://example.com\n");
        write(dir.path(), "app.yaml", "url: https://example.com\n");
        let config = AnalyzerConfig::default().exclude("vendor/**");
        let files = discover_files(&dir.path().canonicalize().unwrap(), &config);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("app.yaml"));
    }

    #[test]
    fn test_dockerfiles_are_analyzed() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Dockerfile", "FROM httpd\nRUN htpasswd -cb /etc/pw admin s3cret\n");
        let report = analyze_project(dir.path(), &AnalyzerConfig::default()).unwrap();
        assert_eq!(codes(&report), vec!["DKR001"]);
    }

    #[test]
    fn test_sequential_matches_parallel() {
        let dir = TempDir::new().unwrap();
        for i in 0..5 {
            write(
                dir.path(),
                &format!("m{i}.yaml"),
                "kind: Pod\nspec:\n  containers:\n    - env:\n        - value: http://a.example\n",
            );
        }
        let parallel = analyze_project(dir.path(), &AnalyzerConfig::default()).unwrap();
        let sequential =
            analyze_project(dir.path(), &AnalyzerConfig::default().with_parallel(false)).unwrap();
        assert_eq!(parallel.issues, sequential.issues);
        assert_eq!(parallel.issues.len(), 10);
    }

    #[test]
    fn test_missing_base_dir() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            analyze_project(&missing, &AnalyzerConfig::default()),
            Err(AnalysisError::InvalidBaseDir(_))
        ));
    }
}
