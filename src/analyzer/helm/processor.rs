//! Per-file Helm pipeline: evaluate, parse, and keep a way back to the
//! template coordinates.
//!
//! 1. Files without template actions are parsed as plain YAML.
//! 2. Templates are rendered with the chart's values and companion files.
//!    Blank output is an empty tree.
//! 3. The template's syntax tree drives a [`PositionCorrelator`]. When the
//!    engine has no usable syntax tree, the template is rendered again with
//!    line-number comments and ranges are mapped to whole template lines.
//! 4. When evaluation fails or times out, the original text is parsed as
//!    plain YAML and the failure is kept for the report.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde::Serialize;

use crate::analyzer::helm::ast::GoTemplateAst;
use crate::analyzer::helm::bridge::{TemplateEvaluation, TemplateEvaluationError};
use crate::analyzer::helm::chart::{has_template_content, Chart};
use crate::analyzer::helm::correlator::PositionCorrelator;
use crate::analyzer::helm::engine::TemplateEngine;
use crate::analyzer::helm::line_comments::{clean_rendered, insert_line_comments};
use crate::analyzer::helm::shifter::LocationShifter;
use crate::analyzer::location::{TextPointer, TextRange};
use crate::analyzer::tree::yaml::{self, ParseError};
use crate::analyzer::tree::Tree;

/// How ranges of the analyzed tree map back to the file on disk.
#[derive(Debug, Clone, Default)]
pub enum Correlation {
    /// The tree was parsed from the file itself.
    #[default]
    Identity,
    /// The tree was parsed from rendered output with a usable syntax tree.
    Ast(PositionCorrelator),
    /// The tree was parsed from cleaned line-numbered output.
    Lines(LocationShifter),
}

impl Correlation {
    pub fn map(&self, range: &TextRange) -> TextRange {
        match self {
            Self::Identity => *range,
            Self::Ast(correlator) => correlator.original_range(range).unwrap_or(*range),
            Self::Lines(shifter) => shifter.compute_shifted_location(range),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Ast(_) => "ast",
            Self::Lines(_) => "lines",
        }
    }
}

/// A file whose content could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileParseError {
    pub file: PathBuf,
    pub message: String,
    /// Position in the file on disk.
    pub position: TextPointer,
}

/// Template evaluation failure of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEvaluationError {
    pub file: PathBuf,
    pub message: String,
    pub timed_out: bool,
}

impl FileEvaluationError {
    fn new(file: &Path, error: &TemplateEvaluationError) -> Self {
        Self {
            file: file.to_path_buf(),
            message: error.to_string(),
            timed_out: matches!(error, TemplateEvaluationError::Timeout { .. }),
        }
    }
}

/// Result of running one file through the pipeline.
#[derive(Debug)]
pub struct ProcessedFile {
    pub file: PathBuf,
    pub tree: Result<Tree, FileParseError>,
    pub correlation: Correlation,
    pub evaluation_error: Option<FileEvaluationError>,
}

impl ProcessedFile {
    /// Template-coordinate range of a range of the analyzed tree.
    pub fn original_range(&self, range: &TextRange) -> TextRange {
        self.correlation.map(range)
    }
}

/// Runs files through template evaluation with one engine.
#[derive(Clone)]
pub struct HelmProcessor {
    engine: Arc<dyn TemplateEngine>,
    timeout: Duration,
}

impl HelmProcessor {
    pub fn new(engine: Arc<dyn TemplateEngine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Process `source`, the content of `file` inside `chart`.
    pub fn process(&self, file: &Path, source: &str, chart: &Chart) -> ProcessedFile {
        if !has_template_content(source) {
            return plain(file, source, None);
        }

        let name = chart.template_name(file);
        let files = chart.files_for(file);
        let (rendered, evaluation) = match self.evaluate(&name, source, &files, chart.values()) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Falling back to plain YAML for {}: {}", file.display(), e);
                return plain(file, source, Some(FileEvaluationError::new(file, &e)));
            }
        };

        if rendered.trim().is_empty() {
            debug!("Template {} rendered to nothing", name);
            return empty(file);
        }

        match correlate(&evaluation, source, &rendered) {
            Ok(correlator) => {
                drop(evaluation);
                parsed(file, &rendered, Correlation::Ast(correlator))
            }
            Err(reason) => {
                drop(evaluation);
                warn!(
                    "No usable syntax tree for {} ({}), using line-comment correlation",
                    file.display(),
                    reason
                );
                self.process_with_line_comments(file, &name, source, &files, chart.values())
            }
        }
    }

    fn evaluate(
        &self,
        name: &str,
        source: &str,
        files: &[(String, String)],
        values: &str,
    ) -> Result<(String, TemplateEvaluation), TemplateEvaluationError> {
        let mut evaluation = TemplateEvaluation::new(Arc::clone(&self.engine), name, self.timeout);
        evaluation.load(source, files)?;
        let rendered = evaluation.render(values)?.to_string();
        Ok((rendered, evaluation))
    }

    fn process_with_line_comments(
        &self,
        file: &Path,
        name: &str,
        source: &str,
        files: &[(String, String)],
        values: &str,
    ) -> ProcessedFile {
        let annotated = insert_line_comments(source);
        let rendered = match self.evaluate(name, &annotated, files, values) {
            Ok((rendered, _)) => rendered,
            Err(e) => {
                warn!("Falling back to plain YAML for {}: {}", file.display(), e);
                return plain(file, source, Some(FileEvaluationError::new(file, &e)));
            }
        };

        let mut shifter = LocationShifter::for_source(source);
        let cleaned = clean_rendered(&rendered, &mut shifter);
        if cleaned.trim().is_empty() {
            return empty(file);
        }
        parsed(file, &cleaned, Correlation::Lines(shifter))
    }
}

fn correlate(
    evaluation: &TemplateEvaluation,
    source: &str,
    rendered: &str,
) -> Result<PositionCorrelator, String> {
    let bytes = evaluation.syntax_tree().map_err(|e| e.to_string())?;
    let ast = GoTemplateAst::decode(&bytes).map_err(|e| e.to_string())?;
    PositionCorrelator::build(&ast, source, rendered).map_err(|e| e.to_string())
}

fn empty(file: &Path) -> ProcessedFile {
    ProcessedFile {
        file: file.to_path_buf(),
        tree: Ok(Tree::empty()),
        correlation: Correlation::Identity,
        evaluation_error: None,
    }
}

fn plain(file: &Path, source: &str, evaluation_error: Option<FileEvaluationError>) -> ProcessedFile {
    let mut processed = parsed(file, source, Correlation::Identity);
    processed.evaluation_error = evaluation_error;
    processed
}

fn parsed(file: &Path, text: &str, correlation: Correlation) -> ProcessedFile {
    let tree = yaml::parse(text).map_err(|e| parse_error(file, &e, &correlation));
    if let Err(e) = &tree {
        debug!("Cannot parse {}: {}", file.display(), e.message);
    }
    ProcessedFile {
        file: file.to_path_buf(),
        tree,
        correlation,
        evaluation_error: None,
    }
}

fn parse_error(file: &Path, error: &ParseError, correlation: &Correlation) -> FileParseError {
    let position = match error {
        ParseError::Syntax { position, .. } => {
            correlation.map(&TextRange::new(*position, *position)).start
        }
        ParseError::UnexpectedEnd => TextPointer::new(1, 0),
    };
    FileParseError {
        file: file.to_path_buf(),
        message: error.to_string(),
        position,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::helm::engine::{EngineError, PassthroughEngine, TemplateHandle};
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Replaces `{{ x }}` with `1` and `{{ blank }}` with nothing. Never has
    /// a syntax tree.
    #[derive(Default)]
    struct NoAstEngine {
        next: AtomicU64,
        templates: DashMap<TemplateHandle, String>,
    }

    impl TemplateEngine for NoAstEngine {
        fn name(&self) -> &str {
            "no-ast"
        }

        fn new_handle(&self, _name: &str, template: &str) -> Result<TemplateHandle, EngineError> {
            let handle = TemplateHandle::new(self.next.fetch_add(1, Ordering::Relaxed));
            self.templates.insert(handle, template.to_string());
            Ok(handle)
        }

        fn render(&self, handle: TemplateHandle, _values: &str) -> Result<String, EngineError> {
            let template = self.templates.get(&handle).ok_or(EngineError::UnknownHandle(handle))?;
            Ok(template.replace("{{ x }}", "1").replace("{{ blank }}", ""))
        }

        fn get_ast(&self, handle: TemplateHandle) -> Result<Vec<u8>, EngineError> {
            Err(EngineError::NoSyntaxTree(handle.to_string()))
        }

        fn dispose(&self, handle: TemplateHandle) {
            self.templates.remove(&handle);
        }
    }

    fn chart() -> Chart {
        Chart::standalone(Path::new("/chart"))
    }

    #[test]
    fn test_plain_file_is_not_evaluated() {
        let processor = HelmProcessor::new(Arc::new(PassthroughEngine::new()), TIMEOUT);
        let processed = processor.process(Path::new("/chart/pod.yaml"), "kind: Pod\n", &chart());
        assert!(processed.tree.is_ok());
        assert!(processed.evaluation_error.is_none());
        assert!(matches!(processed.correlation, Correlation::Identity));
    }

    #[test]
    fn test_engine_failure_falls_back_to_plain_yaml() {
        let processor = HelmProcessor::new(Arc::new(PassthroughEngine::new()), TIMEOUT);
        let processed = processor.process(
            Path::new("/chart/pod.yaml"),
            "kind: Pod\nname: \"{{ .Values.name }}\"\nimage: {{ .Values.image }}\n",
            &chart(),
        );
        let error = processed.evaluation_error.as_ref().unwrap();
        assert!(!error.timed_out);
        assert!(error.message.contains("external engine"));
        assert!(matches!(processed.correlation, Correlation::Identity));
    }

    #[test]
    fn test_line_comment_fallback_maps_to_template_lines() {
        let processor = HelmProcessor::new(Arc::new(NoAstEngine::default()), TIMEOUT);
        let source = "kind: Pod\nreplicas: {{ x }}\n";
        let processed = processor.process(Path::new("/chart/pod.yaml"), source, &chart());
        assert!(matches!(processed.correlation, Correlation::Lines(_)));

        let tree = processed.tree.as_ref().unwrap();
        let root = tree.document_roots().next().unwrap();
        let value = root.get("replicas").unwrap();
        assert_eq!(value.as_str(), Some("1"));
        assert_eq!(processed.original_range(&value.range()), TextRange::of(2, 0, 2, 17));
    }

    #[test]
    fn test_blank_render_is_empty_tree() {
        let processor = HelmProcessor::new(Arc::new(NoAstEngine::default()), TIMEOUT);
        let processed = processor.process(Path::new("/chart/empty.yaml"), "{{ blank }}\n", &chart());
        assert!(processed.tree.as_ref().unwrap().is_empty());
        assert!(processed.evaluation_error.is_none());
    }

    #[test]
    fn test_parse_error_is_reported() {
        let processor = HelmProcessor::new(Arc::new(PassthroughEngine::new()), TIMEOUT);
        let processed = processor.process(Path::new("/chart/bad.yaml"), "a: [1, 2\n", &chart());
        let error = processed.tree.unwrap_err();
        assert_eq!(error.file, Path::new("/chart/bad.yaml"));
        assert!(error.message.contains("YAML syntax error"));
    }
}
