//! Template engines.
//!
//! An engine evaluates one Go template at a time behind an opaque handle:
//! load the template, attach the chart's companion files, render it with a
//! values document, fetch its syntax tree, dispose it. Handles own whatever
//! scratch state the engine needs and release it on `dispose` (or when the
//! engine is dropped).
//!
//! Two engines are provided:
//! - [`ProcessTemplateEngine`] runs an external renderer per evaluation
//! - [`PassthroughEngine`] accepts templates without actions and renders
//!   them unchanged

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{debug, warn};
use tempfile::TempDir;

use crate::analyzer::helm::ast::{AstWriter, GoNodeKind};
use crate::config::{DEFAULT_EVALUATION_TIMEOUT, EngineConfig};

const TEMPLATE_FILE: &str = "template";
const VALUES_FILE: &str = "values.yaml";
const FILES_DIR: &str = "files";
const RENDERED_FILE: &str = "rendered";
const AST_FILE: &str = "ast";
const STDERR_FILE: &str = "stderr.log";
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Opaque reference to a template loaded into an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateHandle(u64);

impl TemplateHandle {
    /// Handle with an engine-chosen identifier.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TemplateHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Unknown template handle {0}")]
    UnknownHandle(TemplateHandle),
    #[error("Template engine I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Template evaluation failed: {0}")]
    Failed(String),
    #[error("Template engine did not finish within {0:?}")]
    Timeout(Duration),
    #[error("No syntax tree available: {0}")]
    NoSyntaxTree(String),
    #[error("Template is not supported by this engine: {0}")]
    Unsupported(String),
    #[error("Invalid companion file path: {0}")]
    InvalidPath(String),
}

/// A Go template evaluator.
pub trait TemplateEngine: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Load a template; `name` is its chart-relative path.
    fn new_handle(&self, name: &str, template: &str) -> Result<TemplateHandle, EngineError>;

    /// Make a chart file readable by the template (`.Files.Get`, `include`).
    fn attach_file(&self, handle: TemplateHandle, path: &str, content: &str) -> Result<(), EngineError> {
        let _ = (handle, path, content);
        Ok(())
    }

    /// Evaluate the template against a YAML values document.
    fn render(&self, handle: TemplateHandle, values: &str) -> Result<String, EngineError>;

    /// Serialized syntax tree of the template, see [`crate::analyzer::helm::ast`].
    fn get_ast(&self, handle: TemplateHandle) -> Result<Vec<u8>, EngineError>;

    /// Release everything held for the handle. Unknown handles are ignored.
    fn dispose(&self, handle: TemplateHandle);
}

#[derive(Debug, Default)]
struct HandleCounter(AtomicU64);

impl HandleCounter {
    fn next(&self) -> TemplateHandle {
        TemplateHandle::new(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[derive(Debug)]
struct Workspace {
    name: String,
    dir: TempDir,
}

/// Engine backed by an external renderer executable.
///
/// Every loaded template gets a private work directory. The renderer is
/// invoked as `<program> <workdir> <template-name>` and finds there:
///
/// - `template`: the template text
/// - `values.yaml`: the values document
/// - `files/`: companion chart files, by chart-relative path
///
/// It must write the output to `rendered` and may write the serialized
/// syntax tree to `ast`. A non-zero exit status is an evaluation failure
/// whose message is the renderer's stderr. A renderer still running after
/// the timeout is killed.
#[derive(Debug)]
pub struct ProcessTemplateEngine {
    program: PathBuf,
    scratch_dir: Option<PathBuf>,
    timeout: Duration,
    counter: HandleCounter,
    workspaces: DashMap<TemplateHandle, Workspace>,
}

impl ProcessTemplateEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            scratch_dir: None,
            timeout: DEFAULT_EVALUATION_TIMEOUT,
            counter: HandleCounter::default(),
            workspaces: DashMap::new(),
        }
    }

    /// Engine for the configured renderer, if there is one.
    pub fn from_config(config: &EngineConfig) -> Option<Self> {
        let program = config.path.as_ref()?;
        let mut engine = Self::new(program).with_timeout(config.timeout);
        if let Some(dir) = &config.scratch_dir {
            engine = engine.with_scratch_dir(dir);
        }
        Some(engine)
    }

    /// Create work directories below `dir` instead of the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Number of templates currently loaded.
    pub fn loaded(&self) -> usize {
        self.workspaces.len()
    }

    fn workdir(&self, handle: TemplateHandle) -> Result<(PathBuf, String), EngineError> {
        self.workspaces
            .get(&handle)
            .map(|ws| (ws.dir.path().to_path_buf(), ws.name.clone()))
            .ok_or(EngineError::UnknownHandle(handle))
    }

    fn run(&self, workdir: &Path, name: &str) -> Result<(), EngineError> {
        let stderr = fs::File::create(workdir.join(STDERR_FILE))?;
        let mut child = Command::new(&self.program)
            .arg(workdir)
            .arg(name)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| EngineError::Failed(format!("cannot start {}: {}", self.program.display(), e)))?;

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                warn!("Template engine exceeded {:?} on {}, killing it", self.timeout, name);
                let _ = child.kill();
                let _ = child.wait();
                return Err(EngineError::Timeout(self.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            let message = fs::read_to_string(workdir.join(STDERR_FILE)).unwrap_or_default();
            let message = message.trim();
            return Err(EngineError::Failed(if message.is_empty() {
                format!("renderer exited with {status}")
            } else {
                message.to_string()
            }));
        }
        Ok(())
    }
}

impl TemplateEngine for ProcessTemplateEngine {
    fn name(&self) -> &str {
        "process"
    }

    fn new_handle(&self, name: &str, template: &str) -> Result<TemplateHandle, EngineError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("iac-template-");
        let dir = match &self.scratch_dir {
            Some(scratch) => {
                fs::create_dir_all(scratch)?;
                builder.tempdir_in(scratch)?
            }
            None => builder.tempdir()?,
        };
        fs::write(dir.path().join(TEMPLATE_FILE), template)?;
        fs::create_dir(dir.path().join(FILES_DIR))?;

        let handle = self.counter.next();
        debug!("Loaded template {} as {} in {}", name, handle, dir.path().display());
        self.workspaces.insert(
            handle,
            Workspace {
                name: name.to_string(),
                dir,
            },
        );
        Ok(handle)
    }

    fn attach_file(&self, handle: TemplateHandle, path: &str, content: &str) -> Result<(), EngineError> {
        let (workdir, _) = self.workdir(handle)?;
        let relative = Path::new(path);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(EngineError::InvalidPath(path.to_string()));
        }
        let target = workdir.join(FILES_DIR).join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, content)?;
        Ok(())
    }

    fn render(&self, handle: TemplateHandle, values: &str) -> Result<String, EngineError> {
        let (workdir, name) = self.workdir(handle)?;
        fs::write(workdir.join(VALUES_FILE), values)?;
        for stale in [RENDERED_FILE, AST_FILE] {
            match fs::remove_file(workdir.join(stale)) {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }

        self.run(&workdir, &name)?;

        fs::read_to_string(workdir.join(RENDERED_FILE)).map_err(|e| match e.kind() {
            ErrorKind::NotFound => EngineError::Failed("renderer produced no output".to_string()),
            _ => e.into(),
        })
    }

    fn get_ast(&self, handle: TemplateHandle) -> Result<Vec<u8>, EngineError> {
        let (workdir, name) = self.workdir(handle)?;
        fs::read(workdir.join(AST_FILE)).map_err(|e| match e.kind() {
            ErrorKind::NotFound => EngineError::NoSyntaxTree(format!("renderer wrote no tree for {name}")),
            _ => e.into(),
        })
    }

    fn dispose(&self, handle: TemplateHandle) {
        if let Some((_, workspace)) = self.workspaces.remove(&handle) {
            let path = workspace.dir.path().to_path_buf();
            if let Err(e) = workspace.dir.close() {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Engine for templates without actions.
///
/// Renders the text unchanged and describes it as a single text node.
/// Templates containing `{{` are rejected as unsupported.
#[derive(Debug, Default)]
pub struct PassthroughEngine {
    counter: HandleCounter,
    templates: DashMap<TemplateHandle, String>,
}

impl PassthroughEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn template(&self, handle: TemplateHandle) -> Result<String, EngineError> {
        self.templates
            .get(&handle)
            .map(|t| t.clone())
            .ok_or(EngineError::UnknownHandle(handle))
    }
}

impl TemplateEngine for PassthroughEngine {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn new_handle(&self, _name: &str, template: &str) -> Result<TemplateHandle, EngineError> {
        let handle = self.counter.next();
        self.templates.insert(handle, template.to_string());
        Ok(handle)
    }

    fn render(&self, handle: TemplateHandle, _values: &str) -> Result<String, EngineError> {
        let template = self.template(handle)?;
        if template.contains("{{") {
            return Err(EngineError::Unsupported(
                "template actions need an external engine".to_string(),
            ));
        }
        Ok(template)
    }

    fn get_ast(&self, handle: TemplateHandle) -> Result<Vec<u8>, EngineError> {
        let template = self.template(handle)?;
        let mut writer = AstWriter::new();
        let root = writer.push(GoNodeKind::List, 0, template.len(), "");
        if !template.is_empty() {
            writer.push_child(root, GoNodeKind::Text, 0, template.len(), &template);
        }
        Ok(writer.finish())
    }

    fn dispose(&self, handle: TemplateHandle) {
        self.templates.remove(&handle);
    }
}
