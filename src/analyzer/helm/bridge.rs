//! Evaluation of one template through a [`TemplateEngine`].
//!
//! A [`TemplateEvaluation`] owns exactly one engine handle for its whole
//! life and moves through `NotLoaded -> Loaded -> Rendered | Failed`. Every
//! engine call runs on a worker thread and is bounded by the evaluation
//! timeout; a call that does not answer in time fails the evaluation and the
//! handle is released. A handle created by a load that answers after its
//! timeout is disposed by the worker. Dropping the evaluation always disposes
//! the handle.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, SendError};
use log::{debug, warn};

use crate::analyzer::helm::engine::{EngineError, TemplateEngine, TemplateHandle};

/// Failure of the template engine on one file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateEvaluationError {
    #[error("Template evaluation of {name} failed: {message}")]
    Engine { name: String, message: String },
    #[error("Template evaluation of {name} did not finish within {timeout:?}")]
    Timeout { name: String, timeout: Duration },
    #[error("Cannot {operation} template {name} in state {state}")]
    InvalidState {
        name: String,
        operation: &'static str,
        state: &'static str,
    },
}

/// Lifecycle of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationState {
    NotLoaded,
    Loaded(TemplateHandle),
    Rendered { handle: TemplateHandle, text: String },
    Failed(TemplateEvaluationError),
}

impl EvaluationState {
    fn label(&self) -> &'static str {
        match self {
            Self::NotLoaded => "not-loaded",
            Self::Loaded(_) => "loaded",
            Self::Rendered { .. } => "rendered",
            Self::Failed(_) => "failed",
        }
    }

    fn handle(&self) -> Option<TemplateHandle> {
        match self {
            Self::Loaded(handle) | Self::Rendered { handle, .. } => Some(*handle),
            _ => None,
        }
    }
}

impl fmt::Display for EvaluationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One template, one handle, one owner.
pub struct TemplateEvaluation {
    engine: Arc<dyn TemplateEngine>,
    name: String,
    timeout: Duration,
    state: EvaluationState,
}

impl TemplateEvaluation {
    pub fn new(engine: Arc<dyn TemplateEngine>, name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            engine,
            name: name.into(),
            timeout,
            state: EvaluationState::NotLoaded,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &EvaluationState {
        &self.state
    }

    /// Hand the template and the chart files it may read to the engine.
    pub fn load(
        &mut self,
        template: &str,
        files: &[(String, String)],
    ) -> Result<(), TemplateEvaluationError> {
        if self.state != EvaluationState::NotLoaded {
            return Err(self.invalid_state("load"));
        }

        let name = self.name.clone();
        let template = template.to_string();
        let files = files.to_vec();
        let outcome = self.bounded(move |engine| {
            let handle = engine.new_handle(&name, &template)?;
            for (path, content) in &files {
                if let Err(e) = engine.attach_file(handle, path, content) {
                    engine.dispose(handle);
                    return Err(e);
                }
            }
            Ok(handle)
        }, |engine, handle| engine.dispose(handle));

        match outcome {
            Ok(handle) => {
                debug!("Template {} loaded by {} engine", self.name, self.engine.name());
                self.state = EvaluationState::Loaded(handle);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Evaluate the loaded template against a YAML values document.
    pub fn render(&mut self, values: &str) -> Result<&str, TemplateEvaluationError> {
        let EvaluationState::Loaded(handle) = self.state else {
            return Err(self.invalid_state("render"));
        };

        let values = values.to_string();
        match self.bounded(move |engine| engine.render(handle, &values), |_, _| {}) {
            Ok(text) => {
                self.state = EvaluationState::Rendered { handle, text };
                match &self.state {
                    EvaluationState::Rendered { text, .. } => Ok(text),
                    _ => Err(self.invalid_state("render")),
                }
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Serialized syntax tree of the template. Failing to get one does not
    /// fail the evaluation.
    pub fn syntax_tree(&self) -> Result<Vec<u8>, TemplateEvaluationError> {
        let Some(handle) = self.state.handle() else {
            return Err(self.invalid_state("read the syntax tree of"));
        };
        self.bounded(move |engine| engine.get_ast(handle), |_, _| {})
    }

    /// Run `call` on a worker thread and wait at most `timeout` for it.
    /// `abandoned` receives a successful result nobody waits for anymore.
    fn bounded<T, F, A>(&self, call: F, abandoned: A) -> Result<T, TemplateEvaluationError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn TemplateEngine) -> Result<T, EngineError> + Send + 'static,
        A: FnOnce(&dyn TemplateEngine, T) + Send + 'static,
    {
        // zero capacity: a send only succeeds while the caller is still waiting
        let (sender, receiver) = channel::bounded(0);
        let engine = Arc::clone(&self.engine);
        let spawned = thread::Builder::new()
            .name(format!("template-{}", self.name))
            .spawn(move || {
                if let Err(SendError(Ok(value))) = sender.send(call(engine.as_ref())) {
                    debug!("Discarding late answer of {} engine", engine.name());
                    abandoned(engine.as_ref(), value);
                }
            });
        if let Err(e) = spawned {
            return Err(self.engine_error(format!("cannot start engine worker: {e}")));
        }

        match receiver.recv_timeout(self.timeout) {
            Ok(result) => result.map_err(|e| self.engine_error(e.to_string())),
            Err(RecvTimeoutError::Timeout) => Err(TemplateEvaluationError::Timeout {
                name: self.name.clone(),
                timeout: self.timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(self.engine_error("engine worker stopped without answering".to_string()))
            }
        }
    }

    fn engine_error(&self, message: String) -> TemplateEvaluationError {
        TemplateEvaluationError::Engine {
            name: self.name.clone(),
            message,
        }
    }

    fn invalid_state(&self, operation: &'static str) -> TemplateEvaluationError {
        TemplateEvaluationError::InvalidState {
            name: self.name.clone(),
            operation,
            state: self.state.label(),
        }
    }

    fn fail(&mut self, error: TemplateEvaluationError) -> TemplateEvaluationError {
        match &error {
            TemplateEvaluationError::Timeout { .. } => warn!("{}", error),
            _ => debug!("{}", error),
        }
        self.release();
        self.state = EvaluationState::Failed(error.clone());
        error
    }

    fn release(&mut self) {
        if let Some(handle) = self.state.handle() {
            self.engine.dispose(handle);
        }
    }
}

impl Drop for TemplateEvaluation {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for TemplateEvaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateEvaluation")
            .field("engine", &self.engine.name())
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Instant;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Engine that records live handles and can be told to hang or fail.
    #[derive(Default)]
    struct ScriptedEngine {
        next: AtomicU64,
        live: DashMap<TemplateHandle, String>,
        hang: bool,
        slow_load: bool,
        fail_render: bool,
        disposed: AtomicUsize,
    }

    impl TemplateEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        fn new_handle(&self, _name: &str, template: &str) -> Result<TemplateHandle, EngineError> {
            if self.slow_load {
                thread::sleep(Duration::from_millis(300));
            }
            let handle = TemplateHandle::new(self.next.fetch_add(1, Ordering::Relaxed));
            self.live.insert(handle, template.to_string());
            Ok(handle)
        }

        fn render(&self, handle: TemplateHandle, values: &str) -> Result<String, EngineError> {
            if self.hang {
                thread::sleep(Duration::from_secs(2));
            }
            if self.fail_render {
                return Err(EngineError::Failed("function \"nope\" not defined".into()));
            }
            let template = self.live.get(&handle).ok_or(EngineError::UnknownHandle(handle))?;
            Ok(format!("{}{}", template.as_str(), values))
        }

        fn get_ast(&self, handle: TemplateHandle) -> Result<Vec<u8>, EngineError> {
            Err(EngineError::NoSyntaxTree(handle.to_string()))
        }

        fn dispose(&self, handle: TemplateHandle) {
            self.live.remove(&handle);
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_happy_path_state_machine() {
        let engine = Arc::new(ScriptedEngine::default());
        let mut eval = TemplateEvaluation::new(engine.clone(), "templates/a.yaml", TIMEOUT);
        assert_eq!(eval.state(), &EvaluationState::NotLoaded);

        eval.load("a: ", &[]).unwrap();
        assert!(matches!(eval.state(), EvaluationState::Loaded(_)));
        assert_eq!(eval.render("1").unwrap(), "a: 1");
        assert!(matches!(eval.state(), EvaluationState::Rendered { .. }));
        assert!(matches!(
            eval.syntax_tree(),
            Err(TemplateEvaluationError::Engine { .. })
        ));
        assert_eq!(engine.live.len(), 1);

        drop(eval);
        assert!(engine.live.is_empty());
    }

    #[test]
    fn test_invalid_transitions() {
        let engine = Arc::new(ScriptedEngine::default());
        let mut eval = TemplateEvaluation::new(engine, "t.yaml", TIMEOUT);
        assert!(matches!(
            eval.render(""),
            Err(TemplateEvaluationError::InvalidState { state: "not-loaded", .. })
        ));
        eval.load("x", &[]).unwrap();
        assert!(matches!(
            eval.load("x", &[]),
            Err(TemplateEvaluationError::InvalidState { state: "loaded", .. })
        ));
    }

    #[test]
    fn test_engine_failure_releases_handle() {
        let engine = Arc::new(ScriptedEngine {
            fail_render: true,
            ..Default::default()
        });
        let mut eval = TemplateEvaluation::new(engine.clone(), "t.yaml", TIMEOUT);
        eval.load("x", &[]).unwrap();
        let err = eval.render("").unwrap_err();
        assert!(err.to_string().contains("not defined"));
        assert!(matches!(eval.state(), EvaluationState::Failed(_)));
        assert!(engine.live.is_empty());
    }

    #[test]
    fn test_timeout_fails_evaluation() {
        let engine = Arc::new(ScriptedEngine {
            hang: true,
            ..Default::default()
        });
        let mut eval = TemplateEvaluation::new(engine.clone(), "t.yaml", Duration::from_millis(50));
        eval.load("x", &[]).unwrap();
        assert!(matches!(
            eval.render(""),
            Err(TemplateEvaluationError::Timeout { .. })
        ));
        assert!(engine.live.is_empty());
    }

    #[test]
    fn test_handle_created_after_load_timeout_is_disposed() {
        let engine = Arc::new(ScriptedEngine {
            slow_load: true,
            ..Default::default()
        });
        let mut eval = TemplateEvaluation::new(engine.clone(), "t.yaml", Duration::from_millis(50));
        assert!(matches!(
            eval.load("x", &[]),
            Err(TemplateEvaluationError::Timeout { .. })
        ));
        assert!(matches!(eval.state(), EvaluationState::Failed(_)));

        let deadline = Instant::now() + Duration::from_secs(5);
        while engine.disposed.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(engine.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(engine.next.load(Ordering::SeqCst), 1);
        assert!(engine.live.is_empty());
    }
}
