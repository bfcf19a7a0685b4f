//! Check engine shared by every dialect.
//!
//! Checks never walk trees themselves. During [`Check::initialize`] they
//! register callbacks per [`NodeKind`]; the [`ChecksVisitor`] then walks each
//! tree depth-first and invokes the callbacks:
//! - `register` callbacks fire before the node's children are visited
//! - `register_post` callbacks fire after them
//!
//! A callback that panics is contained: its partial output is dropped, a
//! [`RuleExecutionFault`] is recorded, and the walk continues with the next
//! callback for the same node.

pub mod types;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use log::warn;

use crate::analyzer::docker::secrets::SecretsGenerationCheck;
use crate::analyzer::kubernetes::automount::AutomountServiceAccountTokenCheck;
use crate::analyzer::kubernetes::context::ChartContext;
use crate::analyzer::location::HasTextRange;
use crate::analyzer::security::unencrypted_url::UnencryptedUrlCheck;
use crate::analyzer::tree::{Node, NodeKind, Tree};
use crate::config::AnalyzerConfig;

pub use types::{Issue, RuleCode, RuleExecutionFault, SecondaryLocation, Severity};

/// Callback invoked for every node of the registered kind.
pub type Callback = Box<dyn Fn(&mut CheckContext<'_>, &Node) + Send + Sync>;

/// A check that can be run by the [`ChecksVisitor`].
pub trait Check: Send + Sync {
    /// Get the rule code (e.g., "K8S001").
    fn code(&self) -> &'static str;

    /// Get the rule name.
    fn name(&self) -> &'static str;

    /// Get the default severity.
    fn severity(&self) -> Severity {
        Severity::Warning
    }

    /// Whether the check reads chart-wide facts. Callbacks of other checks
    /// see no chart context.
    fn needs_chart_context(&self) -> bool {
        false
    }

    /// Register callbacks.
    fn initialize(&self, init: &mut InitContext);
}

/// Get all available checks.
pub fn all_checks() -> Vec<Box<dyn Check>> {
    vec![
        Box::new(AutomountServiceAccountTokenCheck),
        Box::new(UnencryptedUrlCheck),
        Box::new(SecretsGenerationCheck),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pre,
    Post,
}

struct Registration {
    code: RuleCode,
    severity: Severity,
    needs_chart: bool,
    phase: Phase,
    callback: Callback,
}

/// Collects the registrations of one check.
pub struct InitContext {
    code: RuleCode,
    severity: Severity,
    needs_chart: bool,
    registrations: Vec<(NodeKind, Registration)>,
}

impl InitContext {
    fn new(code: RuleCode, severity: Severity, needs_chart: bool) -> Self {
        Self {
            code,
            severity,
            needs_chart,
            registrations: Vec::new(),
        }
    }

    /// Call `callback` on every node of `kind`, before its children.
    pub fn register<F>(&mut self, kind: NodeKind, callback: F)
    where
        F: Fn(&mut CheckContext<'_>, &Node) + Send + Sync + 'static,
    {
        self.push(kind, Phase::Pre, Box::new(callback));
    }

    /// Call `callback` on every node of `kind`, after its children.
    pub fn register_post<F>(&mut self, kind: NodeKind, callback: F)
    where
        F: Fn(&mut CheckContext<'_>, &Node) + Send + Sync + 'static,
    {
        self.push(kind, Phase::Post, Box::new(callback));
    }

    fn push(&mut self, kind: NodeKind, phase: Phase, callback: Callback) {
        self.registrations.push((
            kind,
            Registration {
                code: self.code.clone(),
                severity: self.severity,
                needs_chart: self.needs_chart,
                phase,
                callback,
            },
        ));
    }
}

/// What a callback sees while it runs.
pub struct CheckContext<'a> {
    code: &'a RuleCode,
    severity: Severity,
    file: &'a Path,
    chart: Option<&'a ChartContext>,
    issues: Vec<Issue>,
}

impl<'a> CheckContext<'a> {
    /// File being scanned.
    pub fn file(&self) -> &'a Path {
        self.file
    }

    /// Chart-wide facts, when the file belongs to a chart and the aggregate
    /// has been completed.
    pub fn chart(&self) -> Option<&'a ChartContext> {
        self.chart
    }

    pub fn report_issue(&mut self, anchor: &dyn HasTextRange, message: impl Into<String>) {
        self.report_issue_with_secondary(anchor, message, Vec::new());
    }

    pub fn report_issue_with_secondary(
        &mut self,
        anchor: &dyn HasTextRange,
        message: impl Into<String>,
        secondary: Vec<SecondaryLocation>,
    ) {
        let issue = Issue::new(
            self.code.clone(),
            self.severity,
            message,
            self.file,
            anchor.text_range(),
        )
        .with_secondary(secondary);
        self.issues.push(issue);
    }
}

/// Issues and faults of one scan, in traversal order.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub issues: Vec<Issue>,
    pub faults: Vec<RuleExecutionFault>,
}

/// Walks trees and dispatches nodes to registered callbacks.
pub struct ChecksVisitor {
    registrations: Vec<Registration>,
    by_kind: HashMap<NodeKind, Vec<usize>>,
}

impl ChecksVisitor {
    /// Visitor over `checks` with default configuration.
    pub fn new(checks: &[Box<dyn Check>]) -> Self {
        Self::with_config(checks, &AnalyzerConfig::default())
    }

    /// Visitor honoring ignored rules and severity overrides of `config`.
    pub fn with_config(checks: &[Box<dyn Check>], config: &AnalyzerConfig) -> Self {
        let mut registrations = Vec::new();
        let mut by_kind: HashMap<NodeKind, Vec<usize>> = HashMap::new();

        for check in checks {
            let code = RuleCode::new(check.code());
            if config.is_rule_ignored(&code) {
                continue;
            }
            let severity = config.effective_severity(&code, check.severity());
            if severity == Severity::Ignore {
                continue;
            }
            let mut init = InitContext::new(code, severity, check.needs_chart_context());
            check.initialize(&mut init);
            for (kind, registration) in init.registrations {
                by_kind.entry(kind).or_default().push(registrations.len());
                registrations.push(registration);
            }
        }

        Self {
            registrations,
            by_kind,
        }
    }

    /// Whether any callback is registered.
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Scan one tree.
    pub fn scan(&self, tree: &Tree, file: &Path, chart: Option<&ChartContext>) -> ScanResult {
        let mut result = ScanResult::default();
        self.visit(tree.root(), file, chart, &mut result);
        result
    }

    fn visit(&self, node: &Node, file: &Path, chart: Option<&ChartContext>, result: &mut ScanResult) {
        self.dispatch(node, Phase::Pre, file, chart, result);
        for child in node.children() {
            self.visit(child, file, chart, result);
        }
        self.dispatch(node, Phase::Post, file, chart, result);
    }

    fn dispatch(
        &self,
        node: &Node,
        phase: Phase,
        file: &Path,
        chart: Option<&ChartContext>,
        result: &mut ScanResult,
    ) {
        let Some(indices) = self.by_kind.get(&node.kind()) else {
            return;
        };
        for &idx in indices {
            let registration = &self.registrations[idx];
            if registration.phase != phase {
                continue;
            }
            let mut ctx = CheckContext {
                code: &registration.code,
                severity: registration.severity,
                file,
                chart: chart.filter(|_| registration.needs_chart),
                issues: Vec::new(),
            };
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                (registration.callback)(&mut ctx, node)
            }));
            match outcome {
                Ok(()) => result.issues.append(&mut ctx.issues),
                Err(payload) => {
                    let fault = RuleExecutionFault {
                        code: registration.code.clone(),
                        file: file.to_path_buf(),
                        kind: node.kind(),
                        range: node.range(),
                        message: panic_message(payload.as_ref()),
                    };
                    warn!("Rule execution fault: {}", fault);
                    result.faults.push(fault);
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
