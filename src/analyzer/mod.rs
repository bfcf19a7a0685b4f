//! # Analyzer Module
//!
//! Template-aware static analysis of infrastructure files:
//! - `location`, `tree` - positions and the dialect-neutral syntax tree
//! - `helm` - template evaluation and mapping rendered positions back to templates
//! - `kubernetes` - chart-scoped resource aggregation and manifest checks
//! - `docker` - shell argument resolution and Dockerfile checks
//! - `security` - checks that apply to any YAML file
//! - `checks` - the rule engine dispatching tree nodes to checks
//! - `project` - discovery, grouping and the two-phase run over a directory
//! - `formatter` - report output

pub mod checks;
pub mod docker;
pub mod formatter;
pub mod helm;
pub mod kubernetes;
pub mod location;
pub mod project;
pub mod security;
pub mod tree;

pub use checks::{all_checks, Check, ChecksVisitor, Issue, RuleCode, Severity};
pub use formatter::{format_report, OutputFormat};
pub use location::{Location, TextPointer, TextRange};
pub use project::{analyze_project, analyze_project_with_engine, build_engine, AnalysisReport};
pub use tree::{Node, NodeKind, Tree};
