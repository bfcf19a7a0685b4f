//! # IaC Analyzer
//!
//! Template-aware static analysis of infrastructure-as-code. Helm templates
//! are evaluated through an external engine, the rendered manifests are
//! analyzed, and every finding is mapped back to its position in the
//! template source.
//!
//! ## Features
//!
//! - **Position correlation**: findings point at template text, using the
//!   template syntax tree when the engine provides one and line markers otherwise
//! - **Chart context**: rules see every resource declared anywhere in the chart
//! - **Fallbacks**: templates that fail to evaluate are still analyzed as plain YAML
//! - **Dockerfiles**: shell arguments of `RUN` instructions are resolved and checked
//!
//! ## Example
//!
//! ```rust,no_run
//! use iac_analyzer::{analyze_project, AnalyzerConfig};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AnalyzerConfig::default().with_engine("/opt/engines/go-template-engine");
//! let report = analyze_project(Path::new("./charts"), &config)?;
//! for issue in &report.issues {
//!     println!("{}:{} {} {}", issue.file.display(), issue.range.start, issue.code, issue.message);
//! }
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod cli;
pub mod config;
pub mod error;

// Re-export commonly used types and functions
pub use analyzer::{analyze_project, AnalysisReport, Issue, Severity};
pub use config::AnalyzerConfig;
pub use error::{AnalysisError, Result};

/// The current version of the CLI tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
