//! Helm template support.
//!
//! - `chart` - chart root discovery, skipped files, chart inputs
//! - `engine` - the [`TemplateEngine`] capability and its implementations
//! - `bridge` - one bounded evaluation of one template
//! - `ast` - the serialized template syntax tree
//! - `correlator` - rendered-to-template offset mapping from the syntax tree
//! - `line_comments`, `shifter` - line-level mapping when there is no syntax tree
//! - `processor` - the per-file pipeline tying these together

pub mod ast;
pub mod bridge;
pub mod chart;
pub mod correlator;
pub mod engine;
pub mod line_comments;
pub mod processor;
pub mod shifter;

pub use bridge::{EvaluationState, TemplateEvaluation, TemplateEvaluationError};
pub use chart::{find_chart_root, Chart, ChartMetadata};
pub use engine::{EngineError, PassthroughEngine, ProcessTemplateEngine, TemplateEngine, TemplateHandle};
pub use processor::{Correlation, FileEvaluationError, FileParseError, HelmProcessor, ProcessedFile};
