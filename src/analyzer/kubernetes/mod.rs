//! Kubernetes manifest analysis.
//!
//! - `resources` - objects collected from rendered manifests
//! - `context` - the chart-scoped aggregate of those objects
//! - `automount` - the service account token check

pub mod automount;
pub mod context;
pub mod resources;

pub use context::{ChartAccumulator, ChartContext};
pub use resources::{collect_resources, ProjectResource, Trilean};
