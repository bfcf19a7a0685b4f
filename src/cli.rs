use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::analyzer::checks::Severity;
use crate::analyzer::formatter::OutputFormat;
use crate::config::AnalyzerConfig;

#[derive(Parser, Debug)]
#[command(name = "iac-scan")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Analyze Helm charts, Kubernetes manifests and Dockerfiles")]
#[command(long_about = "Evaluates Helm templates, analyzes the rendered manifests and reports every finding at its position in the template source. Kubernetes manifests and Dockerfiles outside of charts are analyzed as they are.")]
pub struct Cli {
    /// Directory to analyze
    #[arg(value_name = "PATH", default_value = ".")]
    pub path: PathBuf,

    /// Path to configuration file (defaults to .iac-analyzer.yaml in PATH)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Template engine executable
    #[arg(long, value_name = "FILE", env = "IAC_TEMPLATE_ENGINE")]
    pub engine: Option<PathBuf>,

    /// Bound on one template evaluation, in milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "stylish")]
    pub format: FormatArg,

    /// Minimum severity that makes the run fail
    #[arg(long, value_enum)]
    pub threshold: Option<ThresholdArg>,

    /// Glob of files to skip, relative to PATH (repeatable)
    #[arg(long, value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// Rule to ignore, e.g. K8S002 (repeatable)
    #[arg(long, value_name = "CODE")]
    pub ignore: Vec<String>,

    /// Analyze files one at a time
    #[arg(long)]
    pub no_parallel: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Stylish,
    Json,
    Github,
}

impl From<FormatArg> for OutputFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Stylish => OutputFormat::Stylish,
            FormatArg::Json => OutputFormat::Json,
            FormatArg::Github => OutputFormat::GitHub,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ThresholdArg {
    Error,
    Warning,
    Info,
    Style,
    None,
}

impl From<ThresholdArg> for Severity {
    fn from(threshold: ThresholdArg) -> Self {
        match threshold {
            ThresholdArg::Error => Severity::Error,
            ThresholdArg::Warning => Severity::Warning,
            ThresholdArg::Info => Severity::Info,
            ThresholdArg::Style => Severity::Style,
            ThresholdArg::None => Severity::Ignore,
        }
    }
}

impl Cli {
    /// Initialize logging based on verbosity level
    pub fn init_logging(&self) {
        if self.quiet {
            return;
        }

        let level = match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };

        env_logger::Builder::from_default_env()
            .filter_level(level)
            .init();
    }

    /// Command-line settings take precedence over the configuration file.
    pub fn apply_to(&self, mut config: AnalyzerConfig) -> AnalyzerConfig {
        if let Some(engine) = &self.engine {
            config = config.with_engine(engine);
        }
        if let Some(ms) = self.timeout_ms {
            config = config.with_timeout(Duration::from_millis(ms));
        }
        if let Some(threshold) = self.threshold {
            config = config.with_threshold(threshold.into());
        }
        for pattern in &self.exclude {
            config = config.exclude(pattern.clone());
        }
        for rule in &self.ignore {
            config = config.ignore(rule.as_str());
        }
        if self.no_parallel {
            config = config.with_parallel(false);
        }
        config
    }
}
