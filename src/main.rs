use clap::Parser;
use iac_analyzer::{
    analyzer::{analyze_project, format_report, OutputFormat},
    cli::Cli,
    config::AnalyzerConfig,
};
use log::info;
use std::process;

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(2);
        }
    }
}

/// Returns whether the run passed the failure threshold.
fn run() -> iac_analyzer::Result<bool> {
    let cli = Cli::parse();

    // Initialize logging
    cli.init_logging();

    // Load configuration
    let config = match &cli.config {
        Some(path) => AnalyzerConfig::from_yaml_file(path)?,
        None => AnalyzerConfig::find_and_load(&cli.path)?,
    };
    let config = cli.apply_to(config);

    let report = analyze_project(&cli.path, &config)?;
    info!(
        "Analyzed {} file(s) in {} chart(s), {} issue(s)",
        report.files_analyzed,
        report.charts,
        report.issues.len()
    );

    let format = OutputFormat::from(cli.format);
    let output = format_report(&report, format);
    if !cli.quiet || format == OutputFormat::Json {
        print!("{}", output);
        if format == OutputFormat::Json {
            println!();
        }
    }

    Ok(!report.should_fail(config.failure_threshold))
}
