// src/main.rs - gcode-governor command line
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;

use clap::Parser;
use krusty_governor::config::{self, Config};
use krusty_governor::{DiagnosticsEmitter, PolicyKind, pipeline};

/// Slow down G-code moves that are too short for the printer controller to keep up with.
#[derive(Debug, Parser)]
#[command(name = "gcode-governor", version, about)]
struct Cli {
    /// Input G-code file; stdin when omitted.
    input: Option<PathBuf>,
    /// Output file; stdout when omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<String>,
    /// Instructions the controller can take in per second.
    #[arg(long = "max-per-sec")]
    max_per_sec: Option<f64>,
    /// Minimum print speed in mm/s.
    #[arg(long = "min-speed")]
    min_speed: Option<f64>,
    #[arg(long, value_enum)]
    policy: Option<PolicyKind>,
    /// Keep each modified line as a comment after its replacement.
    #[arg(long)]
    verbose: bool,
    /// Report every modification in the first N layers. Lines before the first
    /// layer marker count as layer 0.
    #[arg(long = "debug-layers")]
    debug_layers: Option<usize>,
    /// Write diagnostic records as JSON lines to this file.
    #[arg(long)]
    diagnostics: Option<PathBuf>,
    #[arg(long = "log-level", default_value = "info")]
    log_level: tracing::Level,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(r) = self.max_per_sec {
            config.governor.max_instructions_per_second = r;
        }
        if let Some(v) = self.min_speed {
            config.governor.min_print_speed = v;
        }
        if let Some(policy) = self.policy {
            config.governor.policy = policy;
        }
        if self.verbose {
            config.output.verbose = true;
        }
        if let Some(layers) = self.debug_layers {
            config.output.debug_layers = layers;
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout may carry G-code.
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_writer(io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            config::load_config(path).map_err(|e| {
                tracing::error!("Failed to load config from '{}': {}", path, e);
                Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
            })?
        }
        None => Config::default(),
    };
    cli.apply(&mut config);

    let profile = config.to_profile().map_err(|e| {
        tracing::error!("{}", e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;
    let options = config.output.pipeline_options();
    let policy = config.governor.policy.build();

    let mut diagnostics = DiagnosticsEmitter::new(profile.debug_layers());
    if let Some(path) = &cli.diagnostics {
        tracing::info!("Writing diagnostics to: {}", path.display());
        diagnostics = diagnostics.with_sink(Box::new(BufWriter::new(File::create(path)?)));
    }

    let reader: Box<dyn io::BufRead> = match &cli.input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(io::stdin().lock()),
    };
    let writer: Box<dyn io::Write> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let summary = pipeline::run(reader, writer, profile, policy, options, Some(diagnostics))?;
    if summary.sub_budget > 0 {
        tracing::warn!(
            "{} moves still finish faster than the controller budget (floor speed reached)",
            summary.sub_budget
        );
    }
    Ok(())
}
