//! Callback Bridge demo CLI
//!
//! Plays the foreign side of the boundary: builds descriptors from three entry
//! points and a context handle, drives them through a lifecycle scenario, and
//! reports what each entry point saw.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

mod config;
mod handlers;
mod report;
mod scenario;

use config::{AppConfig, Scenario};
use handlers::HandlerSet;

/// Callback Bridge - exercise type-erased callbacks across the C ABI
#[derive(Parser, Debug)]
#[command(name = "callback-bridge-cli")]
#[command(about = "Drive callback descriptors through success, error and teardown", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Lifecycle scenario to run (overrides config)
    #[arg(short, long, value_enum)]
    scenario: Option<Scenario>,

    /// Number of descriptors to create (overrides config)
    #[arg(short = 'n', long, value_name = "COUNT")]
    iterations: Option<usize>,

    /// Worker threads for the stress scenario (overrides config)
    #[arg(short, long, value_name = "COUNT")]
    threads: Option<usize>,

    /// Shared library exporting the entry points (overrides config)
    #[arg(short, long, value_name = "FILE")]
    library: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("Callback Bridge CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using bridge library v{}", callback_bridge::VERSION);

    let config = resolve_config(&args)?;

    handlers::install_registry(&config.bridge)?;
    let handlers = HandlerSet::from_config(&config.handlers, &config.demo.label)?;

    let report = scenario::run(&config, &handlers)?;

    if args.json {
        println!("{}", report.to_json()?);
    } else if !args.quiet {
        print!("{}", report.render_text());
    }

    if !report.is_clean() {
        anyhow::bail!(
            "{} scenario finished with {} violation(s)",
            report.scenario,
            report.violations.len()
        );
    }

    Ok(())
}

/// Load the config file (if any) and apply command line overrides
fn resolve_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            let config = config::load_config(path)?;
            log::debug!("Configuration loaded successfully");
            config
        }
        None => AppConfig::default(),
    };

    if let Some(scenario) = args.scenario {
        config.demo.scenario = scenario;
    }
    if let Some(iterations) = args.iterations {
        anyhow::ensure!(iterations > 0, "--iterations must be at least 1");
        config.demo.iterations = iterations;
    }
    if let Some(threads) = args.threads {
        anyhow::ensure!(threads > 0, "--threads must be at least 1");
        config.demo.threads = threads;
    }
    if let Some(library) = &args.library {
        config.handlers.library = Some(library.clone());
    }

    Ok(config)
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
