pub mod config;
pub mod dump;
pub mod error;
pub mod server;

use clap::Parser;
use config::{Args, ExporterConfig, Mode};
use error::ExporterError;
use fi_prometheus::build_registry;
use tracing_subscriber::EnvFilter;

/// The main entry point for the `fi-slurm-exporter` service
///
/// By default the exporter serves the registry over HTTP, polling the scheduler on
/// every scrape. The one-shot modes poll a single time and print to stdout.
fn main() -> Result<(), ExporterError> {
    let args = Args::parse();
    init_tracing(args.debug);

    let config = ExporterConfig::from(args);
    tracing::debug!(?config, "starting");

    match config.mode {
        Mode::Once => print!("{}", dump::render_once(&config)?),
        Mode::Json => println!("{}", dump::render_json(&config)?),
        Mode::Serve => {
            let (registry, _) = build_registry(config.collectors())?;

            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(ExporterError::Runtime)?
                .block_on(server::serve(config.listen, registry))?;
        }
    }

    Ok(())
}

/// Logs go to stderr so one-shot output stays clean; RUST_LOG takes precedence
fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}
