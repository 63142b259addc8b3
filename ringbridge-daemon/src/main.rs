//! ringbridge: bridges a SEEDLink feed into DataLink ring servers.
//!
//! ```bash
//! ringbridge --ini=ringbridge.ini
//! ```
//!
//! Exit code 0 on a clean (signal-initiated) stop; non-zero on any
//! initialization failure or fatal pipeline error.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use ringbridge_pipeline::Pipeline;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Bridges a SEEDLink feed into DataLink ring servers.
#[derive(Parser, Debug)]
#[command(name = "ringbridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// The initialization file for this executable
    #[arg(long, value_name = "PATH")]
    ini: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // The subscriber may not be installed yet when config parsing
            // fails, so report on stderr as well.
            eprintln!("ringbridge: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let options = config::parse_ini_file(&cli.ini)
        .with_context(|| format!("loading {}", cli.ini.display()))?;
    init_logging(options.verbosity)?;

    info!(
        application = %options.application_name,
        sinks = options.datalinks.len(),
        "starting ringbridge"
    );
    if let Some(endpoint) = &options.metrics_endpoint {
        info!(url = %endpoint.url, suffix = %endpoint.suffix, "metrics export configured");
    }
    if let Some(endpoint) = &options.log_endpoint {
        info!(url = %endpoint.url, suffix = %endpoint.suffix, "log export configured");
    }

    let mut pipeline = Pipeline::new(options.pipeline, options.seedlink, options.datalinks)
        .context("building pipeline")?;
    install_signal_bridge(pipeline.cancellation_token())?;

    match pipeline.run().await {
        Ok(()) => {
            info!("clean shutdown");
            Ok(())
        }
        Err(err) => {
            error!(%err, "pipeline terminated");
            Err(err.into())
        }
    }
}

/// SIGINT and SIGTERM request a cooperative stop through the pipeline's
/// cancellation token.
fn install_signal_bridge(stop: CancellationToken) -> anyhow::Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("installing SIGTERM handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        info!("SIGINT/SIGTERM signal received");
        stop.cancel();
    });
    Ok(())
}

fn init_logging(verbosity: u8) -> anyhow::Result<()> {
    let level = match verbosity {
        0 | 1 => "error",
        2 => "warn",
        3 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing tracing subscriber: {e}"))?;
    Ok(())
}
