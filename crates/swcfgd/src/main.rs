//! swcfgd daemon entry point.
//!
//! Loads the engine configuration, replays an optional startup file, then
//! serves commands over TCP, or over stdin/stdout when no listen address is
//! given.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use swcfgd::{Engine, EngineConfig, Server, SoftDataplane};

/// Switch configuration datastore daemon
#[derive(Parser, Debug)]
#[command(name = "swcfgd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine configuration file (YAML)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Command file replayed before serving, e.g. one written by `save`
    #[arg(short = 's', long)]
    startup: Option<PathBuf>,

    /// Address to accept clients on; stdin/stdout is used when omitted
    #[arg(short = 'L', long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    info!("engine config: {:?}", config);

    let mut engine = Engine::new(config, Arc::new(SoftDataplane::new()));
    if let Some(path) = &args.startup {
        let failures = engine
            .load_file(path)
            .with_context(|| format!("can't read startup file {}", path.display()))?;
        if failures.is_empty() {
            info!("startup file {} loaded", path.display());
        } else {
            warn!("{} line(s) of {} failed", failures.len(), path.display());
        }
    }

    let server = Server::new(engine);
    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received SIGINT, shutting down gracefully...");
                signal_server.shutdown().await;
            }
            Err(err) => error!("Failed to listen for ctrl-c: {}", err),
        }
    });

    match &args.listen {
        Some(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("can't listen on {}", addr))?;
            Arc::clone(&server).serve_tcp(listener).await?;
        }
        None => Arc::clone(&server).serve_stdio().await,
    }

    if !server.is_shutting_down() {
        server.shutdown().await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("--- Starting swcfgd ---");
    match run(args).await {
        Ok(()) => {
            info!("swcfgd exiting normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("swcfgd error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
