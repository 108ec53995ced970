//! rtcrelay - WebRTC to UDP game-server relay
//!
//! This is the main entry point for the rtcrelay server.

use anyhow::Result;
use clap::Parser;
use rtcrelay::http;
use rtcrelay::{RelayConfig, RelayRuntime};
use tokio::sync::broadcast;
use tracing::{info, Level};

/// rtcrelay - bridge browser data channels to local CS1.6 servers
#[derive(Parser, Debug)]
#[command(name = "rtcrelay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args)?;

    // The environment is read exactly once; everything downstream gets
    // the config record.
    let config = RelayConfig::from_env();

    info!("rtcrelay v{}", rtcrelay::VERSION);
    info!(
        "Probing {} ports {}-{}",
        config.probe.host, config.probe.port_min, config.probe.port_max
    );

    let runtime = RelayRuntime::new(config).await?;
    runtime.registry.start();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        wait_for_termination().await;
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let result = http::serve(runtime.clone(), shutdown_rx).await;
    runtime.registry.stop();
    result
}

/// Install the global tracing subscriber from the CLI flags. Unknown
/// level names fall back to `info`.
fn init_tracing(args: &Args) -> Result<()> {
    let level: Level = args.log_level.parse().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt().with_max_level(level);

    let initialized = if args.json_log {
        builder.json().try_init()
    } else {
        builder.with_target(true).try_init()
    };
    initialized.map_err(|err| anyhow::anyhow!("tracing setup failed: {}", err))
}

/// Resolve once the process is asked to stop: SIGINT everywhere, SIGTERM
/// additionally on unix.
async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
