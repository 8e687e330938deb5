mod driver;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use timelane_core::{ListenerHub, ReaderRegistry};
use timelane_pipe::PipeReader;
use timelane_ws::WsServer;

use driver::PipeSpec;

#[derive(Parser)]
#[command(name = "timelaned", about = "Multiplexed line-event daemon: FIFOs in, WebSocket out")]
struct Cli {
    /// Named pipe to ingest, as NAME=PATH (repeatable)
    #[arg(long = "pipe", value_name = "NAME=PATH", value_parser = driver::parse_pipe_spec, required = true)]
    pipes: Vec<PipeSpec>,

    /// Create the FIFOs instead of opening pre-existing ones; created FIFOs
    /// are unlinked on shutdown
    #[arg(long)]
    create: bool,

    /// WebSocket listen address
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Poll round timeout in milliseconds
    #[arg(long, default_value_t = 500)]
    poll_interval_ms: u64,

    /// Maximum concurrent WebSocket clients
    #[arg(long, default_value_t = 64)]
    max_connections: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing. Respects RUST_LOG env var, defaults to info.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    run(Cli::parse()).await
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    tracing::info!(
        listen = %cli.listen,
        pipes = cli.pipes.len(),
        create = cli.create,
        poll_interval_ms = cli.poll_interval_ms,
        "starting timelaned"
    );

    let hub = Arc::new(ListenerHub::new());
    let registry = Arc::new(ReaderRegistry::new(hub.clone()));

    for spec in &cli.pipes {
        let reader = if cli.create {
            PipeReader::create(spec.path.clone())
        } else {
            PipeReader::open(spec.path.clone())
        }
        .with_context(|| format!("pipe `{}` at {}", spec.name, spec.path.display()))?;

        if !registry.add(&spec.name, Arc::new(reader)) {
            anyhow::bail!("duplicate pipe name: {}", spec.name);
        }
    }

    let cancel = tokio_util::sync::CancellationToken::new();
    let poller = driver::spawn_poller(
        registry.clone(),
        Duration::from_millis(cli.poll_interval_ms),
        cancel.clone(),
    )
    .context("spawning poller thread")?;

    let server = WsServer::new(cli.listen, hub, cancel.clone())
        .with_max_connections(cli.max_connections);

    tokio::select! {
        result = server.run() => {
            match result {
                Ok(()) => tracing::warn!("ws server exited unexpectedly"),
                Err(e) => tracing::warn!("ws server error: {e}"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
        _ = sigterm() => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }

    cancel.cancel();
    if poller.join().is_err() {
        tracing::warn!("poller thread panicked");
    }

    tracing::info!("timelaned stopped");
    Ok(())
}

async fn sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        }
        Err(e) => {
            tracing::warn!("failed to install SIGTERM handler: {e}");
            std::future::pending::<()>().await;
        }
    }
}
