//! `stepflow` binary: REST API server plus the timer service that
//! re-drives sleeping and waiting instances.

mod http;
mod state;
mod workflows;

use std::time::Duration;

use clap::{Parser, Subcommand};
use stepflow_core::TimerService;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "stepflow", version, about = "Durable step workflow engine")]
struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server and timer service
    Serve {
        /// Bind address, overriding config (e.g. 0.0.0.0:8080)
        #[arg(long)]
        addr: Option<String>,

        /// Export spans via OpenTelemetry (stdout exporter)
        #[arg(long)]
        otel: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn,stepflow=info",
        (false, 1) => "info,stepflow=debug",
        (false, _) => "trace",
    };

    match cli.command {
        Commands::Serve { addr, otel } => {
            stepflow_observe::init_tracing(filter, otel)
                .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

            let result = serve(addr).await;
            stepflow_observe::shutdown_tracing();
            result
        }
    }
}

async fn serve(addr_override: Option<String>) -> anyhow::Result<()> {
    let state = AppState::init().await?;

    workflows::register_builtin(&state.engine);

    // Pick up instances a previous process left mid-run.
    state.engine.recover().await?;

    let poll_interval = Duration::from_millis(state.config.poll_interval_ms);
    let shutdown = CancellationToken::new();

    let timer = TimerService::new(
        state.engine.repository(),
        state.engine.scheduler(),
        poll_interval,
    );
    let timer_shutdown = shutdown.clone();
    let timer_task = tokio::spawn(timer.run(timer_shutdown));

    let addr = addr_override.unwrap_or_else(|| state.config.http_addr.clone());
    let app = http::router::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("stepflow listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    let _ = timer_task.await;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
