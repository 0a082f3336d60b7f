use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use convert_server::{AppState, FileConfig, create_router, load_config};
use job_supervisor::Supervisor;

/// How long shutdown waits for a stopped job to exit
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "convertd")]
#[command(about = "HTTP control surface for a long-running document conversion job")]
struct Args {
    /// Config file (defaults to ./convertd.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port for the HTTP server (0 for automatic)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_directive = if args.debug {
        "convert_server=debug,job_supervisor=debug,tower_http=debug,warn"
    } else {
        "convert_server=info,job_supervisor=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let mut config: FileConfig = load_config(args.config.as_deref())
        .extract()
        .context("Failed to load configuration")?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let job_spec = config.job.to_spec();
    info!(
        "Conversion job: {} {}",
        job_spec.program,
        job_spec.args.join(" ")
    );

    let state = AppState {
        supervisor: Arc::new(Supervisor::new(job_spec)),
        analysis: Arc::new(config.analysis.to_config()),
    };
    let supervisor = state.supervisor.clone();

    if !config.server.static_dir.is_dir() {
        warn!(
            "Static directory {} not found, web UI will be unavailable",
            config.server.static_dir.display()
        );
    }
    let app = create_router(state, config.server.static_dir.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port)
        .parse::<SocketAddr>()
        .with_context(|| {
            format!(
                "Invalid bind address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("Conversion server listening on http://{}", actual_addr);
    info!("");
    info!("Web UI: http://{}/", actual_addr);
    info!("Endpoints:");
    info!("  POST /api/start   - Start a conversion");
    info!("  POST /api/stop    - Stop the running conversion");
    info!("  GET  /api/status  - Current job status");
    info!("  GET  /api/logs    - Drain captured output");
    info!("  POST /api/analyze - Run the analysis report");
    info!("  GET  /health      - Liveness probe");

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    stop_running_job(&supervisor).await;
    info!("Shutdown complete");
    Ok(())
}

/// Send a stop to any running job and give it a bounded time to exit.
async fn stop_running_job(supervisor: &Supervisor) {
    let Ok(id) = supervisor.stop() else {
        return;
    };
    info!("Waiting for {} to exit", id);

    let mut status = supervisor.subscribe();
    match tokio::time::timeout(SHUTDOWN_GRACE, status.wait_for(|s| !s.running)).await {
        Ok(Ok(s)) => info!("{} exited with code {:?}", id, s.exit_code),
        Ok(Err(_)) => {}
        Err(_) => warn!(
            "{} did not exit within {}s, leaving it behind",
            id,
            SHUTDOWN_GRACE.as_secs()
        ),
    }
}
