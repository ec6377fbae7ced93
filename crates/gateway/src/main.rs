use std::net::SocketAddr;

use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use es_domain::config::Config;
use es_gateway::{api, build_state};

#[derive(Debug, Parser)]
#[command(name = "envsim", about = "Deterministic multi-modality environment simulator")]
struct Args {
    /// Path to the TOML config file.
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Override the configured server port.
    #[arg(long)]
    port: Option<u16>,

    /// Log output format.
    #[arg(long, default_value = "json", value_parser = ["json", "pretty"])]
    log_format: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // ── Tracing ────────────────────────────────────────────────────
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("envsim=info,es_engine=info,tower_http=info"));
    if args.log_format == "pretty" {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    }

    tracing::info!("EnvSim starting");

    // ── Config ─────────────────────────────────────────────────────
    let mut config = Config::load_or_default(&args.config);
    if let Some(port) = args.port {
        config.server.port = port;
    }
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        base_tick_ms = config.simulation.base_tick_ms,
        undo_max_size = ?config.simulation.undo_max_size,
        "configuration loaded"
    );

    // ── App state ──────────────────────────────────────────────────
    let state = build_state(config.clone())?;
    tracing::info!(
        simulation_id = %state.engine.lock().simulation_id(),
        current_time = %state.engine.lock().current_time(),
        "engine ready"
    );

    // ── Router ─────────────────────────────────────────────────────
    let app = api::router()
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // ── Server ─────────────────────────────────────────────────────
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
