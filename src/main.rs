//! ChronoTick - historical market replay server
//!
//! Serves bar history over REST and replays it tick by tick over
//! `/ws/replay`, with play/pause/stop control from the client.

use anyhow::{Context, Result};
use chronotick_backend::{
    api::{create_router, AppState},
    replay::SessionOptions,
    BarStore, ServerConfig,
};
use dotenv::dotenv;
use std::path::Path;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();

    let config = ServerConfig::from_env().context("Failed to load server configuration")?;
    init_tracing(&config.log_filter);

    info!("⏱️  ChronoTick replay server starting");

    let db_path = config.resolved_db_path(Path::new(env!("CARGO_MANIFEST_DIR")));
    let store = BarStore::open(&db_path)?;

    let session_options = SessionOptions {
        interrupt_waits_on_stop: config.interrupt_waits_on_stop,
    };
    if session_options.interrupt_waits_on_stop {
        info!("⏹️  Stop/disconnect will interrupt in-flight replay waits");
    }

    let state = AppState::new(store).with_session_options(session_options);
    let app = create_router(state, &config.cors_origins);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("🎯 API server listening on {}", config.bind_addr);
    info!("🔌 Replay socket at ws://{}/ws/replay", config.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // 1) Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // 2) Also try the package's own .env when launched from elsewhere
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidate = manifest_dir.join(".env");
    if candidate.exists() {
        let _ = dotenv::from_path(&candidate);
    }
}
