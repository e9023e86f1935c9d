use std::sync::Arc;

use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use hebrew_font_maker::api::{build_router, AppState};
use hebrew_font_maker::config::Config;
use hebrew_font_maker::session::Session;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("configuration error: {e}");
        std::process::exit(1);
    });

    let bind_addr = config.bind_addr;
    let state = Arc::new(AppState { config, session: Mutex::new(Session::new()) });
    let app = build_router(state);

    tracing::info!(%bind_addr, "starting hebrew-font-maker");
    let listener = tokio::net::TcpListener::bind(bind_addr).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to bind");
        std::process::exit(1);
    });

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server exited with error");
        std::process::exit(1);
    }
}
