//! Call Guard: binary entrypoint.
//! Boots the Axum HTTP/WebSocket server with shared session state.

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("engine=info,call=info,notify=info,blocklist=info,wake=info,warn"));

    // Shuttle may already have installed a subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let router = call_guard::app().await?;
    Ok(router.into())
}
