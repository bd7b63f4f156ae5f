//! Beacon relay server.
//!
//! Serves the relay over a WebSocket at `/ws` and exposes read-only status
//! routes under `/api/beacon`.
//!
//! ```bash
//! GEMINI_API_KEY=... BEACON_ADDR=0.0.0.0:3001 cargo run -p beacon-server
//! ```
//!
//! Without a Gemini key every narrative uses the local fallback template.

mod config;
mod error;
mod routes;
mod socket;

use std::{net::SocketAddr, sync::Arc};

use beacon_core::{BeaconRelay, NarrativeGenerator, RelayConfig};
use gemini::Gemini;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use config::Config;
use error::ServerError;
use routes::{router, AppState};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let relay = BeaconRelay::new(
        build_generator(&config),
        RelayConfig::new().with_narrative_capacity(config.narrative_capacity),
    );

    serve(config.addr, relay).await
}

fn build_generator(config: &Config) -> NarrativeGenerator {
    match Gemini::from_env() {
        Ok(client) => {
            info!(model = %config.gemini_model, "Gemini narrative backend initialized");
            NarrativeGenerator::new(Arc::new(client.with_model(&config.gemini_model)))
        }
        Err(e) => {
            warn!(error = %e, "Gemini unavailable, narratives will use the fallback template");
            NarrativeGenerator::offline()
        }
    }
}

async fn serve(addr: SocketAddr, relay: BeaconRelay) -> Result<(), ServerError> {
    let app = router(AppState { relay });

    let listener = TcpListener::bind(addr).await?;
    info!("Beacon relay listening on http://{addr} (WebSocket at /ws)");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
