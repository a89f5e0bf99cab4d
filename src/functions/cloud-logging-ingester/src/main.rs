//! Cloud Run function that relays Cloud Logging entries to Firetiger.
//!
//! The service:
//! 1. Receives Pub/Sub messages from a log sink as CloudEvents on `POST /`
//! 2. Base64-decodes `message.data` back into the `LogEntry` JSON
//! 3. In `otlp` mode translates it to an OTLP `ResourceLogs` document and posts
//!    it to `/v1/logs`; in `raw` mode posts the entry unchanged
//! 4. Answers 2xx only once the entry was accepted, so Pub/Sub retries failures
//!
//! Configuration:
//! - `FT_EXPORTER_ENDPOINT`, `FT_EXPORTER_BASIC_AUTH_USERNAME` / `_PASSWORD`
//! - `FT_RELAY_MODE` (`otlp` or `raw`), `FT_SUPPRESS_FORWARD_LOGS`, `PORT`

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use firetiger_ingest_core::Forwarder;

mod parser;
mod relay;
mod telemetry;

use relay::{AppState, RelaySettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let settings = RelaySettings::from_env()?;
    let forwarder = Arc::new(Forwarder::new()?);
    let state = AppState::new(settings, forwarder, Arc::new(|key: &str| std::env::var(key).ok()));

    let address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, settings.port));
    let listener = tokio::net::TcpListener::bind(address).await?;
    tracing::info!(
        %address,
        mode = ?settings.mode,
        suppress_forward_logs = settings.suppress_forward_logs,
        "cloud-logging-ingester listening."
    );

    axum::serve(listener, relay::router(state)).await?;
    Ok(())
}
