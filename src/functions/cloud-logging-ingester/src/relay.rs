//! The HTTP endpoint that receives Pub/Sub CloudEvents and relays them.
//!
//! A non-2xx answer makes Pub/Sub redeliver the message, so every forwarding
//! failure is surfaced as an error status instead of being swallowed.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use bytes::Bytes;
use firetiger_ingest_core::{
    Destination, ExporterConfig, Forwarder,
    cloud_logging::log_entry_to_otlp,
    constants::{defaults, env_vars, paths, user_agents},
};
use thiserror::Error;

use crate::parser::{DecodeError, LogMessage, decode_push};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("log entry is not valid JSON")]
    LogEntry(#[source] serde_json::Error),

    #[error("failed to encode OTLP payload")]
    Encode(#[source] serde_json::Error),

    #[error(transparent)]
    Exporter(#[from] firetiger_ingest_core::Error),

    #[error("invalid value {value:?} for {name}")]
    InvalidSetting { name: &'static str, value: String },
}

impl RelayError {
    fn status(&self) -> StatusCode {
        match self {
            RelayError::Decode(_) | RelayError::LogEntry(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status(), render(&self)).into_response()
    }
}

/// `outer: inner` rendering of an error and its sources.
fn render(err: &(dyn std::error::Error + 'static)) -> String {
    anyhow::Chain::new(err)
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}

/// How decoded log entries are sent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// Translate each `LogEntry` to OTLP and post it to `/v1/logs`.
    Otlp,
    /// Post the `LogEntry` bytes unmodified to the Cloud Logging relay path.
    Raw,
}

impl FromStr for RelayMode {
    type Err = RelayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "otlp" => Ok(RelayMode::Otlp),
            "raw" => Ok(RelayMode::Raw),
            _ => Err(RelayError::InvalidSetting {
                name: env_vars::RELAY_MODE,
                value: value.to_string(),
            }),
        }
    }
}

impl RelayMode {
    fn destination(self, config: &ExporterConfig) -> Destination {
        match self {
            RelayMode::Otlp => config.destination(paths::OTLP_LOGS, user_agents::GCP_CLOUD_FUNCTION),
            RelayMode::Raw => config.destination(paths::GCP_CLOUD_LOGGING, user_agents::GCP_CLOUD_FUNCTION),
        }
    }
}

/// Process-level settings of the relay server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    pub mode: RelayMode,
    /// Skip per-message success and failure logs. When this service's own
    /// logs are routed into the relayed sink, logging would feed back into
    /// itself.
    pub suppress_forward_logs: bool,
    pub port: u16,
}

impl RelaySettings {
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let mode = match read(env_vars::RELAY_MODE) {
            Some(value) => value.parse()?,
            None => RelayMode::Otlp,
        };
        let suppress_forward_logs = match read(env_vars::SUPPRESS_FORWARD_LOGS) {
            Some(value) => parse_flag(env_vars::SUPPRESS_FORWARD_LOGS, &value)?,
            None => mode == RelayMode::Raw,
        };
        let port = match read(env_vars::PORT) {
            Some(value) => value.trim().parse().map_err(|_| RelayError::InvalidSetting {
                name: env_vars::PORT,
                value,
            })?,
            None => defaults::PORT,
        };

        Ok(Self {
            mode,
            suppress_forward_logs,
            port,
        })
    }
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, RelayError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(RelayError::InvalidSetting {
            name,
            value: value.to_string(),
        }),
    }
}

/// Source of exporter settings, consulted on every request.
pub type SettingLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    settings: RelaySettings,
    forwarder: Arc<Forwarder>,
    lookup: SettingLookup,
}

impl AppState {
    pub fn new(settings: RelaySettings, forwarder: Arc<Forwarder>, lookup: SettingLookup) -> Self {
        Self {
            settings,
            forwarder,
            lookup,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/", post(handle_event)).with_state(state)
}

/// Builds the outbound body for `message` according to `mode`.
fn payload(mode: RelayMode, message: LogMessage) -> Result<Vec<u8>, RelayError> {
    match mode {
        RelayMode::Raw => Ok(message.data),
        RelayMode::Otlp => {
            let entry = message.log_entry().map_err(RelayError::LogEntry)?;
            serde_json::to_vec(&log_entry_to_otlp(&entry)).map_err(RelayError::Encode)
        }
    }
}

async fn handle_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, RelayError> {
    let quiet = state.settings.suppress_forward_logs;
    let event_id = headers.get("ce-id").and_then(|value| value.to_str().ok());

    let Some(message) = decode_push(&body)? else {
        if !quiet {
            tracing::warn!(event_id, "Received empty Pub/Sub message.");
        }
        return Ok(StatusCode::NO_CONTENT);
    };

    let config = ExporterConfig::from_lookup(|key| (state.lookup)(key))?;
    let destination = state.settings.mode.destination(&config);
    let message_id = message.message_id.clone();
    let message_id = message_id.as_deref();
    if !quiet {
        tracing::debug!(
            event_id,
            message_id,
            subscription = message.subscription.as_deref(),
            bytes = message.data.len(),
            "Decoded Pub/Sub message."
        );
    }
    let body = payload(state.settings.mode, message)?;

    match state.forwarder.forward(&destination, body).await {
        Ok(status) => {
            if !quiet {
                tracing::info!(
                    event_id,
                    message_id,
                    status = status.as_u16(),
                    "Cloud Logging entry forwarded to Firetiger."
                );
            }
            Ok(StatusCode::OK)
        }
        Err(err) => {
            if !quiet {
                tracing::error!(
                    event_id,
                    message_id,
                    error = %render(&err),
                    "Failed to forward Cloud Logging entry to Firetiger."
                );
            }
            Err(err.into())
        }
    }
}
