//! AWS Lambda function that relays CloudWatch Logs events to Firetiger.
//!
//! This Lambda function:
//! 1. Receives CloudWatch Logs subscription-filter events (or direct events)
//! 2. Re-serializes the event as compact JSON, without transforming it
//! 3. POSTs it to `<FT_EXPORTER_ENDPOINT>/aws/cloudwatch/logs`
//! 4. Returns a `{statusCode, body}` result carrying the request id
//!
//! The function supports:
//! - Configurable ingest endpoint via `FT_EXPORTER_ENDPOINT`
//! - Optional basic auth via `FT_EXPORTER_BASIC_AUTH_USERNAME` / `_PASSWORD`
//! - Self-instrumentation with OpenTelemetry tracing

use firetiger_ingest_core::{
    ExporterConfig, Forwarder,
    constants::{paths, user_agents},
};
use lambda_otel_lite::{LambdaSpanProcessor, OtelTracingLayer, TelemetryConfig, init_telemetry};
use lambda_runtime::{Error as LambdaError, LambdaEvent, Runtime, tower::ServiceBuilder};
use opentelemetry_otlp::{Protocol, WithExportConfig};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

mod parser;
use parser::{CloudWatchEventWrapper, EventShape};

/// The result handed back to the Lambda runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub status_code: u16,
    /// JSON document, encoded as a string.
    pub body: String,
}

impl IngestResponse {
    fn success(request_id: &str) -> Self {
        Self {
            status_code: 200,
            body: json!({
                "message": "CloudWatch logs successfully forwarded to Firetiger",
                "requestId": request_id,
            })
            .to_string(),
        }
    }

    fn failure(error: impl Into<String>, request_id: &str) -> Self {
        Self {
            status_code: 500,
            body: json!({
                "error": error.into(),
                "requestId": request_id,
            })
            .to_string(),
        }
    }
}

/// Forwards one event and converts the outcome into a response.
///
/// Every failure past configuration becomes a 500 response; nothing is retried.
async fn forward_event(
    event: &CloudWatchEventWrapper,
    config: &ExporterConfig,
    forwarder: &Forwarder,
    request_id: &str,
) -> IngestResponse {
    tracing::info!(request_id, "Processing CloudWatch logs event.");
    match event.shape() {
        EventShape::Subscription => tracing::info!("Received CloudWatch Logs subscription event."),
        EventShape::Direct { log_group } => {
            tracing::info!(log_group = %log_group, "Received direct CloudWatch event.")
        }
        EventShape::Unknown => tracing::warn!("Received event of unrecognized shape, forwarding as-is."),
    }

    let body = match event.to_body() {
        Ok(body) => body,
        Err(err) => {
            tracing::error!(error = %err, "Failed to serialize CloudWatch event.");
            return IngestResponse::failure(format!("Lambda handler error: {err}"), request_id);
        }
    };

    let destination = config.destination(paths::AWS_CLOUDWATCH_LOGS, user_agents::CLOUDWATCH_LAMBDA);
    tracing::info!(
        endpoint = %destination.url,
        basic_auth = destination.authorization.is_some(),
        "Posting CloudWatch logs."
    );

    match forwarder.forward(&destination, body).await {
        Ok(status) => {
            tracing::info!(status = status.as_u16(), "CloudWatch logs successfully forwarded to Firetiger.");
            IngestResponse::success(request_id)
        }
        Err(err) => {
            let transport = err.is_transport();
            tracing::error!(
                error = %format!("{:#}", anyhow::Error::new(err)),
                transport,
                "Failed to forward CloudWatch logs to Firetiger."
            );
            IngestResponse::failure("Failed to forward CloudWatch logs to Firetiger", request_id)
        }
    }
}

async fn function_handler(
    event: LambdaEvent<CloudWatchEventWrapper>,
    forwarder: Arc<Forwarder>,
) -> Result<IngestResponse, LambdaError> {
    // A missing endpoint aborts the invocation instead of producing a response.
    let config = ExporterConfig::from_env()?;
    Ok(forward_event(&event.payload, &config, &forwarder, &event.context.request_id).await)
}

#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    let otlp_http_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .build()?;

    let (_, completion_handler) = init_telemetry(
        TelemetryConfig::builder()
            .with_span_processor(
                LambdaSpanProcessor::builder()
                    .exporter(otlp_http_exporter)
                    .build(),
            )
            .build(),
    )
    .await?;
    tracing::info!("lambda-otel-lite initialized for cloudwatch-logs-ingester.");

    let forwarder = Arc::new(Forwarder::new()?);

    let service = ServiceBuilder::new()
        .layer(OtelTracingLayer::new(completion_handler))
        .service_fn(move |event: LambdaEvent<CloudWatchEventWrapper>| {
            let forwarder = Arc::clone(&forwarder);
            async move { function_handler(event, forwarder).await }
        });

    tracing::info!("cloudwatch-logs-ingester starting Lambda runtime.");
    Runtime::new(service).run().await
}
