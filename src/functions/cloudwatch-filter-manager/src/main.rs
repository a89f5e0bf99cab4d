//! AWS Lambda function backing the subscription-filter custom resource.
//!
//! This Lambda function:
//! 1. Receives CloudFormation custom-resource lifecycle events
//! 2. On Create/Update, puts a subscription filter on every log group matching
//!    `LogGroupPatterns`, targeting `LambdaArn`
//! 3. On Delete, acknowledges first and then removes the stack's filters
//! 4. Always answers the request's `ResponseURL` exactly once
//!
//! Per-log-group failures are logged and skipped so one bad group never
//! blocks a stack operation.

use std::sync::Arc;

use firetiger_ingest_core::Forwarder;
use lambda_otel_lite::{LambdaSpanProcessor, OtelTracingLayer, TelemetryConfig, init_telemetry};
use lambda_runtime::{Error as LambdaError, LambdaEvent, Runtime, tower::ServiceBuilder};
use opentelemetry_otlp::{Protocol, WithExportConfig};
use serde_json::{Value, json};

mod custom_resource;
mod parser;
mod provisioner;

use custom_resource::{
    CfnResponder, CustomResourceRequest, CustomResourceResponse, FilterManagerProperties, InvalidRequest,
    RequestType, ResponseStatus,
};
use parser::CustomResourceEventWrapper;
use provisioner::{
    CloudWatchLogsApi, Deadline, FilterSettings, LogGroupMatcher, LogGroupsApi, ProvisionError,
    cleanup_subscription_filters, create_subscription_filters,
};

/// Per-invocation facts taken from the Lambda context.
#[derive(Debug, Clone)]
struct InvocationContext {
    log_stream_name: String,
    deadline: Deadline,
}

fn filter_settings(properties: &FilterManagerProperties) -> Result<FilterSettings, ProvisionError> {
    let destination_arn = properties
        .lambda_arn
        .clone()
        .filter(|arn| !arn.is_empty())
        .ok_or(ProvisionError::MissingProperty("LambdaArn"))?;
    let stack_name = properties
        .stack_name
        .clone()
        .filter(|name| !name.is_empty())
        .ok_or(ProvisionError::MissingProperty("StackName"))?;

    Ok(FilterSettings {
        stack_name,
        destination_arn,
        filter_pattern: properties.filter_pattern.clone().unwrap_or_default(),
        matcher: LogGroupMatcher::new(&properties.log_group_patterns)?,
    })
}

async fn provision(
    request: &CustomResourceRequest,
    api: &dyn LogGroupsApi,
) -> Result<Value, ProvisionError> {
    let settings = filter_settings(&request.resource_properties)?;
    tracing::info!(
        stack_name = %settings.stack_name,
        patterns = ?request.resource_properties.log_group_patterns,
        "Creating subscription filters."
    );
    let report = create_subscription_filters(api, &settings).await?;
    tracing::info!(
        created = report.created.len(),
        monitored = report.monitored_log_groups,
        "Created subscription filters."
    );
    Ok(report.response_data())
}

/// Runs one lifecycle event and sends its CloudFormation response.
///
/// Returns the status that was reported.
async fn handle_request(
    request: &CustomResourceRequest,
    api: &dyn LogGroupsApi,
    responder: &CfnResponder,
    invocation: &InvocationContext,
) -> ResponseStatus {
    let respond = |status, data, reason| {
        CustomResourceResponse::new(request, status, data, reason, &invocation.log_stream_name)
    };

    match request.request_type {
        RequestType::Delete => {
            // Acknowledge before cleanup so a slow scan cannot wedge stack deletion.
            let response = respond(
                ResponseStatus::Success,
                json!({"Message": "Delete acknowledged, cleanup in progress"}),
                None,
            );
            responder.send(request, &response).await;

            match request.resource_properties.stack_name.as_deref().filter(|name| !name.is_empty()) {
                Some(stack_name) => {
                    let report = cleanup_subscription_filters(api, stack_name, &invocation.deadline).await;
                    tracing::info!(
                        deleted = report.deleted,
                        stopped_early = report.stopped_early,
                        "Subscription filter cleanup finished."
                    );
                }
                None => tracing::warn!("No StackName on Delete, skipping subscription filter cleanup."),
            }
            ResponseStatus::Success
        }
        RequestType::Create | RequestType::Update => {
            let (status, data, reason) = match provision(request, api).await {
                Ok(data) => (ResponseStatus::Success, data, None),
                Err(err) => {
                    let reason = format!("{:#}", anyhow::Error::new(err));
                    tracing::error!(error = %reason, "Failed to provision subscription filters.");
                    (ResponseStatus::Failed, json!({}), Some(reason))
                }
            };
            responder.send(request, &respond(status, data, reason)).await;
            status
        }
        RequestType::Unknown => {
            let err = ProvisionError::UnsupportedRequestType;
            tracing::error!(error = %err, "Rejecting custom resource request.");
            responder
                .send(request, &respond(ResponseStatus::Failed, json!({}), Some(err.to_string())))
                .await;
            ResponseStatus::Failed
        }
    }
}

/// Parses a raw event and answers it.
///
/// A malformed Delete is still acknowledged so stack deletion can proceed;
/// any other malformed event is answered with `FAILED`.
async fn handle_event(
    event: &Value,
    api: &dyn LogGroupsApi,
    responder: &CfnResponder,
    invocation: &InvocationContext,
) -> ResponseStatus {
    let (request, error) = match CustomResourceRequest::parse(event) {
        Ok(request) => return handle_request(&request, api, responder, invocation).await,
        Err(InvalidRequest { request, error }) => (request, error),
    };

    let reason = format!("invalid custom resource request: {error}");
    tracing::error!(
        request_type = request.request_type.as_str(),
        error = %reason,
        "Failed to parse custom resource request."
    );
    if request.request_type == RequestType::Delete {
        return handle_request(&request, api, responder, invocation).await;
    }

    let response = CustomResourceResponse::new(
        &request,
        ResponseStatus::Failed,
        json!({}),
        Some(reason),
        &invocation.log_stream_name,
    );
    responder.send(&request, &response).await;
    ResponseStatus::Failed
}

async fn function_handler(
    event: LambdaEvent<CustomResourceEventWrapper>,
    api: Arc<CloudWatchLogsApi>,
    responder: Arc<CfnResponder>,
) -> Result<(), LambdaError> {
    let invocation = InvocationContext {
        log_stream_name: event.context.env_config.log_stream.clone(),
        deadline: Deadline::from_epoch_millis(event.context.deadline),
    };
    let event = event.payload.0;
    tracing::info!(
        request_type = ?event.get("RequestType"),
        logical_resource_id = ?event.get("LogicalResourceId"),
        "Received custom resource request."
    );

    let status = handle_event(&event, api.as_ref(), responder.as_ref(), &invocation).await;
    tracing::info!(status = ?status, "Custom resource request handled.");
    Ok(())
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
    tracing::info!("lambda-otel-lite initialized for cloudwatch-filter-manager.");

    let aws_config = aws_config::load_from_env().await;
    let api = Arc::new(CloudWatchLogsApi::new(aws_sdk_cloudwatchlogs::Client::new(&aws_config)));
    let responder = Arc::new(CfnResponder::new(Forwarder::new()?.client().clone()));

    let service = ServiceBuilder::new()
        .layer(OtelTracingLayer::new(completion_handler))
        .service_fn(move |event: LambdaEvent<CustomResourceEventWrapper>| {
            let api = Arc::clone(&api);
            let responder = Arc::clone(&responder);
            async move { function_handler(event, api, responder).await }
        });

    tracing::info!("cloudwatch-filter-manager starting Lambda runtime.");
    Runtime::new(service).run().await
}
