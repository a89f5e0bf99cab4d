use std::collections::HashMap;

use aws_lambda_events::event::cloudwatch_logs::{LogData, LogsEvent};
use lambda_otel_lite::{SpanAttributes, SpanAttributesExtractor};
use opentelemetry::Value as OtelValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The invocation payload, kept as raw JSON so it can be forwarded untouched.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CloudWatchEventWrapper(pub Value);

/// What kind of CloudWatch event the function was invoked with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventShape {
    /// A subscription-filter delivery (`{"awslogs": {"data": ...}}`).
    Subscription,
    /// An already-decoded event naming its log group.
    Direct { log_group: String },
    Unknown,
}

impl CloudWatchEventWrapper {
    pub fn shape(&self) -> EventShape {
        if self.0.get("awslogs").is_some() {
            return EventShape::Subscription;
        }
        match self.0.get("logGroup") {
            Some(log_group) => EventShape::Direct {
                log_group: log_group.as_str().unwrap_or("unknown").to_string(),
            },
            None => EventShape::Unknown,
        }
    }

    /// Decodes the gzipped subscription data, for telemetry only.
    ///
    /// The forwarded body is always the original event, so a payload that
    /// fails to decode here is still relayed.
    pub fn subscription_data(&self) -> Option<LogData> {
        if self.shape() != EventShape::Subscription {
            return None;
        }
        // The `awslogs.data` decoder borrows its input, so deserialize from a reference.
        match LogsEvent::deserialize(&self.0) {
            Ok(event) => Some(event.aws_logs.data),
            Err(err) => {
                tracing::debug!(error = %err, "Could not decode subscription data for span attributes.");
                None
            }
        }
    }

    /// Compact JSON encoding of the event, as sent to the ingest server.
    pub fn to_body(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.0)
    }

    fn span_attribute_map(&self) -> HashMap<String, OtelValue> {
        let mut attributes: HashMap<String, OtelValue> = HashMap::new();

        attributes.insert(
            "faas.trigger.type".to_string(),
            OtelValue::String("cloudwatch_logs".into()),
        );

        match (self.shape(), self.subscription_data()) {
            (EventShape::Subscription, Some(log_data)) => {
                attributes.insert(
                    "aws.cloudwatch.log_group".to_string(),
                    OtelValue::String(log_data.log_group.into()),
                );
                attributes.insert(
                    "aws.cloudwatch.log_stream".to_string(),
                    OtelValue::String(log_data.log_stream.into()),
                );
                attributes.insert(
                    "aws.cloudwatch.owner".to_string(),
                    OtelValue::String(log_data.owner.into()),
                );
                attributes.insert(
                    "aws.cloudwatch.events.count".to_string(),
                    OtelValue::I64(log_data.log_events.len() as i64),
                );
            }
            (EventShape::Direct { log_group }, _) => {
                attributes.insert(
                    "aws.cloudwatch.log_group".to_string(),
                    OtelValue::String(log_group.into()),
                );
            }
            _ => {}
        }

        attributes
    }
}

impl SpanAttributesExtractor for CloudWatchEventWrapper {
    fn extract_span_attributes(&self) -> SpanAttributes {
        let attributes = self.span_attribute_map();
        let span_name = match attributes.get("aws.cloudwatch.log_group") {
            Some(log_group) => format!("forward {log_group}"),
            None => "forward cloudwatch_logs".to_string(),
        };

        SpanAttributes::builder()
            .span_name(span_name)
            .kind("consumer".to_string())
            .attributes(attributes)
            .build()
    }
}
