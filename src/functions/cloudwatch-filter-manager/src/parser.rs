use std::collections::HashMap;

use lambda_otel_lite::{SpanAttributes, SpanAttributesExtractor};
use opentelemetry::Value as OtelValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::custom_resource::RequestType;

/// CloudFormation custom-resource invocation payload.
///
/// Kept as raw JSON so a malformed template still reaches the handler and
/// gets its callback.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CustomResourceEventWrapper(pub Value);

impl CustomResourceEventWrapper {
    fn text(&self, pointer: &str) -> Option<&str> {
        self.0.pointer(pointer).and_then(Value::as_str)
    }

    fn request_type(&self) -> RequestType {
        self.text("/RequestType").map_or(RequestType::Unknown, RequestType::from_name)
    }

    fn span_name(&self) -> String {
        format!("{} subscription filters", self.request_type().as_str())
    }

    fn span_attribute_map(&self) -> HashMap<String, OtelValue> {
        let mut attributes: HashMap<String, OtelValue> = HashMap::new();

        attributes.insert(
            "faas.trigger.type".to_string(),
            OtelValue::String("cloudformation".into()),
        );
        attributes.insert(
            "aws.cloudformation.request_type".to_string(),
            OtelValue::String(self.request_type().as_str().into()),
        );
        if let Some(logical_resource_id) = self.text("/LogicalResourceId") {
            attributes.insert(
                "aws.cloudformation.logical_resource_id".to_string(),
                OtelValue::String(logical_resource_id.to_string().into()),
            );
        }
        if let Some(stack_name) = self.text("/ResourceProperties/StackName") {
            attributes.insert(
                "aws.cloudformation.stack_name".to_string(),
                OtelValue::String(stack_name.to_string().into()),
            );
        }
        let pattern_count = match self.0.pointer("/ResourceProperties/LogGroupPatterns") {
            Some(Value::Array(patterns)) => Some(patterns.len()),
            Some(Value::String(raw)) => Some(raw.split(',').filter(|pattern| !pattern.trim().is_empty()).count()),
            _ => None,
        };
        if let Some(count) = pattern_count {
            attributes.insert(
                "firetiger.log_group_patterns.count".to_string(),
                OtelValue::I64(count as i64),
            );
        }

        attributes
    }
}

impl SpanAttributesExtractor for CustomResourceEventWrapper {
    fn extract_span_attributes(&self) -> SpanAttributes {
        SpanAttributes::builder()
            .span_name(self.span_name())
            .attributes(self.span_attribute_map())
            .build()
    }
}
