//! CloudFormation custom-resource request and response plumbing.
//!
//! Responses go to the pre-signed S3 `ResponseURL` as an HTTP PUT with an
//! empty `Content-Type`, which is what the signature was computed over.

use reqwest::header::CONTENT_TYPE;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum RequestType {
    Create,
    Update,
    Delete,
    #[default]
    #[serde(other)]
    Unknown,
}

impl RequestType {
    pub fn from_name(name: &str) -> Self {
        match name {
            "Create" => RequestType::Create,
            "Update" => RequestType::Update,
            "Delete" => RequestType::Delete,
            _ => RequestType::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::Create => "Create",
            RequestType::Update => "Update",
            RequestType::Delete => "Delete",
            RequestType::Unknown => "Unknown",
        }
    }
}

/// Properties set on the custom resource in the template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FilterManagerProperties {
    #[serde(default)]
    pub lambda_arn: Option<String>,
    #[serde(default)]
    pub filter_pattern: Option<String>,
    #[serde(default, deserialize_with = "patterns_from_list_or_csv")]
    pub log_group_patterns: Vec<String>,
    #[serde(default)]
    pub stack_name: Option<String>,
}

/// A custom-resource lifecycle event.
///
/// Everything is optional so that any object still yields a request that
/// can be answered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceRequest {
    #[serde(default)]
    pub request_type: RequestType,
    #[serde(rename = "ResponseURL", default)]
    pub response_url: Option<String>,
    #[serde(default)]
    pub stack_id: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub logical_resource_id: String,
    #[serde(default)]
    pub physical_resource_id: Option<String>,
    #[serde(default)]
    pub resource_properties: FilterManagerProperties,
}

/// An event that did not deserialize as a whole.
///
/// `request` still holds every callback field that could be read on its own.
#[derive(Debug)]
pub struct InvalidRequest {
    pub request: CustomResourceRequest,
    pub error: serde_json::Error,
}

impl CustomResourceRequest {
    /// Reads a raw lifecycle event.
    pub fn parse(event: &Value) -> Result<Self, InvalidRequest> {
        Self::deserialize(event).map_err(|error| InvalidRequest {
            request: Self::salvage(event),
            error,
        })
    }

    /// Field-by-field read that keeps only well-typed strings.
    fn salvage(event: &Value) -> Self {
        let text = |pointer: &str| event.pointer(pointer).and_then(Value::as_str).map(str::to_string);

        Self {
            request_type: text("/RequestType").map_or(RequestType::Unknown, |name| RequestType::from_name(&name)),
            response_url: text("/ResponseURL"),
            stack_id: text("/StackId").unwrap_or_default(),
            request_id: text("/RequestId").unwrap_or_default(),
            logical_resource_id: text("/LogicalResourceId").unwrap_or_default(),
            physical_resource_id: text("/PhysicalResourceId"),
            resource_properties: FilterManagerProperties {
                stack_name: text("/ResourceProperties/StackName"),
                ..FilterManagerProperties::default()
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceResponse {
    pub status: ResponseStatus,
    pub reason: String,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    pub data: Value,
}

impl CustomResourceResponse {
    /// Builds the response for `request`.
    ///
    /// An existing physical id is echoed back; changing it on Update would
    /// make CloudFormation replace the resource.
    pub fn new(
        request: &CustomResourceRequest,
        status: ResponseStatus,
        data: Value,
        reason: Option<String>,
        log_stream_name: &str,
    ) -> Self {
        let physical_resource_id = request
            .physical_resource_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| log_stream_name.to_string());

        Self {
            status,
            reason: reason.unwrap_or_else(|| format!("See CloudWatch Log Stream: {log_stream_name}")),
            physical_resource_id,
            stack_id: request.stack_id.clone(),
            request_id: request.request_id.clone(),
            logical_resource_id: request.logical_resource_id.clone(),
            data,
        }
    }
}

/// Delivers custom-resource responses.
#[derive(Clone, Debug)]
pub struct CfnResponder {
    client: ClientWithMiddleware,
}

impl CfnResponder {
    pub fn new(client: ClientWithMiddleware) -> Self {
        Self { client }
    }

    /// PUTs `response` to the request's `ResponseURL`.
    ///
    /// Returns whether the callback was delivered. Failures are logged and
    /// not raised: there is nobody left to report them to.
    pub async fn send(&self, request: &CustomResourceRequest, response: &CustomResourceResponse) -> bool {
        let Some(url) = request.response_url.as_deref().filter(|url| !url.is_empty()) else {
            tracing::warn!("No ResponseURL in event, skipping CloudFormation response.");
            return false;
        };

        let body = match serde_json::to_vec(response) {
            Ok(body) => body,
            Err(err) => {
                tracing::error!(error = %err, "Failed to encode CloudFormation response.");
                return false;
            }
        };
        tracing::info!(status = ?response.status, reason = %response.reason, "Sending CloudFormation response.");

        match self.client.put(url).header(CONTENT_TYPE, "").body(body).send().await {
            Ok(reply) if reply.status().is_success() => {
                tracing::info!(status = reply.status().as_u16(), "CloudFormation response sent successfully.");
                true
            }
            Ok(reply) => {
                tracing::error!(status = reply.status().as_u16(), "CloudFormation rejected the response.");
                false
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to send CloudFormation response.");
                false
            }
        }
    }
}

fn patterns_from_list_or_csv<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Patterns {
        List(Vec<String>),
        Csv(String),
    }

    Ok(match Option::<Patterns>::deserialize(deserializer)? {
        Some(Patterns::List(patterns)) => patterns,
        Some(Patterns::Csv(raw)) => raw
            .split(',')
            .map(str::trim)
            .filter(|pattern| !pattern.is_empty())
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use firetiger_ingest_core::Forwarder;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_request(response_url: Option<String>) -> CustomResourceRequest {
        serde_json::from_value(json!({
            "RequestType": "Create",
            "ServiceToken": "arn:aws:lambda:us-east-1:123456789012:function:filter-manager",
            "ResponseURL": response_url,
            "StackId": "arn:aws:cloudformation:us-east-1:123456789012:stack/demo/guid",
            "RequestId": "req-1",
            "LogicalResourceId": "SubscriptionFilters",
            "ResourceType": "Custom::SubscriptionFilters",
            "ResourceProperties": {
                "ServiceToken": "arn:aws:lambda:us-east-1:123456789012:function:filter-manager",
                "LambdaArn": "arn:aws:lambda:us-east-1:123456789012:function:ingester",
                "FilterPattern": "",
                "LogGroupPatterns": ["^/aws/lambda/", "*"],
                "StackName": "demo"
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_request_parsing() {
        let request = create_request(Some("https://example.com/cfn".to_string()));
        assert_eq!(request.request_type, RequestType::Create);
        assert_eq!(request.response_url.as_deref(), Some("https://example.com/cfn"));
        assert_eq!(request.resource_properties.stack_name.as_deref(), Some("demo"));
        assert_eq!(request.resource_properties.log_group_patterns, vec!["^/aws/lambda/", "*"]);
        assert_eq!(request.physical_resource_id, None);
    }

    #[test]
    fn test_patterns_accept_comma_separated_string() {
        let properties: FilterManagerProperties =
            serde_json::from_value(json!({"LogGroupPatterns": "^/aws/lambda/, /ecs/ ,"})).unwrap();
        assert_eq!(properties.log_group_patterns, vec!["^/aws/lambda/", "/ecs/"]);

        let properties: FilterManagerProperties = serde_json::from_value(json!({})).unwrap();
        assert!(properties.log_group_patterns.is_empty());
    }

    #[test]
    fn test_unknown_request_type_and_missing_fields() {
        let request: CustomResourceRequest = serde_json::from_value(json!({"RequestType": "Rollback"})).unwrap();
        assert_eq!(request.request_type, RequestType::Unknown);
        assert_eq!(request.response_url, None);

        let request: CustomResourceRequest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(request, CustomResourceRequest::default());
    }

    #[test]
    fn test_malformed_event_keeps_callback_fields() {
        let event = json!({
            "RequestType": "Delete",
            "ResponseURL": "https://example.com/cfn",
            "StackId": "arn:aws:cloudformation:us-east-1:123456789012:stack/demo/guid",
            "RequestId": "req-1",
            "LogicalResourceId": "SubscriptionFilters",
            "PhysicalResourceId": "stream",
            "ResourceProperties": {"LogGroupPatterns": {"a": "b"}, "StackName": "demo"}
        });

        let invalid = CustomResourceRequest::parse(&event).unwrap_err();
        let request = invalid.request;
        assert_eq!(request.request_type, RequestType::Delete);
        assert_eq!(request.response_url.as_deref(), Some("https://example.com/cfn"));
        assert_eq!(request.request_id, "req-1");
        assert_eq!(request.logical_resource_id, "SubscriptionFilters");
        assert_eq!(request.physical_resource_id.as_deref(), Some("stream"));
        assert_eq!(request.resource_properties.stack_name.as_deref(), Some("demo"));
        assert!(request.resource_properties.log_group_patterns.is_empty());
    }

    #[test]
    fn test_non_string_request_type_is_unknown_when_salvaged() {
        let invalid = CustomResourceRequest::parse(&json!({"RequestType": 7, "RequestId": "req-1"})).unwrap_err();
        assert_eq!(invalid.request.request_type, RequestType::Unknown);
        assert_eq!(invalid.request.request_id, "req-1");

        let invalid = CustomResourceRequest::parse(&json!({"ResourceProperties": {"StackName": ["demo"]}})).unwrap_err();
        assert_eq!(invalid.request.resource_properties.stack_name, None);

        let request = CustomResourceRequest::parse(&json!({"RequestType": "Update"})).unwrap();
        assert_eq!(request.request_type, RequestType::Update);
    }

    #[test]
    fn test_response_body_shape() {
        let request = create_request(None);
        let response = CustomResourceResponse::new(
            &request,
            ResponseStatus::Success,
            json!({"FilterCount": 0}),
            None,
            "2024/01/15/[$LATEST]abc",
        );

        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "Status": "SUCCESS",
                "Reason": "See CloudWatch Log Stream: 2024/01/15/[$LATEST]abc",
                "PhysicalResourceId": "2024/01/15/[$LATEST]abc",
                "StackId": "arn:aws:cloudformation:us-east-1:123456789012:stack/demo/guid",
                "RequestId": "req-1",
                "LogicalResourceId": "SubscriptionFilters",
                "Data": {"FilterCount": 0}
            })
        );
    }

    #[test]
    fn test_existing_physical_id_is_kept() {
        let mut request = create_request(None);
        request.physical_resource_id = Some("original-stream".to_string());
        let response = CustomResourceResponse::new(
            &request,
            ResponseStatus::Failed,
            json!({}),
            Some("boom".to_string()),
            "new-stream",
        );
        assert_eq!(response.physical_resource_id, "original-stream");
        assert_eq!(response.reason, "boom");
        assert_eq!(response.status, ResponseStatus::Failed);
    }

    #[tokio::test]
    async fn test_send_puts_with_empty_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/cfn"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let request = create_request(Some(format!("{}/cfn", server.uri())));
        let response = CustomResourceResponse::new(&request, ResponseStatus::Success, json!({}), None, "stream");
        let responder = CfnResponder::new(Forwarder::new().unwrap().client().clone());

        assert!(responder.send(&request, &response).await);

        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        let content_type = received[0].headers.get("content-type").map(|value| value.as_bytes());
        assert_eq!(content_type, Some(&b""[..]));
        let body: Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(body["Status"], "SUCCESS");
        assert_eq!(body["RequestId"], "req-1");
    }

    #[tokio::test]
    async fn test_send_without_response_url_is_skipped() {
        let request = create_request(None);
        let response = CustomResourceResponse::new(&request, ResponseStatus::Success, json!({}), None, "stream");
        let responder = CfnResponder::new(Forwarder::new().unwrap().client().clone());
        assert!(!responder.send(&request, &response).await);
    }

    #[tokio::test]
    async fn test_send_failure_is_not_raised() {
        let request = create_request(Some("http://127.0.0.1:1/cfn".to_string()));
        let response = CustomResourceResponse::new(&request, ResponseStatus::Failed, json!({}), None, "stream");
        let responder = CfnResponder::new(Forwarder::new().unwrap().client().clone());
        assert!(!responder.send(&request, &response).await);
    }
}
