//! Pub/Sub CloudEvent unwrapping.
//!
//! Eventarc delivers Pub/Sub messages either in binary mode (the HTTP body is
//! the push payload, CloudEvent attributes ride in `ce-*` headers) or in
//! structured mode (the body is a CloudEvent whose `data` is the push
//! payload). Both end at `message.data`, a base64 encoded `LogEntry`.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("body is not a Pub/Sub push payload")]
    Envelope(#[source] serde_json::Error),

    #[error("message data is not valid base64")]
    Base64(#[source] base64::DecodeError),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubSubMessage {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PubSubPush {
    #[serde(default)]
    pub message: PubSubMessage,
    #[serde(default)]
    pub subscription: Option<String>,
}

/// One Pub/Sub message with its payload decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub message_id: Option<String>,
    pub subscription: Option<String>,
    /// The `LogEntry` JSON exactly as published.
    pub data: Vec<u8>,
}

impl LogMessage {
    pub fn log_entry(&self) -> serde_json::Result<Value> {
        serde_json::from_slice(&self.data)
    }
}

/// Extracts the Pub/Sub push payload from either CloudEvent mode.
fn push_payload(body: &[u8]) -> Result<PubSubPush, DecodeError> {
    let value: Value = serde_json::from_slice(body).map_err(DecodeError::Envelope)?;
    let payload = match value {
        Value::Object(mut event) if event.contains_key("specversion") => event.remove("data").unwrap_or(Value::Null),
        other => other,
    };
    if payload.is_null() {
        return Ok(PubSubPush::default());
    }
    serde_json::from_value(payload).map_err(DecodeError::Envelope)
}

/// Decodes an HTTP request body into the carried log message.
///
/// An empty body, or a message without data, yields `None`.
pub fn decode_push(body: &[u8]) -> Result<Option<LogMessage>, DecodeError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let push = push_payload(body)?;
    let encoded = match push.message.data.as_deref() {
        Some(data) if !data.is_empty() => data,
        _ => return Ok(None),
    };
    let data = STANDARD.decode(encoded).map_err(DecodeError::Base64)?;
    if data.is_empty() {
        return Ok(None);
    }

    Ok(Some(LogMessage {
        message_id: push.message.message_id,
        subscription: push.subscription,
        data,
    }))
}
