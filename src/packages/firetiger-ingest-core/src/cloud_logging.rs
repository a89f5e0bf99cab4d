//! Translation of Cloud Logging `LogEntry` JSON into OTLP logs.
//!
//! The translation is pure: no I/O, no environment lookups, and it never
//! fails. Optional fields are described by extraction tables so that adding a
//! field is a one-line change. A field is emitted only when its source value
//! is present and non-empty; boolean fields are the exception and are emitted
//! whenever they are present, including `false`.

use chrono::{DateTime, Utc};
use opentelemetry::logs::Severity;
use serde_json::{Map, Value};

use crate::constants::defaults;
use crate::otlp::{
    AnyValue, InstrumentationScope, KeyValue, LogRecord, LogsData, Resource, ResourceLogs,
    ScopeLogs,
};

const DEFAULT_SEVERITY: &str = "DEFAULT";

/// How a source value becomes an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    /// Non-empty scalar, emitted as a string.
    Str,
    /// Non-zero number or decimal string, emitted as an int.
    Int,
    /// Any JSON boolean, `false` included.
    Bool,
    /// Emitted as `true` only when the source is truthy.
    Flag,
    /// A `"<seconds>s"` duration, emitted as milliseconds.
    DurationMs,
}

#[derive(Debug, Clone, Copy)]
struct FieldMapping {
    source: &'static str,
    key: &'static str,
    kind: FieldKind,
}

const fn field(source: &'static str, key: &'static str, kind: FieldKind) -> FieldMapping {
    FieldMapping { source, key, kind }
}

const ENTRY_FIELDS: &[FieldMapping] = &[
    field("logName", "gcp.log_name", FieldKind::Str),
    field("insertId", "gcp.insert_id", FieldKind::Str),
    field("trace", "gcp.trace", FieldKind::Str),
    field("spanId", "gcp.span_id", FieldKind::Str),
    field("traceSampled", "gcp.trace_sampled", FieldKind::Bool),
    field("receiveTimestamp", "gcp.receive_timestamp", FieldKind::Str),
];

const OPERATION_FIELDS: &[FieldMapping] = &[
    field("id", "gcp.operation.id", FieldKind::Str),
    field("producer", "gcp.operation.producer", FieldKind::Str),
    field("first", "gcp.operation.first", FieldKind::Flag),
    field("last", "gcp.operation.last", FieldKind::Flag),
];

const SOURCE_LOCATION_FIELDS: &[FieldMapping] = &[
    field("file", "code.filepath", FieldKind::Str),
    field("line", "code.lineno", FieldKind::Int),
    field("function", "code.function", FieldKind::Str),
];

const HTTP_REQUEST_FIELDS: &[FieldMapping] = &[
    field("requestMethod", "http.request.method", FieldKind::Str),
    field("requestUrl", "url.full", FieldKind::Str),
    field("status", "http.response.status_code", FieldKind::Int),
    field("userAgent", "user_agent.original", FieldKind::Str),
    field("remoteIp", "client.address", FieldKind::Str),
    field("serverIp", "server.address", FieldKind::Str),
    field("referer", "http.request.header.referer", FieldKind::Str),
    field("protocol", "network.protocol.name", FieldKind::Str),
    field("requestSize", "http.request.body.size", FieldKind::Int),
    field("responseSize", "http.response.body.size", FieldKind::Int),
    field("latency", "http.request.duration_ms", FieldKind::DurationMs),
    field("cacheLookup", "gcp.http.cache_lookup", FieldKind::Bool),
    field("cacheHit", "gcp.http.cache_hit", FieldKind::Bool),
    field(
        "cacheValidatedWithOriginServer",
        "gcp.http.cache_validated_with_origin_server",
        FieldKind::Bool,
    ),
    field("cacheFillBytes", "gcp.http.cache_fill_bytes", FieldKind::Int),
];

/// Wraps one translated entry in a complete OTLP/HTTP logs body.
pub fn log_entry_to_otlp(entry: &Value) -> LogsData {
    LogsData {
        resource_logs: vec![log_entry_to_resource_logs(entry)],
    }
}

/// Maps one Cloud Logging `LogEntry` to a `ResourceLogs` holding one record.
pub fn log_entry_to_resource_logs(entry: &Value) -> ResourceLogs {
    let severity_text = entry
        .get("severity")
        .filter(|value| !value.is_null())
        .map(scalar_to_string)
        .unwrap_or_else(|| DEFAULT_SEVERITY.to_string());

    let record = LogRecord {
        time_unix_nano: timestamp_nanos(entry.get("timestamp").and_then(Value::as_str)),
        severity_number: severity_number(&severity_text),
        severity_text,
        body: AnyValue::StringValue(body(entry)),
        attributes: record_attributes(entry),
    };

    ResourceLogs {
        resource: Resource {
            attributes: resource_attributes(entry),
        },
        scope_logs: vec![ScopeLogs {
            scope: InstrumentationScope {
                name: defaults::CLOUD_LOGGING_SCOPE.to_string(),
            },
            log_records: vec![record],
        }],
    }
}

/// OTLP severity number for a Cloud Logging `LogSeverity` name.
///
/// Unknown names map to 0, the same as `DEFAULT`.
pub fn severity_number(severity: &str) -> i32 {
    let number = match severity {
        "DEBUG" => Some(Severity::Debug),
        "INFO" => Some(Severity::Info),
        "NOTICE" => Some(Severity::Info2),
        "WARNING" => Some(Severity::Warn),
        "ERROR" => Some(Severity::Error),
        "CRITICAL" => Some(Severity::Fatal),
        "ALERT" => Some(Severity::Fatal2),
        "EMERGENCY" => Some(Severity::Fatal4),
        _ => None,
    };
    number.map_or(0, |severity| severity as i32)
}

/// Nanoseconds since the epoch for an RFC 3339 timestamp.
///
/// Offsets are applied, fractions beyond nine digits are truncated, and a
/// missing or unparseable timestamp falls back to the current time.
pub fn timestamp_nanos(timestamp: Option<&str>) -> u64 {
    timestamp
        .and_then(parse_rfc3339_nanos)
        .unwrap_or_else(now_nanos)
}

fn parse_rfc3339_nanos(raw: &str) -> Option<u64> {
    let parsed = DateTime::parse_from_rfc3339(raw.trim()).ok()?;
    u64::try_from(parsed.timestamp_nanos_opt()?).ok()
}

fn now_nanos() -> u64 {
    Utc::now()
        .timestamp_nanos_opt()
        .and_then(|nanos| u64::try_from(nanos).ok())
        .unwrap_or_default()
}

/// `textPayload`, else compact `jsonPayload`, else compact `protoPayload`.
fn body(entry: &Value) -> String {
    let present = |key: &str| entry.get(key).filter(|value| !value.is_null());

    if let Some(text) = present("textPayload") {
        return scalar_to_string(text);
    }
    present("jsonPayload")
        .or_else(|| present("protoPayload"))
        .map(Value::to_string)
        .unwrap_or_default()
}

fn record_attributes(entry: &Value) -> Vec<KeyValue> {
    let mut attributes = Vec::new();
    let resource = entry.get("resource");

    push_labels(&mut attributes, "gcp.label.", entry.get("labels"));
    push_labels(
        &mut attributes,
        "gcp.resource.label.",
        resource.and_then(|resource| resource.get("labels")),
    );
    if let Some(resource_type) = resource_type(entry) {
        attributes.push(KeyValue::new("gcp.resource.type", resource_type));
    }

    extract_fields(&mut attributes, Some(entry), ENTRY_FIELDS);
    extract_fields(&mut attributes, entry.get("operation"), OPERATION_FIELDS);
    extract_fields(&mut attributes, entry.get("sourceLocation"), SOURCE_LOCATION_FIELDS);
    extract_fields(&mut attributes, entry.get("httpRequest"), HTTP_REQUEST_FIELDS);

    attributes
}

fn resource_attributes(entry: &Value) -> Vec<KeyValue> {
    let has_http_request = entry.get("httpRequest").is_some_and(is_truthy);
    let log_name = entry.get("logName").and_then(Value::as_str);

    let mut attributes = vec![
        KeyValue::new("service.name", service_name(log_name, has_http_request)),
        KeyValue::new("cloud.provider", "gcp"),
    ];

    let project_id = entry
        .pointer("/resource/labels/project_id")
        .filter(|value| is_truthy(value));
    if let Some(project_id) = project_id {
        attributes.push(KeyValue::new("cloud.account.id", scalar_to_string(project_id)));
    }
    if let Some(resource_type) = resource_type(entry) {
        attributes.push(KeyValue::new("gcp.resource_type", resource_type));
    }

    attributes
}

/// `gcp/<unescaped log name>`, suffixed with `/http-requests` for request logs.
fn service_name(log_name: Option<&str>, has_http_request: bool) -> String {
    let decoded = log_name
        .map(|name| String::from_utf8_lossy(&urlencoding::decode_binary(name.as_bytes())).into_owned())
        .unwrap_or_default();
    let decoded = decoded.trim_matches('/');

    match (decoded.is_empty(), has_http_request) {
        (true, _) => "gcp".to_string(),
        (false, true) => format!("gcp/{decoded}/http-requests"),
        (false, false) => format!("gcp/{decoded}"),
    }
}

fn resource_type(entry: &Value) -> Option<String> {
    entry
        .pointer("/resource/type")
        .filter(|value| is_truthy(value))
        .map(scalar_to_string)
}

fn push_labels(attributes: &mut Vec<KeyValue>, prefix: &str, labels: Option<&Value>) {
    let Some(labels) = labels.and_then(Value::as_object) else {
        return;
    };
    for (key, value) in labels.iter().filter(|(_, value)| is_truthy(value)) {
        attributes.push(KeyValue::new(format!("{prefix}{key}"), scalar_to_string(value)));
    }
}

fn extract_fields(attributes: &mut Vec<KeyValue>, source: Option<&Value>, table: &[FieldMapping]) {
    let Some(object) = source.filter(|value| is_truthy(value)).and_then(Value::as_object) else {
        return;
    };
    attributes.extend(table.iter().filter_map(|mapping| {
        let value = convert(object, mapping)?;
        Some(KeyValue::new(mapping.key, value))
    }));
}

fn convert(object: &Map<String, Value>, mapping: &FieldMapping) -> Option<AnyValue> {
    let value = object.get(mapping.source)?;
    match mapping.kind {
        FieldKind::Str => is_truthy(value).then(|| AnyValue::StringValue(scalar_to_string(value))),
        FieldKind::Int => is_truthy(value).then(|| as_i64(value)).flatten().map(AnyValue::IntValue),
        FieldKind::Bool => value.as_bool().map(AnyValue::BoolValue),
        FieldKind::Flag => is_truthy(value).then_some(AnyValue::BoolValue(true)),
        FieldKind::DurationMs => value
            .as_str()
            .and_then(duration_ms)
            .map(AnyValue::DoubleValue),
    }
}

/// Milliseconds for a protobuf JSON duration such as `"0.25s"`.
fn duration_ms(raw: &str) -> Option<f64> {
    let seconds = raw.strip_suffix('s').unwrap_or(raw);
    let seconds: f64 = seconds.trim().parse().ok()?;
    seconds.is_finite().then_some(seconds * 1000.0)
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|float| float != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}
