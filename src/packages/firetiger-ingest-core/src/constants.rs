//! Constants shared by the ingestion functions.
//!
//! Keeping names, paths and defaults here means every function resolves the
//! destination the same way.

/// Environment variable names for configuration.
pub mod env_vars {
    /// Base URL of the Firetiger ingest server (required).
    pub const EXPORTER_ENDPOINT: &str = "FT_EXPORTER_ENDPOINT";

    /// Basic-auth username. Ignored unless the password is set too.
    pub const BASIC_AUTH_USERNAME: &str = "FT_EXPORTER_BASIC_AUTH_USERNAME";

    /// Basic-auth password. Ignored unless the username is set too.
    pub const BASIC_AUTH_PASSWORD: &str = "FT_EXPORTER_BASIC_AUTH_PASSWORD";

    /// Relay mode for the Cloud Logging ingester: `otlp` or `raw`.
    pub const RELAY_MODE: &str = "FT_RELAY_MODE";

    /// Whether to suppress per-entry success/failure logs while relaying.
    pub const SUPPRESS_FORWARD_LOGS: &str = "FT_SUPPRESS_FORWARD_LOGS";

    /// Listen port injected by Cloud Run.
    pub const PORT: &str = "PORT";
}

/// Paths appended to the configured endpoint.
pub mod paths {
    /// OTLP/HTTP logs signal.
    pub const OTLP_LOGS: &str = "v1/logs";

    /// Raw CloudWatch Logs subscription payloads.
    pub const AWS_CLOUDWATCH_LOGS: &str = "aws/cloudwatch/logs";

    /// Raw Cloud Logging `LogEntry` payloads.
    pub const GCP_CLOUD_LOGGING: &str = "gcp/cloud-logging/logs";
}

/// `User-Agent` values sent to the ingest server.
pub mod user_agents {
    pub const CLOUDWATCH_LAMBDA: &str = "Firetiger-CloudWatch-Lambda/1.0";
    pub const GCP_CLOUD_FUNCTION: &str = "Firetiger-GCP-CloudFunction/1.0";
}

/// Default values for configuration parameters.
pub mod defaults {
    use std::time::Duration;

    /// Upper bound for every outbound POST/PUT.
    pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

    /// Instrumentation scope name stamped on translated Cloud Logging records.
    pub const CLOUD_LOGGING_SCOPE: &str = "firetiger-gcp-cloud-logging";

    /// Listen port when `PORT` is unset.
    pub const PORT: u16 = 8080;
}
