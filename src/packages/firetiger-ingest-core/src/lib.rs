//! Shared building blocks for the Firetiger log ingestion functions.
//!
//! Every function in this workspace is a stateless adapter: it unwraps a
//! platform event, optionally translates the payload, and POSTs it to the
//! Firetiger ingest server. This crate holds the pieces those adapters share:
//!
//! - [`config`]: resolves the destination URL and basic-auth header from an
//!   explicit [`ExporterConfig`]
//! - [`forwarder`]: the instrumented HTTP client that delivers payloads and
//!   classifies the response
//! - [`cloud_logging`]: translation of Cloud Logging `LogEntry` JSON into OTLP
//! - [`otlp`]: the OTLP/JSON logs data model
//! - [`error`]: the error taxonomy shared by all of the above

pub mod cloud_logging;
pub mod config;
pub mod constants;
pub mod error;
pub mod forwarder;
pub mod otlp;

pub use config::{Destination, ExporterConfig};
pub use error::{Error, Result};
pub use forwarder::Forwarder;
