//! Outbound POST to the ingest server.
//!
//! The forwarder never retries. A failed POST is returned to the caller, whose
//! platform decides whether the invocation is replayed.

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_tracing::TracingMiddleware;

use crate::config::Destination;
use crate::constants::defaults;
use crate::error::{Error, Result};

/// Statuses the ingest server uses to acknowledge a payload.
const ACCEPTED_STATUSES: [StatusCode; 2] = [StatusCode::OK, StatusCode::ACCEPTED];

/// HTTP client for delivering payloads, instrumented with `reqwest-tracing`.
#[derive(Clone, Debug)]
pub struct Forwarder {
    client: ClientWithMiddleware,
}

impl Forwarder {
    /// Builds a forwarder whose requests time out after 30 seconds.
    pub fn new() -> Result<Self> {
        let base_client = reqwest::Client::builder()
            .timeout(defaults::HTTP_TIMEOUT)
            .build()
            .map_err(Error::HttpClient)?;
        let client = ClientBuilder::new(base_client)
            .with(TracingMiddleware::default())
            .build();
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: ClientWithMiddleware) -> Self {
        Self { client }
    }

    /// The underlying client, for callers that need verbs other than POST.
    pub fn client(&self) -> &ClientWithMiddleware {
        &self.client
    }

    /// POSTs `body` as JSON to `destination`.
    ///
    /// Returns the acknowledging status (200 or 202). Any other status is a
    /// [`Error::RemoteRejection`] carrying the response body.
    pub async fn forward(&self, destination: &Destination, body: Vec<u8>) -> Result<StatusCode> {
        let mut request = self
            .client
            .post(&destination.url)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, destination.user_agent)
            .body(body);

        if let Some(authorization) = &destination.authorization {
            request = request.header(AUTHORIZATION, authorization);
        }

        let response = request.send().await?;
        let status = response.status();
        if ACCEPTED_STATUSES.contains(&status) {
            return Ok(status);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|err| format!("<unreadable response body: {err}>"));
        Err(Error::RemoteRejection {
            status: status.as_u16(),
            body,
        })
    }
}
