use thiserror::Error;

/// Failures surfaced by configuration resolution and forwarding.
///
/// `Transport` and `RemoteRejection` are kept apart so callers can tell an
/// unreachable destination from one that answered and refused the payload.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} environment variable is required")]
    Configuration(&'static str),

    #[error("failed to build HTTP client")]
    HttpClient(#[source] reqwest::Error),

    #[error("failed to reach destination")]
    Transport(#[from] reqwest_middleware::Error),

    #[error("destination returned status {status}: {body}")]
    RemoteRejection { status: u16, body: String },
}

impl Error {
    /// True when the destination answered with a non-success status.
    pub fn is_remote_rejection(&self) -> bool {
        matches!(self, Error::RemoteRejection { .. })
    }

    /// True for DNS, connection and timeout failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
