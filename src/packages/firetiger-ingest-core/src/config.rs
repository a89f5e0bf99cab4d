//! Destination resolution for the ingest server.
//!
//! Configuration is read once per invocation into an [`ExporterConfig`] and
//! handed to the forwarder as a resolved [`Destination`]. Nothing below the
//! handler looks at the environment.

use base64::{Engine, engine::general_purpose::STANDARD};

use crate::constants::env_vars;
use crate::error::{Error, Result};

/// Settings describing where, and as whom, payloads are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExporterConfig {
    pub endpoint: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// A fully resolved POST target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub url: String,
    pub authorization: Option<String>,
    pub user_agent: &'static str,
}

impl ExporterConfig {
    /// Reads the exporter settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the exporter settings through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let endpoint =
            read(env_vars::EXPORTER_ENDPOINT).ok_or(Error::Configuration(env_vars::EXPORTER_ENDPOINT))?;

        Ok(Self {
            endpoint,
            username: read(env_vars::BASIC_AUTH_USERNAME),
            password: read(env_vars::BASIC_AUTH_PASSWORD),
        })
    }

    /// Resolves the URL for `path` and the auth header for this configuration.
    pub fn destination(&self, path: &str, user_agent: &'static str) -> Destination {
        Destination {
            url: join_endpoint(&self.endpoint, path),
            authorization: self.authorization(),
            user_agent,
        }
    }

    /// `Basic <base64(username:password)>`, only when both halves are set.
    pub fn authorization(&self) -> Option<String> {
        let (username, password) = (self.username.as_deref()?, self.password.as_deref()?);
        let encoded = STANDARD.encode(format!("{username}:{password}"));
        Some(format!("Basic {encoded}"))
    }
}

fn join_endpoint(base: &str, path: &str) -> String {
    let base = base.strip_suffix('/').unwrap_or(base);
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}
