//! Shared HTTP client construction and the credentials policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Whether the client sends stored cookies with the outbound call.
///
/// Modeled as cookie-jar behavior: `Omit` disables the jar entirely;
/// `SameOrigin` and `Include` enable it. The backend is expected to live on
/// the same host, so `SameOrigin` is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialsPolicy {
    Omit,
    #[default]
    SameOrigin,
    Include,
}

impl CredentialsPolicy {
    #[must_use]
    pub fn cookie_store_enabled(self) -> bool {
        !matches!(self, CredentialsPolicy::Omit)
    }
}

/// Knobs for the shared `reqwest` client; one client per adapter, reused
/// across runs.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Option<Duration>,
    pub credentials: CredentialsPolicy,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            pool_max_idle_per_host: 16,
            pool_idle_timeout: Some(Duration::from_secs(15)),
            credentials: CredentialsPolicy::default(),
        }
    }
}

/// Build the shared HTTP client.
///
/// No total request timeout is set: a streaming response stays open for as
/// long as the model generates, and run timeouts are expressed as an
/// external timer cancelling the run's token instead.
pub fn build_client(options: &TransportOptions) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(options.pool_max_idle_per_host)
        .pool_idle_timeout(options.pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(options.connect_timeout)
        .redirect(reqwest::redirect::Policy::none())
        .cookie_store(options.credentials.cookie_store_enabled())
        .build()
}
