//! Nexus Mods registry client.
//!
//! Collection metadata comes from the GraphQL v2 API; per-file download
//! links from the v1 REST API. Every request goes through the shared
//! pacing gate and the retry layer, and every wait is cancellable.

mod graphql;
mod rate;
mod rest;

pub use graphql::{Collection, ModFileRef, Revision, RevisionDetails};
pub use rate::RateLimits;
pub use rest::DownloadLink;

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{Error, Result};
use rate::{RatePacer, RetryPolicy, BASE_DELAY, RAISED_DELAY};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use std::sync::{Arc, RwLock};
use std::time::Duration;

const GRAPHQL_ENDPOINT: &str = "https://api.nexusmods.com/v2/graphql";
const REST_API_BASE: &str = "https://api.nexusmods.com/v1";

/// Source of the API credential, consulted on every request so the hosting
/// surface can rotate keys without rebuilding the client.
pub trait CredentialProvider: Send + Sync {
    /// The current API key, if one is configured.
    fn api_key(&self) -> Option<String>;
}

/// Fixed credential.
pub struct StaticCredential(String);

impl StaticCredential {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self(api_key.into())
    }
}

impl CredentialProvider for StaticCredential {
    fn api_key(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Hot-swappable credential for runtime rotation.
#[derive(Default)]
pub struct SharedCredential {
    key: RwLock<Option<String>>,
}

impl SharedCredential {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            key: RwLock::new(Some(api_key.into())),
        }
    }

    pub fn replace(&self, api_key: impl Into<String>) {
        *self.key.write().unwrap() = Some(api_key.into());
    }
}

impl CredentialProvider for SharedCredential {
    fn api_key(&self) -> Option<String> {
        self.key.read().unwrap().clone()
    }
}

/// Authenticated Nexus Mods client.
pub struct NexusClient {
    http: reqwest::Client,
    credential: Arc<dyn CredentialProvider>,
    pacer: RatePacer,
    retry: RetryPolicy,
    graphql_endpoint: String,
    rest_base: String,
}

impl std::fmt::Debug for NexusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NexusClient")
            .field("graphql_endpoint", &self.graphql_endpoint)
            .field("rest_base", &self.rest_base)
            .finish_non_exhaustive()
    }
}

impl NexusClient {
    /// Build a client. Fails with `NotConfigured` when the provider has no
    /// credential at construction time.
    pub fn new(credential: Arc<dyn CredentialProvider>, config: &Config) -> Result<Self> {
        if credential.api_key().is_none() {
            return Err(Error::NotConfigured);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("modscope/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            credential,
            pacer: RatePacer::new(BASE_DELAY, RAISED_DELAY),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                initial: config.initial_backoff(),
                max: config.max_backoff(),
            },
            graphql_endpoint: GRAPHQL_ENDPOINT.to_string(),
            rest_base: REST_API_BASE.to_string(),
        })
    }

    /// Point the client at different upstream endpoints.
    #[cfg(test)]
    pub(crate) fn with_endpoints(mut self, graphql: String, rest: String) -> Self {
        self.graphql_endpoint = graphql;
        self.rest_base = rest;
        self
    }

    /// Owned copy of the most recently observed rate-limit headers.
    pub fn rate_limits(&self) -> Option<RateLimits> {
        self.pacer.limits()
    }

    pub(crate) fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn graphql_endpoint(&self) -> &str {
        &self.graphql_endpoint
    }

    pub(crate) fn rest_base(&self) -> &str {
        &self.rest_base
    }

    /// The credential for the next request. The key is attached as the
    /// `apikey` header and never logged.
    pub(crate) fn current_key(&self) -> Result<String> {
        self.credential.api_key().ok_or(Error::NotConfigured)
    }

    /// Send one paced, cancellable request and digest its rate headers.
    pub(crate) async fn send(
        &self,
        request: reqwest::RequestBuilder,
        cancel: &CancelToken,
    ) -> Result<reqwest::Response> {
        self.pacer.wait_turn(cancel).await?;
        let key = self.current_key()?;

        let response = tokio::select! {
            r = request.header("apikey", key).send() => r?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        self.pacer.observe(response.headers());
        Ok(response)
    }
}

/// Map a non-success upstream status onto the error taxonomy.
pub(crate) fn map_status(status: u16, what: &str) -> Error {
    match status {
        401 => Error::Unauthorized,
        404 => Error::NotFound(what.to_string()),
        429 => Error::RateLimited,
        500..=599 => Error::ServerError(status),
        other => Error::InvalidResponse(other),
    }
}
