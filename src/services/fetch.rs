//! Fetch collaborator.
//!
//! The engine only needs `fetch(url) -> bytes | FetchError`. [`HttpFetcher`]
//! is the default implementation; tests supply their own.

use crate::models::FetchError;
use std::future::Future;
use std::time::Duration;
use tracing::field::Empty;
use tracing::instrument;

/// Default `User-Agent` sent with image requests.
pub const DEFAULT_USER_AGENT: &str = concat!("imgdedup/", env!("CARGO_PKG_VERSION"));

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Retrieves the bytes behind a locator.
///
/// Implementations must not retry; retry policy belongs to the caller.
pub trait Fetcher {
    /// Fetches `url` and returns the full body.
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>>;
}

/// HTTP client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Whole-request timeout. Zero disables it.
    pub timeout: Duration,
    /// Connect timeout. Zero disables it.
    pub connect_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// [`Fetcher`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(&HttpSettings::default())
    }
}

impl HttpFetcher {
    /// Builds a fetcher with the given settings.
    ///
    /// Falls back to a default client if the builder rejects the settings.
    #[must_use]
    pub fn new(settings: &HttpSettings) -> Self {
        let mut builder = reqwest::Client::builder().user_agent(settings.user_agent.clone());
        if !settings.timeout.is_zero() {
            builder = builder.timeout(settings.timeout);
        }
        if !settings.connect_timeout.is_zero() {
            builder = builder.connect_timeout(settings.connect_timeout);
        }

        let client = builder.build().unwrap_or_else(|err| {
            tracing::warn!("Failed to build HTTP client: {err}");
            reqwest::Client::new()
        });
        Self { client }
    }
}

impl Fetcher for HttpFetcher {
    #[instrument(skip(self), fields(status = Empty, size = Empty))]
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await.map_err(classify)?;
        let status = response.status();
        tracing::Span::current().record("status", status.as_u16());
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(classify)?;
        tracing::Span::current().record("size", body.len());
        Ok(body.to_vec())
    }
}

#[allow(clippy::needless_pass_by_value)]
fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if err.is_builder() {
        FetchError::InvalidUrl(err.to_string())
    } else if let Some(status) = err.status() {
        FetchError::Status(status.as_u16())
    } else {
        FetchError::Transport(err.to_string())
    }
}
