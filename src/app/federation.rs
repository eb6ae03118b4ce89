//! Fetches OIDC federation tokens from a CI runner's token endpoint.
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::backoff::ExponentialBackoffStrategy;
use super::mask::mask_secret;

pub const REQUEST_URL_ENV: &str = "ACTIONS_ID_TOKEN_REQUEST_URL";
pub const REQUEST_TOKEN_ENV: &str = "ACTIONS_ID_TOKEN_REQUEST_TOKEN";
pub const DEFAULT_AUDIENCE: &str = "sts.amazonaws.com";

#[derive(Error, Debug)]
pub enum FederationError {
    #[error(
        "{name} is not set. It is provided by the CI runner when OIDC token issuance is enabled for the job."
    )]
    MissingEnv { name: &'static str },

    #[error("{name} is not a valid URL: {source}")]
    InvalidRequestUrl {
        name: &'static str,
        source: url::ParseError,
    },

    #[error("Failed to request a federation token: {source}")]
    Request { source: reqwest::Error },

    #[error("Federation token endpoint responded with HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Federation token endpoint returned a malformed body: {source}")]
    MalformedBody { source: serde_json::Error },

    #[error("Federation token endpoint returned an empty token")]
    EmptyToken,
}

impl FederationError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            FederationError::Request { .. } | FederationError::Status { .. }
        )
    }
}

/// Bounds on how hard the federation token fetch is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_wait: Duration::from_secs(2),
            max_wait: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FederationTokenResponse {
    value: String,
}

/// Where and how to ask for a federation token. Built from the environment
/// before any network call is made.
#[derive(Debug, Clone)]
pub struct FederationSource {
    request_url: Url,
    request_token: String,
    retry: RetryPolicy,
}

impl FederationSource {
    pub fn new(
        request_url: Url,
        request_token: String,
        audience: &str,
        retry: RetryPolicy,
    ) -> Self {
        let mut request_url = request_url;
        request_url.query_pairs_mut().append_pair("audience", audience);
        Self {
            request_url,
            request_token,
            retry,
        }
    }

    pub fn from_env(audience: &str, retry: RetryPolicy) -> Result<Self, FederationError> {
        Self::from_lookup(|name| std::env::var(name).ok(), audience, retry)
    }

    /// Like [`FederationSource::from_env`] with an injectable variable lookup.
    pub fn from_lookup<F>(
        lookup: F,
        audience: &str,
        retry: RetryPolicy,
    ) -> Result<Self, FederationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or(FederationError::MissingEnv { name })
        };

        let request_url = required(REQUEST_URL_ENV)?;
        let request_token = required(REQUEST_TOKEN_ENV)?;
        let request_url = Url::parse(&request_url).map_err(|source| {
            FederationError::InvalidRequestUrl {
                name: REQUEST_URL_ENV,
                source,
            }
        })?;

        Ok(Self::new(request_url, request_token, audience, retry))
    }

    async fn fetch_once(&self, client: &reqwest::Client) -> Result<String, FederationError> {
        let response = client
            .get(self.request_url.clone())
            .bearer_auth(&self.request_token)
            .send()
            .await
            .map_err(|source| FederationError::Request { source })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| FederationError::Request { source })?;

        if !status.is_success() {
            return Err(FederationError::Status { status, body });
        }

        let parsed: FederationTokenResponse = serde_json::from_str(&body)
            .map_err(|source| FederationError::MalformedBody { source })?;
        if parsed.value.is_empty() {
            return Err(FederationError::EmptyToken);
        }
        Ok(parsed.value)
    }

    /// Fetches the federation token, retrying transport failures and non-2xx
    /// responses with exponential backoff up to the configured attempt cap.
    pub async fn fetch_token(&self, client: &reqwest::Client) -> Result<String, FederationError> {
        let attempts = self.retry.attempts.max(1);
        let mut backoff =
            ExponentialBackoffStrategy::new(self.retry.initial_wait, self.retry.max_wait);

        let mut attempt = 1;
        loop {
            match self.fetch_once(client).await {
                Ok(token) => {
                    debug!(
                        attempt,
                        token = %mask_secret(&token),
                        "obtained federation token"
                    );
                    return Ok(token);
                }
                Err(err) if err.is_retryable() && attempt < attempts => {
                    warn!(
                        attempt,
                        attempts,
                        error = %err,
                        "federation token request failed, retrying"
                    );
                    backoff.wait().await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
