use reqwest::{Method, StatusCode};
use thiserror::Error;
use url::Url;

use crate::config::ConfigError;

/// Errors surfaced by the device flow and the token exchange that follows it.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unable to resolve tenant for {url}: {reason}")]
    TenantResolution { url: Url, reason: String },
    #[error("unexpected response from {url}: {reason}")]
    Protocol { url: Url, reason: String },
    #[error("device code expired before the user completed verification")]
    CodeExpired,
    #[error("device code was rejected by the identity provider")]
    InvalidCode,
    #[error("device flow cancelled")]
    Cancelled,
    #[error("operation called out of order: {0}")]
    Precondition(&'static str),
    #[error("{method} {url} returned {status}: {body}")]
    Endpoint {
        method: Method,
        url: Url,
        status: StatusCode,
        body: String,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl AuthError {
    pub(crate) fn protocol(url: &Url, reason: impl Into<String>) -> Self {
        AuthError::Protocol {
            url: url.clone(),
            reason: reason.into(),
        }
    }

    /// Read the body of a non-success response into an `Endpoint` error.
    pub(crate) async fn from_response(method: Method, response: reqwest::Response) -> Self {
        let status = response.status();
        let url = response.url().clone();
        let body = response.text().await.unwrap_or_default();
        AuthError::Endpoint {
            method,
            url,
            status,
            body,
        }
    }
}
