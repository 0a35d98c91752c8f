use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;
use url::Url;

use super::tenant::is_consumer_tenant;
use super::AuthError;
use crate::config::{ensure_trailing_slash, AuthConfig};

pub const DEFAULT_LOGIN_URL: &str = "https://login.microsoftonline.com/";
const CONSUMER_SEGMENT: &str = "common";

/// Identity-provider endpoints used for device-code issuance and polling.
#[derive(Debug, Clone)]
pub struct AuthorityEndpoints {
    login_url: Url,
}

impl Default for AuthorityEndpoints {
    fn default() -> Self {
        Self::new(Url::parse(DEFAULT_LOGIN_URL).expect("valid login URL"))
    }
}

impl AuthorityEndpoints {
    pub fn new(mut login_url: Url) -> Self {
        ensure_trailing_slash(&mut login_url);
        Self { login_url }
    }

    pub fn login_url(&self) -> &Url {
        &self.login_url
    }

    pub fn device_code_url(&self, tenant: &str) -> Result<Url, AuthError> {
        Ok(self
            .login_url
            .join(&format!("{}/oauth2/devicecode", tenant_segment(tenant)))?)
    }

    pub fn token_url(&self, tenant: &str) -> Result<Url, AuthError> {
        Ok(self
            .login_url
            .join(&format!("{}/oauth2/token", tenant_segment(tenant)))?)
    }
}

fn tenant_segment(tenant: &str) -> &str {
    if is_consumer_tenant(tenant) {
        CONSUMER_SEGMENT
    } else {
        tenant.trim()
    }
}

/// Instructions handed to the user so they can complete verification elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceFlowDetails {
    pub message: String,
    pub user_code: String,
    pub verification_url: String,
}

/// Device-code grant as issued by the identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeResponse {
    pub user_code: String,
    pub device_code: String,
    pub verification_url: String,
    #[serde(deserialize_with = "seconds")]
    pub expires_in: u64,
    #[serde(deserialize_with = "seconds")]
    pub interval: u64,
    pub message: String,
}

impl DeviceCodeResponse {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn expires_in(&self) -> Duration {
        Duration::from_secs(self.expires_in)
    }

    pub fn details(&self) -> DeviceFlowDetails {
        DeviceFlowDetails {
            message: self.message.clone(),
            user_code: self.user_code.clone(),
            verification_url: self.verification_url.clone(),
        }
    }
}

// Some authorities send these as numeric strings.
fn seconds<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(u64),
        Text(String),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Number(value) => Ok(value),
        Seconds::Text(value) => value.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Result of a single token poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    BackOff,
    BadCode,
    Expired,
    AccessToken(String),
}

#[derive(Debug, Deserialize)]
struct TokenSuccess {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error_codes: Option<serde_json::Value>,
}

/// Map a token-endpoint response onto a poll outcome.
///
/// Only a 400 carrying one of the four device-flow error codes is a protocol
/// signal; anything else that is not a success is a transport failure.
pub fn classify_poll_response(
    url: &Url,
    status: StatusCode,
    body: &str,
) -> Result<PollOutcome, AuthError> {
    if status.is_success() {
        let payload: TokenSuccess = serde_json::from_str(body)
            .map_err(|err| AuthError::protocol(url, format!("unparseable token response: {err}")))?;
        return payload
            .access_token
            .filter(|token| !token.is_empty())
            .map(PollOutcome::AccessToken)
            .ok_or_else(|| AuthError::protocol(url, "token response missing access_token"));
    }

    let transport_failure = || AuthError::Endpoint {
        method: Method::POST,
        url: url.clone(),
        status,
        body: body.to_owned(),
    };

    if status != StatusCode::BAD_REQUEST {
        return Err(transport_failure());
    }
    let Ok(payload) = serde_json::from_str::<TokenErrorResponse>(body) else {
        return Err(transport_failure());
    };

    match payload.error.as_str() {
        "authorization_pending" => Ok(PollOutcome::Pending),
        "slow_down" => Ok(PollOutcome::BackOff),
        "bad_verification_code" => Ok(PollOutcome::BadCode),
        "code_expired" => Ok(PollOutcome::Expired),
        other => {
            debug!(
                error = other,
                description = payload.error_description.as_deref().unwrap_or_default(),
                codes = ?payload.error_codes,
                "unrecognised token poll error"
            );
            Err(transport_failure())
        }
    }
}

pub(crate) fn build_http_client(config: &AuthConfig) -> Result<Client, AuthError> {
    Ok(Client::builder()
        .user_agent(config.user_agent())
        .redirect(reqwest::redirect::Policy::none())
        .build()?)
}

/// Talks to the identity provider on behalf of one client registration.
#[derive(Debug, Clone)]
pub struct AuthorityClient {
    http: Client,
    config: AuthConfig,
    endpoints: AuthorityEndpoints,
}

impl AuthorityClient {
    pub fn new(http: Client, config: AuthConfig, endpoints: AuthorityEndpoints) -> Self {
        Self {
            http,
            config,
            endpoints,
        }
    }

    pub fn endpoints(&self) -> &AuthorityEndpoints {
        &self.endpoints
    }

    /// Ask the tenant's authority for a new device code.
    pub async fn request_device_code(&self, tenant: &str) -> Result<DeviceCodeResponse, AuthError> {
        let url = self.endpoints.device_code_url(tenant)?;
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("resource", self.config.authority_host()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];

        debug!(%url, "requesting device code");
        let response = self.http.post(url.clone()).form(&form).send().await?;
        if !response.status().is_success() {
            return Err(AuthError::from_response(Method::POST, response).await);
        }

        let body = response.text().await?;
        let grant: DeviceCodeResponse = serde_json::from_str(&body).map_err(|err| {
            AuthError::protocol(&url, format!("unparseable device code response: {err}"))
        })?;
        debug!(
            user_code = %grant.user_code,
            expires_in = grant.expires_in,
            interval = grant.interval,
            "device code issued"
        );
        Ok(grant)
    }

    /// Issue one token request for a device code and classify the answer.
    pub async fn poll_token(
        &self,
        tenant: &str,
        device_code: &str,
        grant_type: &str,
    ) -> Result<PollOutcome, AuthError> {
        let url = self.endpoints.token_url(tenant)?;
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("code", device_code),
            ("grant_type", grant_type),
        ];

        let response = self.http.post(url.clone()).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        classify_poll_response(&url, status, &body)
    }
}
