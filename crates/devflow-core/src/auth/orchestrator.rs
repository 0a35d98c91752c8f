use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;

use super::oauth::{build_http_client, AuthorityClient, AuthorityEndpoints, PollOutcome};
use super::session::{CancelHandle, DeviceFlowSession, FlowState};
use super::tenant::resolve_tenant;
use super::{AuthError, DeviceFlowDetails};
use crate::config::{normalize_account_url, AuthConfig, TokenConfig};
use crate::service::{AccountServiceClient, SessionTokenService};

/// Drives one device flow from tenant discovery to a minted access token.
///
/// A manager is single-owner and single-flow; only its [`CancelHandle`] is
/// meant to be shared with other tasks.
pub struct DeviceFlowManager {
    http: Client,
    account_url: Url,
    authority: AuthorityClient,
    token: TokenConfig,
    tenant: Option<String>,
    session: DeviceFlowSession,
    state: FlowState,
    cancel: CancelHandle,
}

impl DeviceFlowManager {
    pub fn new(account_url: &str, auth: AuthConfig, token: TokenConfig) -> Result<Self, AuthError> {
        Self::with_endpoints(account_url, auth, token, AuthorityEndpoints::default())
    }

    /// Build a manager that talks to a non-default identity provider.
    pub fn with_endpoints(
        account_url: &str,
        auth: AuthConfig,
        token: TokenConfig,
        endpoints: AuthorityEndpoints,
    ) -> Result<Self, AuthError> {
        auth.validate()?;
        let account_url = normalize_account_url(account_url)?;
        let http = build_http_client(&auth)?;
        Ok(Self {
            authority: AuthorityClient::new(http.clone(), auth, endpoints),
            http,
            account_url,
            token,
            tenant: None,
            session: DeviceFlowSession::default(),
            state: FlowState::Created,
            cancel: CancelHandle::default(),
        })
    }

    pub fn account_url(&self) -> &Url {
        &self.account_url
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn session(&self) -> &DeviceFlowSession {
        &self.session
    }

    /// Tenant resolved by the first call to [`Self::get_device_flow_details`].
    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Stop the wait loop at its next checkpoint.
    pub fn cancel(&self, throw_on_cancel: bool) {
        self.cancel.cancel(throw_on_cancel);
    }

    /// Resolve the tenant and obtain a device code for the user to verify.
    ///
    /// Calling this again issues a fresh device code and abandons the previous one.
    pub async fn get_device_flow_details(&mut self) -> Result<DeviceFlowDetails, AuthError> {
        if self.session.has_device_code() {
            warn!("re-issuing device code; the previous code is abandoned");
        }

        let tenant = match &self.tenant {
            Some(tenant) => tenant.clone(),
            None => {
                let tenant = resolve_tenant(&self.http, &self.account_url).await?;
                self.tenant = Some(tenant.clone());
                tenant
            }
        };

        let grant = self.authority.request_device_code(&tenant).await?;
        self.session.start(&grant);
        self.state = FlowState::AwaitingVerification;
        info!(
            account = %self.account_url,
            expires_in = ?self.session.expires_in(),
            "device code issued; waiting for user verification"
        );
        Ok(grant.details())
    }

    /// Poll until the user verifies, then exchange the bearer token for a
    /// personal access token.
    ///
    /// Returns `Ok(None)` when the flow was cancelled without requesting an error.
    pub async fn wait_for_personal_access_token(&mut self) -> Result<Option<String>, AuthError> {
        self.wait_for_personal_access_token_with(tokio::time::sleep)
            .await
    }

    /// Same as [`Self::wait_for_personal_access_token`], sleeping between polls
    /// with the supplied function.
    pub async fn wait_for_personal_access_token_with<S, Fut>(
        &mut self,
        sleep: S,
    ) -> Result<Option<String>, AuthError>
    where
        S: FnMut(Duration) -> Fut,
        Fut: Future<Output = ()>,
    {
        if self.state != FlowState::AwaitingVerification {
            return Err(AuthError::Precondition(
                "get_device_flow_details must succeed before waiting for a token",
            ));
        }
        let (Some(tenant), Some(device_code)) = (
            self.tenant.clone(),
            self.session.device_code().map(str::to_owned),
        ) else {
            return Err(AuthError::Precondition("no device code has been issued"));
        };

        let result = self.run_flow(&tenant, &device_code, sleep).await;
        self.state = match &result {
            Ok(Some(_)) => FlowState::Completed,
            Ok(None) | Err(AuthError::Cancelled) => FlowState::Canceled,
            Err(_) => FlowState::Failed,
        };
        result
    }

    async fn run_flow<S, Fut>(
        &mut self,
        tenant: &str,
        device_code: &str,
        sleep: S,
    ) -> Result<Option<String>, AuthError>
    where
        S: FnMut(Duration) -> Fut,
        Fut: Future<Output = ()>,
    {
        let Some(access_token) = self.poll_for_access_token(tenant, device_code, sleep).await?
        else {
            warn!("device flow cancelled");
            return if self.cancel.throws() {
                Err(AuthError::Cancelled)
            } else {
                Ok(None)
            };
        };
        info!("user verified; exchanging bearer token");

        let client =
            AccountServiceClient::new(self.http.clone(), self.account_url.clone(), &access_token);
        let identity = client.authenticated_user_id().await?;
        let token = SessionTokenService::new(client)
            .mint(&identity, &self.token)
            .await?;
        Ok(Some(token))
    }

    /// Poll until the authority hands out a bearer token; `None` means cancelled.
    async fn poll_for_access_token<S, Fut>(
        &mut self,
        tenant: &str,
        device_code: &str,
        mut sleep: S,
    ) -> Result<Option<String>, AuthError>
    where
        S: FnMut(Duration) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut attempt: u32 = 1;
        let mut outcome = self
            .authority
            .poll_token(tenant, device_code, &self.token.grant_type)
            .await?;

        loop {
            let interval = match outcome {
                PollOutcome::AccessToken(token) => return Ok(Some(token)),
                PollOutcome::Expired => return Err(AuthError::CodeExpired),
                PollOutcome::BadCode => return Err(AuthError::InvalidCode),
                PollOutcome::Pending => self.session.interval(),
                PollOutcome::BackOff => self.session.back_off(),
            };
            debug!(attempt, ?outcome, ?interval, "device flow not settled");

            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            sleep(interval).await;
            if self.cancel.is_cancelled() {
                return Ok(None);
            }

            attempt += 1;
            outcome = self
                .authority
                .poll_token(tenant, device_code, &self.token.grant_type)
                .await?;
        }
    }
}
