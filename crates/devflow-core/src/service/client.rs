use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::auth::AuthError;

/// Header that stops the service from redirecting to an interactive sign-in page.
pub const FED_AUTH_REDIRECT_HEADER: &str = "X-TFS-FedAuthRedirect";
const BASIC_USERNAME: &str = "PAT";

/// Client for account service calls authenticated with a bearer token.
#[derive(Clone)]
pub struct AccountServiceClient {
    http: Client,
    account_url: Url,
    auth_header: String,
}

impl fmt::Debug for AccountServiceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountServiceClient")
            .field("account_url", &self.account_url.as_str())
            .finish_non_exhaustive()
    }
}

impl AccountServiceClient {
    pub fn new(http: Client, account_url: Url, access_token: &str) -> Self {
        let credentials = STANDARD.encode(format!("{BASIC_USERNAME}:{access_token}"));
        Self {
            http,
            account_url,
            auth_header: format!("Basic {credentials}"),
        }
    }

    pub fn account_url(&self) -> &Url {
        &self.account_url
    }

    /// Resolve the stable id of the identity the token was issued to.
    pub async fn authenticated_user_id(&self) -> Result<String, AuthError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ConnectionData {
            authenticated_user: Option<Identity>,
        }

        #[derive(Deserialize)]
        struct Identity {
            id: Option<String>,
        }

        let url = self.account_url.join("_apis/connectionData")?;
        let data: ConnectionData = self.get_json(url.clone()).await?;
        let id = data
            .authenticated_user
            .and_then(|user| user.id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                AuthError::protocol(&url, "connection data missing authenticatedUser.id")
            })?;
        debug!(identity = %id, "resolved authenticated identity");
        Ok(id)
    }

    pub(crate) async fn get_json<R>(&self, url: Url) -> Result<R, AuthError>
    where
        R: DeserializeOwned,
    {
        let request = self.http.get(url.clone());
        self.send(Method::GET, url, request).await
    }

    pub(crate) async fn post_json<T, R>(&self, url: Url, body: &T) -> Result<R, AuthError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let request = self.http.post(url.clone()).json(body);
        self.send(Method::POST, url, request).await
    }

    async fn send<R>(
        &self,
        method: Method,
        url: Url,
        request: RequestBuilder,
    ) -> Result<R, AuthError>
    where
        R: DeserializeOwned,
    {
        debug!(%method, %url, "calling account service");
        let response = request
            .header("Authorization", &self.auth_header)
            .header(FED_AUTH_REDIRECT_HEADER, "Suppress")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::from_response(method, response).await);
        }

        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|err| AuthError::protocol(&url, format!("unparseable response: {err}")))
    }
}
