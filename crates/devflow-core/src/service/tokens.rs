use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use super::AccountServiceClient;
use crate::auth::AuthError;
use crate::config::{ensure_trailing_slash, TokenConfig};

/// Service definition id of the token-issuing location service.
pub const LOCATION_SERVICE_ID: &str = "951917AC-A960-4999-8464-E3F0AA25B381";

/// Mints account-scoped session tokens for a resolved identity.
#[derive(Debug, Clone)]
pub struct SessionTokenService {
    client: AccountServiceClient,
}

impl SessionTokenService {
    pub fn new(client: AccountServiceClient) -> Self {
        Self { client }
    }

    /// Look up the base URL of the service that issues tokens for this account.
    pub async fn token_service_url(&self) -> Result<Url, AuthError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ServiceDefinition {
            #[serde(default)]
            location_mappings: Vec<LocationMapping>,
        }

        #[derive(Deserialize)]
        struct LocationMapping {
            location: Option<String>,
        }

        let mut url = self.client.account_url().join(&format!(
            "_apis/ServiceDefinitions/LocationService2/{LOCATION_SERVICE_ID}"
        ))?;
        url.query_pairs_mut().append_pair("api-version", "1.0");

        let definition: ServiceDefinition = self.client.get_json(url.clone()).await?;
        let location = definition
            .location_mappings
            .into_iter()
            .next()
            .and_then(|mapping| mapping.location)
            .filter(|location| !location.trim().is_empty())
            .ok_or_else(|| AuthError::protocol(&url, "missing locationMappings[0].location"))?;

        let mut base = Url::parse(location.trim()).map_err(|err| {
            AuthError::protocol(&url, format!("invalid token service location: {err}"))
        })?;
        ensure_trailing_slash(&mut base);
        debug!(location = %base, "resolved token service");
        Ok(base)
    }

    /// Create a named, unbounded session token for `identity_id`.
    pub async fn mint(&self, identity_id: &str, config: &TokenConfig) -> Result<String, AuthError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct SessionTokenRequest<'a> {
            scope: &'a str,
            target_accounts: [&'a str; 1],
            display_name: &'a str,
        }

        #[derive(Deserialize)]
        struct SessionTokenResponse {
            token: Option<String>,
        }

        let base = self.token_service_url().await?;
        let mut url = base.join("_apis/token/sessiontokens")?;
        url.query_pairs_mut()
            .append_pair("api-version", "1.0")
            .append_pair("tokentype", "compact");

        let request = SessionTokenRequest {
            scope: &config.scope,
            target_accounts: [identity_id],
            display_name: &config.description,
        };
        let response: SessionTokenResponse = self.client.post_json(url.clone(), &request).await?;
        let token = response
            .token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AuthError::protocol(&url, "session token response missing token"))?;

        info!(name = %config.description, "minted personal access token");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use reqwest::Client;

    fn service(server: &MockServer) -> SessionTokenService {
        let account = Url::parse(&server.url("/org/")).unwrap();
        SessionTokenService::new(AccountServiceClient::new(Client::new(), account, "tok"))
    }

    fn location_path() -> String {
        format!("/org/_apis/ServiceDefinitions/LocationService2/{LOCATION_SERVICE_ID}")
    }

    #[tokio::test]
    async fn mint_posts_scoped_request() {
        let server = MockServer::start();
        let location = server.mock(|when, then| {
            when.method(GET)
                .path(location_path())
                .query_param("api-version", "1.0")
                .header("authorization", "Basic UEFUOnRvaw==");
            then.status(200).json_body_obj(&serde_json::json!({
                "serviceType": "LocationService2",
                "locationMappings": [
                    {
                        "accessMappingMoniker": "HostGuidAccessMapping",
                        "location": server.url("/vssps")
                    }
                ]
            }));
        });
        let mint = server.mock(|when, then| {
            when.method(POST)
                .path("/vssps/_apis/token/sessiontokens")
                .query_param("tokentype", "compact")
                .header("x-tfs-fedauthredirect", "Suppress")
                .json_body_obj(&serde_json::json!({
                    "scope": "vso.code",
                    "targetAccounts": ["user-1"],
                    "displayName": "ci agent"
                }));
            then.status(200).json_body_obj(&serde_json::json!({
                "displayName": "ci agent",
                "token": "minted-pat"
            }));
        });

        let config = TokenConfig::default()
            .with_scope("vso.code")
            .with_description("ci agent");
        let token = service(&server).mint("user-1", &config).await.unwrap();
        location.assert();
        mint.assert();
        assert_eq!(token, "minted-pat");
    }

    #[tokio::test]
    async fn missing_location_is_protocol_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(location_path());
            then.status(200)
                .json_body_obj(&serde_json::json!({ "locationMappings": [] }));
        });

        let err = service(&server).token_service_url().await.unwrap_err();
        assert!(matches!(err, AuthError::Protocol { .. }));
    }

    #[tokio::test]
    async fn missing_token_is_protocol_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(location_path());
            then.status(200).json_body_obj(&serde_json::json!({
                "locationMappings": [ { "location": server.url("/vssps/") } ]
            }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/vssps/_apis/token/sessiontokens");
            then.status(200)
                .json_body_obj(&serde_json::json!({ "displayName": "x" }));
        });

        let err = service(&server)
            .mint("user-1", &TokenConfig::default())
            .await
            .unwrap_err();
        match err {
            AuthError::Protocol { reason, .. } => assert!(reason.contains("token")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
