use reqwest::Client;
use tracing::debug;
use url::Url;

use super::AuthError;

/// Response header listing the tenants that govern an account.
pub const TENANT_HEADER: &str = "X-VSS-ResourceTenant";
/// Tenant reported for accounts backed by consumer identities.
pub const NO_TENANT: &str = "00000000-0000-0000-0000-000000000000";

/// Whether device-flow requests for this tenant go through the consumer endpoints.
pub fn is_consumer_tenant(tenant: &str) -> bool {
    let tenant = tenant.trim();
    tenant.is_empty() || tenant == NO_TENANT
}

/// Send a HEAD request to the account endpoint and read the tenant it belongs to.
///
/// The header is present on success and on redirect/error responses alike, so
/// the status code is ignored. A request that yields no response at all is a
/// resolution failure.
pub async fn resolve_tenant(http: &Client, account_url: &Url) -> Result<String, AuthError> {
    let failure = |reason: String| AuthError::TenantResolution {
        url: account_url.clone(),
        reason,
    };

    let response = http
        .head(account_url.clone())
        .send()
        .await
        .map_err(|err| failure(format!("tenant lookup request failed: {err}")))?;

    let status = response.status();
    let raw = response
        .headers()
        .get(TENANT_HEADER)
        .ok_or_else(|| failure(format!("{TENANT_HEADER} header missing (HTTP {status})")))?
        .to_str()
        .map_err(|_| failure(format!("{TENANT_HEADER} header is not valid text")))?;

    let tenant =
        select_tenant(raw).ok_or_else(|| failure(format!("{TENANT_HEADER} header is empty")))?;
    debug!(%status, %tenant, "resolved account tenant");
    Ok(tenant)
}

/// Pick the governing tenant out of a comma separated header value.
///
/// Enterprise accounts may list the consumer sentinel next to their real
/// tenant; the first non-sentinel id wins.
pub fn select_tenant(raw: &str) -> Option<String> {
    let candidates: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .collect();

    let chosen = match candidates.as_slice() {
        [] => return None,
        [only] => *only,
        many => many
            .iter()
            .copied()
            .find(|id| *id != NO_TENANT)
            .unwrap_or(many[0]),
    };
    Some(chosen.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use httpmock::Method::HEAD;

    const ENTERPRISE: &str = "11111111-1111-1111-1111-111111111111";

    fn http() -> Client {
        Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    #[test]
    fn enterprise_tenant_preferred_over_sentinel() {
        let raw = format!("{NO_TENANT},{ENTERPRISE}");
        assert_eq!(select_tenant(&raw).as_deref(), Some(ENTERPRISE));
    }

    #[test]
    fn single_sentinel_is_kept() {
        assert_eq!(select_tenant(NO_TENANT).as_deref(), Some(NO_TENANT));
    }

    #[test]
    fn whitespace_is_trimmed() {
        assert_eq!(
            select_tenant(&format!("  {ENTERPRISE} ")).as_deref(),
            Some(ENTERPRISE)
        );
        assert!(select_tenant(" , ").is_none());
    }

    #[test]
    fn consumer_detection() {
        assert!(is_consumer_tenant(""));
        assert!(is_consumer_tenant(NO_TENANT));
        assert!(!is_consumer_tenant(ENTERPRISE));
    }

    #[tokio::test]
    async fn header_read_from_success_response() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(HEAD).path("/org/");
            then.status(200)
                .header(TENANT_HEADER, format!("{NO_TENANT}, {ENTERPRISE}"));
        });

        let url = Url::parse(&server.url("/org/")).unwrap();
        let tenant = resolve_tenant(&http(), &url).await.unwrap();
        mock.assert();
        assert_eq!(tenant, ENTERPRISE);
    }

    #[tokio::test]
    async fn header_read_from_redirect_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(HEAD).path("/org/");
            then.status(302)
                .header("Location", "https://login.example.com/")
                .header(TENANT_HEADER, NO_TENANT);
        });

        let url = Url::parse(&server.url("/org/")).unwrap();
        let tenant = resolve_tenant(&http(), &url).await.unwrap();
        assert_eq!(tenant, NO_TENANT);
    }

    #[tokio::test]
    async fn missing_header_is_fatal() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(HEAD).path("/org/");
            then.status(401);
        });

        let url = Url::parse(&server.url("/org/")).unwrap();
        let err = resolve_tenant(&http(), &url).await.unwrap_err();
        assert!(matches!(err, AuthError::TenantResolution { .. }));
    }

    #[tokio::test]
    async fn unreachable_account_is_resolution_error() {
        let url = Url::parse("http://127.0.0.1:1/org/").unwrap();
        let err = resolve_tenant(&http(), &url).await.unwrap_err();
        assert!(matches!(err, AuthError::TenantResolution { .. }));
    }
}
