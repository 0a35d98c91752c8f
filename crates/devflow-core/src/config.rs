use std::env;

use chrono::Utc;
use thiserror::Error;
use url::Url;

pub const DEFAULT_AUTHORITY_HOST: &str = "https://management.core.windows.net/";
pub const DEFAULT_GRANT_TYPE: &str = "device_code";

/// Identity-provider client settings, validated once when a flow is built.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub authority_host: Option<String>,
    pub user_agent: Option<String>,
}

impl AuthConfig {
    pub fn new<C, R>(client_id: C, redirect_uri: R) -> Self
    where
        C: Into<String>,
        R: Into<String>,
    {
        Self {
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            authority_host: None,
            user_agent: None,
        }
    }

    pub fn with_authority_host<S: Into<String>>(mut self, host: S) -> Self {
        self.authority_host = Some(host.into());
        self
    }

    pub fn with_user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Reject configurations that could never complete a flow.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::MissingField("client_id"));
        }
        if self.redirect_uri.trim().is_empty() {
            return Err(ConfigError::MissingField("redirect_uri"));
        }
        Ok(())
    }

    /// Resource requested from the identity provider.
    pub fn authority_host(&self) -> &str {
        non_blank(self.authority_host.as_deref()).unwrap_or(DEFAULT_AUTHORITY_HOST)
    }

    pub fn user_agent(&self) -> String {
        match non_blank(self.user_agent.as_deref()) {
            Some(agent) => agent.to_owned(),
            None => default_user_agent(),
        }
    }
}

/// Settings for the credential minted at the end of the flow.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub grant_type: String,
    /// Space separated scopes; empty requests every scope.
    pub scope: String,
    pub description: String,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            grant_type: DEFAULT_GRANT_TYPE.to_owned(),
            scope: String::new(),
            description: default_token_description(),
        }
    }
}

impl TokenConfig {
    pub fn with_grant_type<S: Into<String>>(mut self, grant_type: S) -> Self {
        self.grant_type = grant_type.into();
        self
    }

    pub fn with_scope<S: Into<String>>(mut self, scope: S) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }
}

/// Parse an account endpoint and make sure its path ends with exactly one `/`.
pub fn normalize_account_url(raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    let mut url = Url::parse(trimmed).map_err(|source| ConfigError::InvalidAccountUrl {
        value: trimmed.to_owned(),
        source,
    })?;
    ensure_trailing_slash(&mut url);
    Ok(url)
}

pub(crate) fn ensure_trailing_slash(url: &mut Url) {
    let path = url.path().trim_end_matches('/').to_owned();
    url.set_path(&format!("{path}/"));
}

pub fn default_user_agent() -> String {
    format!(
        "devflow/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        env::consts::OS,
        env::consts::ARCH
    )
}

pub fn default_token_description() -> String {
    let host = ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .find_map(|key| env::var(key).ok().filter(|value| !value.trim().is_empty()))
        .unwrap_or_else(|| "unknown-host".to_owned());
    format!(
        "devflow: {host} on {}",
        Utc::now().format("%Y-%m-%d %H:%M UTC")
    )
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Errors raised while validating flow configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration field '{0}'")]
    MissingField(&'static str),
    #[error("invalid account URL '{value}': {source}")]
    InvalidAccountUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_url_gains_single_trailing_slash() {
        let url = normalize_account_url("https://acct.example.com/org").unwrap();
        assert_eq!(url.as_str(), "https://acct.example.com/org/");

        let again = normalize_account_url(url.as_str()).unwrap();
        assert_eq!(again, url);

        let doubled = normalize_account_url("https://acct.example.com/org//").unwrap();
        assert_eq!(doubled.as_str(), "https://acct.example.com/org/");
    }

    #[test]
    fn bare_host_keeps_root_path() {
        let url = normalize_account_url("https://acct.example.com").unwrap();
        assert_eq!(url.as_str(), "https://acct.example.com/");
    }

    #[test]
    fn invalid_account_url() {
        let err = normalize_account_url("not a url").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAccountUrl { .. }));
    }

    #[test]
    fn validate_requires_client_and_redirect() {
        let err = AuthConfig::new("  ", "urn:redirect").validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("client_id")));

        let err = AuthConfig::new("client", "").validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("redirect_uri")));

        AuthConfig::new("client", "urn:redirect").validate().unwrap();
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let config = AuthConfig::new("client", "urn:redirect");
        assert_eq!(config.authority_host(), DEFAULT_AUTHORITY_HOST);
        assert!(config.user_agent().starts_with("devflow/"));

        let config = config
            .with_authority_host("https://resource.example.com/")
            .with_user_agent("custom-agent/1.0");
        assert_eq!(config.authority_host(), "https://resource.example.com/");
        assert_eq!(config.user_agent(), "custom-agent/1.0");
    }

    #[test]
    fn token_config_defaults() {
        let config = TokenConfig::default();
        assert_eq!(config.grant_type, "device_code");
        assert!(config.scope.is_empty());
        assert!(config.description.starts_with("devflow: "));

        let config = config.with_scope("vso.code").with_description("build agent");
        assert_eq!(config.scope, "vso.code");
        assert_eq!(config.description, "build agent");
    }
}
