//! OAuth 2.0 authorization-code flow against Google.
//!
//! The browser is sent to the consent URL built by
//! [`OAuthClient::authorization_url`]; Google redirects back to the
//! configured `redirect_url` with `code` and `state`, and the code is traded
//! for tokens at the token endpoint.

use tracing::{debug, info};
use url::Url;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{AuthorizationServer, BoxFuture};
use crate::tokens::TokenGrant;

use super::config::GoogleConfig;

/// OAuth client for Google APIs.
#[derive(Debug)]
pub struct OAuthClient {
    config: GoogleConfig,
    auth_url: Url,
    http_client: reqwest::Client,
}

impl OAuthClient {
    /// Creates a client; fails on an invalid configuration.
    pub fn new(config: GoogleConfig) -> ProviderResult<Self> {
        config.validate().map_err(ProviderError::configuration)?;

        let auth_url = Url::parse(&config.endpoints.auth_url).map_err(|e| {
            ProviderError::configuration(format!("invalid authorization url: {}", e))
        })?;

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ProviderError::configuration(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            auth_url,
            http_client,
        })
    }

    /// Builds the Google consent URL for `state`.
    pub fn build_auth_url(&self, state: &str) -> String {
        let scope = self.config.scopes.join(" ");
        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.credentials.client_id)
            .append_pair("redirect_uri", &self.config.redirect_url)
            .append_pair("response_type", "code")
            .append_pair("scope", &scope)
            .append_pair("state", state)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        url.into()
    }

    async fn exchange(&self, code: &str) -> ProviderResult<TokenGrant> {
        let params = [
            ("client_id", self.config.credentials.client_id.as_str()),
            ("client_secret", self.config.credentials.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.config.redirect_url.as_str()),
        ];

        let grant = self.post_token_form(&params, "token exchange").await?;
        info!("successfully obtained tokens");
        Ok(grant)
    }

    async fn refresh(&self, refresh_token: &str) -> ProviderResult<TokenGrant> {
        let params = [
            ("client_id", self.config.credentials.client_id.as_str()),
            ("client_secret", self.config.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let grant = self.post_token_form(&params, "token refresh").await?;
        info!("successfully refreshed access token");
        Ok(grant)
    }

    async fn post_token_form(
        &self,
        params: &[(&str, &str)],
        what: &str,
    ) -> ProviderResult<TokenGrant> {
        debug!(endpoint = %self.config.endpoints.token_url, "{} request", what);

        let response = self
            .http_client
            .post(&self.config.endpoints.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| ProviderError::from(e).with_provider("google"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::network(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(ProviderError::authentication(format!(
                "{} failed ({}): {}",
                what, status, body
            ))
            .with_provider("google"));
        }

        serde_json::from_str(&body).map_err(|e| {
            ProviderError::invalid_response(format!("invalid token response: {}", e))
                .with_provider("google")
        })
    }
}

impl AuthorizationServer for OAuthClient {
    fn authorization_url(&self, state: &str) -> String {
        self.build_auth_url(state)
    }

    fn exchange_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, ProviderResult<TokenGrant>> {
        Box::pin(async move { self.exchange(code).await })
    }

    fn refresh_token<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<TokenGrant>> {
        Box::pin(async move { self.refresh(refresh_token).await })
    }
}
