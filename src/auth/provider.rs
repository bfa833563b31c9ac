use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::OAuthConfig;

/// Attributes a sign-on provider asserts about an identity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderIdentity {
    pub open_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// External single-sign-on collaborator.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Redeem an authorization code for the identity it was issued to.
    async fn exchange_code(&self, code: &str, state: &str) -> anyhow::Result<ProviderIdentity>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    client_id: &'a str,
    grant_type: &'static str,
    code: &'a str,
    state: &'a str,
    redirect_uri: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    access_token: String,
}

/// HTTP client for the OAuth server named by `OAUTH_SERVER_URL`.
pub struct OAuthServerProvider {
    client: reqwest::Client,
    config: OAuthConfig,
    app_id: String,
}

impl OAuthServerProvider {
    pub fn new(config: OAuthConfig, app_id: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("build oauth http client")?;
        Ok(Self {
            client,
            config,
            app_id,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.server_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl IdentityProvider for OAuthServerProvider {
    #[instrument(skip(self, code, state))]
    async fn exchange_code(&self, code: &str, state: &str) -> anyhow::Result<ProviderIdentity> {
        let token: TokenResponse = self
            .client
            .post(self.url("/oauth/token"))
            .json(&TokenRequest {
                client_id: &self.app_id,
                grant_type: "authorization_code",
                code,
                state,
                redirect_uri: &self.config.redirect_uri,
            })
            .send()
            .await
            .context("oauth token request")?
            .error_for_status()
            .context("oauth token response")?
            .json()
            .await
            .context("decode oauth token")?;

        let identity: ProviderIdentity = self
            .client
            .get(self.url("/oauth/userinfo"))
            .bearer_auth(&token.access_token)
            .send()
            .await
            .context("oauth userinfo request")?
            .error_for_status()
            .context("oauth userinfo response")?
            .json()
            .await
            .context("decode oauth userinfo")?;

        anyhow::ensure!(!identity.open_id.is_empty(), "provider returned an empty openId");
        debug!(open_id = %identity.open_id, "provider identity received");
        Ok(identity)
    }
}
