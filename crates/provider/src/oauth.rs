use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ProviderError;

/// Delegated scope requested on every refresh. `offline_access` keeps the
/// refresh token rolling; the directory scope covers user management.
pub const GRAPH_SCOPE: &str = "offline_access https://graph.microsoft.com/User.ReadWrite.All";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Body of a successful token grant.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    /// Lifetime of the access token in seconds.
    pub expires_in: i64,
}

/// Builds the admin-consent authorization URL an operator visits once to
/// obtain the initial authorization code.
pub fn authorize_url(
    tenant_id: &str,
    client_id: &str,
    redirect_uri: &str,
) -> Result<String, ProviderError> {
    let mut url = reqwest::Url::parse(&format!(
        "https://login.microsoftonline.com/{tenant_id}/oauth2/v2.0/authorize"
    ))
    .map_err(|err| ProviderError::BadResponse(err.to_string()))?;
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("response_type", "code")
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_mode", "query")
        .append_pair("scope", GRAPH_SCOPE);
    Ok(url.into())
}

/// Grants tokens: the initial authorization-code exchange and the ongoing
/// refresh.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn exchange_code(
        &self,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        code: &str,
    ) -> Result<TokenResponse, ProviderError>;

    async fn refresh(
        &self,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<TokenResponse, ProviderError>;
}

/// Token endpoint backed by the identity platform's v2.0 token URL for a
/// single tenant.
pub struct HttpTokenEndpoint {
    client: reqwest::Client,
    token_url: String,
}

impl HttpTokenEndpoint {
    pub fn new(tenant_id: &str) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            token_url: format!(
                "https://login.microsoftonline.com/{tenant_id}/oauth2/v2.0/token"
            ),
        })
    }
}

impl HttpTokenEndpoint {
    async fn grant(&self, form: &[(&str, &str)]) -> Result<TokenResponse, ProviderError> {
        let response = self.client.post(&self.token_url).form(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "token grant rejected");
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|err| ProviderError::BadResponse(err.to_string()))
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange_code(
        &self,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        code: &str,
    ) -> Result<TokenResponse, ProviderError> {
        self.grant(&[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("scope", GRAPH_SCOPE),
        ])
        .await
    }

    async fn refresh(
        &self,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<TokenResponse, ProviderError> {
        self.grant(&[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", GRAPH_SCOPE),
        ])
        .await
    }
}
