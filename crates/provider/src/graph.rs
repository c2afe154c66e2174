use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::ProviderError;

const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const REQUEST_DENIED: &str = "Authorization_RequestDenied";

/// Input for a new directory account.
#[derive(Debug, Clone)]
pub struct NewDirectoryAccount {
    pub display_name: String,
    pub mail_nickname: String,
    pub user_principal_name: String,
    pub password: String,
}

/// One license SKU visible to the organization.
#[derive(Debug, Clone, Deserialize)]
pub struct SkuSummary {
    #[serde(rename = "skuId")]
    pub sku_id: String,
    #[serde(rename = "skuPartNumber")]
    pub sku_part_number: String,
    #[serde(default, rename = "consumedUnits")]
    pub consumed_units: i64,
    #[serde(default, rename = "prepaidUnits")]
    pub prepaid_units: PrepaidUnits,
}

/// Unit pool of a subscription SKU. Only the enabled count matters here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrepaidUnits {
    #[serde(default)]
    pub enabled: i64,
}

/// Directory operations the provisioning workflow needs. Kept as a trait so
/// tests can drive the workflow without a live tenant.
#[async_trait]
pub trait DirectoryApi: Send + Sync {
    /// Creates the account and returns the provider-assigned object id.
    async fn create_user(
        &self,
        access_token: &str,
        account: &NewDirectoryAccount,
    ) -> Result<String, ProviderError>;

    async fn delete_user(&self, access_token: &str, user_id: &str) -> Result<(), ProviderError>;

    async fn assign_license(
        &self,
        access_token: &str,
        user_id: &str,
        sku_id: &str,
    ) -> Result<(), ProviderError>;

    async fn reset_password(
        &self,
        access_token: &str,
        user_id: &str,
        new_password: &str,
    ) -> Result<(), ProviderError>;

    async fn list_skus(&self, access_token: &str) -> Result<Vec<SkuSummary>, ProviderError>;
}

/// Client for the hosted directory REST API.
pub struct HttpDirectoryApi {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CreatedUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SkuPage {
    #[serde(default)]
    value: Vec<SkuSummary>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    #[serde(default)]
    error: Option<GraphErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl HttpDirectoryApi {
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_base_url(GRAPH_BASE.to_string())
    }

    pub fn with_base_url(base_url: String) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, base_url })
    }

    /// Maps a non-success response to a typed error, translating the
    /// permission-denied code into its own variant so callers can report a
    /// configuration problem instead of a generic upstream failure.
    async fn reject(response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if let Ok(parsed) = serde_json::from_str::<GraphErrorBody>(&body) {
            if let Some(detail) = parsed.error {
                if detail.code == REQUEST_DENIED {
                    return ProviderError::InsufficientPrivilege(detail.message);
                }
            }
        }
        ProviderError::Rejected { status, body }
    }
}

#[async_trait]
impl DirectoryApi for HttpDirectoryApi {
    async fn create_user(
        &self,
        access_token: &str,
        account: &NewDirectoryAccount,
    ) -> Result<String, ProviderError> {
        let body = json!({
            "accountEnabled": true,
            "displayName": account.display_name,
            "mailNickname": account.mail_nickname,
            "userPrincipalName": account.user_principal_name,
            "passwordProfile": {
                "forceChangePasswordNextSignIn": true,
                "password": account.password,
            },
        });
        let response = self
            .client
            .post(format!("{}/users", self.base_url))
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }
        let created: CreatedUser = response
            .json()
            .await
            .map_err(|err| ProviderError::BadResponse(err.to_string()))?;
        Ok(created.id)
    }

    async fn delete_user(&self, access_token: &str, user_id: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .delete(format!("{}/users/{user_id}", self.base_url))
            .bearer_auth(access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }
        Ok(())
    }

    async fn assign_license(
        &self,
        access_token: &str,
        user_id: &str,
        sku_id: &str,
    ) -> Result<(), ProviderError> {
        let body = json!({
            "addLicenses": [{ "skuId": sku_id }],
            "removeLicenses": [],
        });
        let response = self
            .client
            .post(format!("{}/users/{user_id}/assignLicense", self.base_url))
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }
        Ok(())
    }

    async fn reset_password(
        &self,
        access_token: &str,
        user_id: &str,
        new_password: &str,
    ) -> Result<(), ProviderError> {
        let body = json!({
            "passwordProfile": {
                "forceChangePasswordNextSignIn": true,
                "password": new_password,
            },
        });
        let response = self
            .client
            .patch(format!("{}/users/{user_id}", self.base_url))
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }
        Ok(())
    }

    async fn list_skus(&self, access_token: &str) -> Result<Vec<SkuSummary>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/subscribedSkus", self.base_url))
            .bearer_auth(access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }
        let page: SkuPage = response
            .json()
            .await
            .map_err(|err| ProviderError::BadResponse(err.to_string()))?;
        Ok(page.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sku_page_deserializes_graph_shape() {
        let page: SkuPage = serde_json::from_str(
            r#"{"value":[{"skuId":"abc","skuPartNumber":"DEVELOPERPACK_E5","consumedUnits":3,"prepaidUnits":{"enabled":25,"suspended":0}}]}"#,
        )
        .unwrap();
        assert_eq!(page.value.len(), 1);
        assert_eq!(page.value[0].sku_part_number, "DEVELOPERPACK_E5");
        assert_eq!(page.value[0].consumed_units, 3);
        assert_eq!(page.value[0].prepaid_units.enabled, 25);
    }

    #[test]
    fn error_body_recognizes_denied_code() {
        let body: GraphErrorBody = serde_json::from_str(
            r#"{"error":{"code":"Authorization_RequestDenied","message":"Insufficient privileges"}}"#,
        )
        .unwrap();
        let detail = body.error.unwrap();
        assert_eq!(detail.code, REQUEST_DENIED);
    }
}
