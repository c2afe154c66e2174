use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use invite_shop_domain::storage::ProviderTokenStore;
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

use super::ApiError;

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct RefreshRequest {
    /// Refresh even when the stored token is still comfortably valid.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenStatusResponse {
    pub token_type: String,
    pub scope: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub obtained_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SkuBody {
    pub sku_id: String,
    pub sku_part_number: String,
    pub consumed_units: i64,
    pub enabled_units: i64,
}

/// Admin-triggered token refresh. Without `force` the stored token is only
/// replaced when it is inside the expiry margin.
pub async fn refresh_token_handler(
    state: web::Data<AppState>,
    payload: Option<web::Json<RefreshRequest>>,
) -> Result<HttpResponse, ApiError> {
    let force = payload.map(|body| body.force).unwrap_or_default();
    let record = if force {
        state.provisioning().refresh_now().await?
    } else {
        state.provisioning().valid_access_token().await?;
        state
            .storage()
            .current_token()
            .await?
            .ok_or(ApiError::ConfigMissing("provider token"))?
    };
    counter!("api_token_requests_total", 1, "action" => "refresh");
    Ok(HttpResponse::Ok().json(TokenStatusResponse {
        token_type: record.token_type,
        scope: record.scope,
        expires_at: record.expires_at,
        obtained_at: record.obtained_at,
    }))
}

pub async fn list_skus_handler(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let skus = state.provisioning().list_skus().await?;
    let body: Vec<SkuBody> = skus
        .into_iter()
        .map(|sku| SkuBody {
            sku_id: sku.sku_id,
            sku_part_number: sku.sku_part_number,
            consumed_units: sku.consumed_units,
            enabled_units: sku.prepaid_units.enabled,
        })
        .collect();
    Ok(HttpResponse::Ok().json(body))
}
