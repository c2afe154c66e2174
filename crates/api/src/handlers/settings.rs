use actix_web::{web, HttpResponse};
use invite_shop_domain::model::default_invite_price;
use invite_shop_domain::storage::SettingsStore;
use invite_shop_domain::AppSettings;
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

use super::ApiError;

/// Wire shape of the single settings row. Secrets are round-tripped as-is;
/// this surface only exists on the internal listener.
#[derive(Debug, Serialize, Deserialize)]
pub struct SettingsBody {
    pub client_id: String,
    pub client_secret: String,
    pub license_sku_id: Option<String>,
    pub gateway_merchant_id: String,
    pub gateway_key: String,
    pub gateway_url: String,
    pub invite_price: Decimal,
}

impl From<AppSettings> for SettingsBody {
    fn from(settings: AppSettings) -> Self {
        Self {
            client_id: settings.client_id,
            client_secret: settings.client_secret,
            license_sku_id: settings.license_sku_id,
            gateway_merchant_id: settings.gateway_merchant_id,
            gateway_key: settings.gateway_key,
            gateway_url: settings.gateway_url,
            invite_price: settings.invite_price,
        }
    }
}

impl From<SettingsBody> for AppSettings {
    fn from(body: SettingsBody) -> Self {
        Self {
            client_id: body.client_id,
            client_secret: body.client_secret,
            license_sku_id: body.license_sku_id,
            gateway_merchant_id: body.gateway_merchant_id,
            gateway_key: body.gateway_key,
            gateway_url: body.gateway_url,
            invite_price: body.invite_price,
        }
    }
}

pub async fn get_settings_handler(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let settings = state
        .storage()
        .load_settings()
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(SettingsBody::from(settings)))
}

/// Replaces the settings row wholesale and drops the read cache so the writer
/// observes its own write on the next request.
pub async fn put_settings_handler(
    state: web::Data<AppState>,
    payload: web::Json<SettingsBody>,
) -> Result<HttpResponse, ApiError> {
    let mut settings = AppSettings::from(payload.into_inner());
    if settings.invite_price <= Decimal::ZERO {
        settings.invite_price = default_invite_price();
    }
    state.storage().save_settings(&settings).await?;
    state.settings_cache().invalidate();
    counter!("api_settings_requests_total", 1, "action" => "save");
    tracing::info!("settings updated");
    Ok(HttpResponse::Ok().json(SettingsBody::from(settings)))
}
