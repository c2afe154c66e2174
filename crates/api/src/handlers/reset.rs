use actix_web::{web, HttpResponse};
use invite_shop_domain::model::validate_invite_code;
use invite_shop_domain::storage::{EnterpriseUserStore, InviteStore};
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

use super::ApiError;

#[derive(Debug, Deserialize, Serialize)]
pub struct ResetRequest {
    pub code: String,
    pub principal_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub principal_name: String,
    pub password: String,
}

/// Self-service password reset: the caller must present the invite code
/// together with the principal name it was redeemed into. A mismatched pair
/// is indistinguishable from an unknown one.
pub async fn reset_password_handler(
    state: web::Data<AppState>,
    payload: web::Json<ResetRequest>,
) -> Result<HttpResponse, ApiError> {
    validate_invite_code(&payload.code)?;

    let invite = state
        .storage()
        .find_code(&payload.code)
        .await?
        .ok_or(ApiError::NotFound)?;
    let bound_user_id = match (invite.used, invite.enterprise_user_id) {
        (true, Some(user_id)) => user_id,
        _ => {
            counter!("api_reset_requests_total", 1, "status" => "unredeemed");
            return Err(ApiError::NotFound);
        }
    };
    let user = state
        .storage()
        .find_user(bound_user_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    if user.principal_name != payload.principal_name {
        counter!("api_reset_requests_total", 1, "status" => "mismatch");
        return Err(ApiError::NotFound);
    }

    let account = state
        .provisioning()
        .reset_password(&user.principal_name)
        .await?;
    counter!("api_reset_requests_total", 1, "status" => "success");
    tracing::info!(principal = account.user.principal_name, "password reset issued");

    Ok(HttpResponse::Ok().json(ResetResponse {
        principal_name: account.user.principal_name,
        password: account.password,
    }))
}
