use actix_web::{web, HttpRequest, HttpResponse};
use invite_shop_domain::model::validate_invite_code;
use invite_shop_domain::storage::InviteStore;
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

use super::ApiError;

#[derive(Debug, Deserialize, Serialize)]
pub struct RedeemRequest {
    pub code: String,
    pub display_name: String,
    /// Optional explicit principal local part; slugified from the display
    /// name when absent.
    pub local_part: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RedeemResponse {
    pub status: String,
    pub principal_name: String,
    /// One-time initial password; shown here and nowhere else.
    pub password: String,
}

/// Redeems an invite code into a provisioned directory account. The single-use
/// guarantee rests on the conditional mark: the account is created first, and
/// if the mark then reports the code as already taken, the account is rolled
/// back and the caller gets a conflict.
pub async fn redeem_handler(
    state: web::Data<AppState>,
    request: HttpRequest,
    payload: web::Json<RedeemRequest>,
) -> Result<HttpResponse, ApiError> {
    let caller = caller_key(&request);

    if payload.display_name.trim().is_empty() {
        counter!("api_redeem_requests_total", 1, "status" => "invalid_name");
        return Err(ApiError::Validation("display_name must not be empty".into()));
    }
    if let Err(err) = validate_invite_code(&payload.code) {
        state.abuse_tracker().record(&caller);
        counter!("api_redeem_requests_total", 1, "status" => "invalid_code");
        return Err(err.into());
    }

    let invite = match state.storage().find_code(&payload.code).await? {
        Some(invite) => invite,
        None => {
            state.abuse_tracker().record(&caller);
            counter!("api_redeem_requests_total", 1, "status" => "not_found");
            return Err(ApiError::NotFound);
        }
    };
    if invite.used {
        state.abuse_tracker().record(&caller);
        counter!("api_redeem_requests_total", 1, "status" => "already_used");
        return Err(ApiError::AlreadyUsed);
    }

    let account = state
        .provisioning()
        .create_account(&payload.display_name, payload.local_part.as_deref())
        .await?;

    let marked = state
        .storage()
        .mark_code_used(invite.id, account.user.id)
        .await?;
    if !marked {
        // Another redemption won between the gate and the mark; the fresh
        // account must not survive it.
        state
            .provisioning()
            .rollback_account(&account.user.provider_user_id)
            .await;
        counter!("api_redeem_requests_total", 1, "status" => "lost_race");
        return Err(ApiError::AlreadyUsed);
    }

    state.abuse_tracker().reset(&caller);
    counter!("api_redeem_requests_total", 1, "status" => "success");
    tracing::info!(code = payload.code, principal = account.user.principal_name, "invite redeemed");

    Ok(HttpResponse::Ok().json(RedeemResponse {
        status: "success".to_string(),
        principal_name: account.user.principal_name,
        password: account.password,
    }))
}

fn caller_key(request: &HttpRequest) -> String {
    request
        .connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string()
}
