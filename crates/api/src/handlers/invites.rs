use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use invite_shop_domain::model::{validate_invite_code, CodeSource, InviteFilter, InviteListEntry};
use invite_shop_domain::storage::InviteStore;
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

use super::ApiError;

const MAX_BATCH_SIZE: u32 = 100;

#[derive(Debug, Deserialize, Serialize)]
pub struct ListInvitesQuery {
    pub source: Option<CodeSource>,
    pub used: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateInvitesRequest {
    /// Batch size for generated codes; ignored when `code` names an exact one.
    pub count: Option<u32>,
    pub code: Option<String>,
    pub owner: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateInvitesResponse {
    pub codes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteInviteQuery {
    /// Bypasses the used-code guard so a redeemed code can be revoked.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InviteBody {
    pub code: String,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub source: CodeSource,
    pub owner: Option<String>,
    pub order_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub account: Option<BoundAccount>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BoundAccount {
    pub principal_name: String,
    pub display_name: String,
}

impl From<InviteListEntry> for InviteBody {
    fn from(entry: InviteListEntry) -> Self {
        Self {
            code: entry.invite.code,
            used: entry.invite.used,
            used_at: entry.invite.used_at,
            source: entry.invite.source,
            owner: entry.invite.owner,
            order_id: entry.invite.order_id,
            created_at: entry.invite.created_at,
            account: entry.enterprise_user.map(|user| BoundAccount {
                principal_name: user.principal_name,
                display_name: user.display_name,
            }),
        }
    }
}

pub async fn list_invites_handler(
    state: web::Data<AppState>,
    query: web::Query<ListInvitesQuery>,
) -> Result<HttpResponse, ApiError> {
    let entries = state
        .storage()
        .list_codes(InviteFilter {
            source: query.source,
            used: query.used,
        })
        .await?;
    let body: Vec<InviteBody> = entries.into_iter().map(InviteBody::from).collect();
    Ok(HttpResponse::Ok().json(body))
}

/// Creates one exact code or a generated batch.
pub async fn create_invites_handler(
    state: web::Data<AppState>,
    payload: web::Json<CreateInvitesRequest>,
) -> Result<HttpResponse, ApiError> {
    let owner = payload.owner.as_deref();
    let codes = match &payload.code {
        Some(code) => {
            validate_invite_code(code)?;
            let record = state.storage().create_code(code, owner).await?;
            vec![record.code]
        }
        None => {
            let count = payload.count.unwrap_or(1);
            if count == 0 || count > MAX_BATCH_SIZE {
                return Err(ApiError::Validation(format!(
                    "count must be between 1 and {MAX_BATCH_SIZE}"
                )));
            }
            state.storage().allocate_codes(count, owner).await?
        }
    };
    counter!("api_invite_admin_total", 1, "action" => "create");
    tracing::info!(count = codes.len(), "invite codes created");
    Ok(HttpResponse::Created().json(CreateInvitesResponse { codes }))
}

pub async fn delete_invite_handler(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<DeleteInviteQuery>,
) -> Result<HttpResponse, ApiError> {
    let code = path.into_inner();
    let invite = state
        .storage()
        .find_code(&code)
        .await?
        .ok_or(ApiError::NotFound)?;
    if invite.used && !query.force {
        return Err(ApiError::AlreadyUsed);
    }
    if !state.storage().delete_code(invite.id).await? {
        return Err(ApiError::NotFound);
    }
    counter!("api_invite_admin_total", 1, "action" => "delete");
    tracing::info!(code, forced = query.force, "invite code deleted");
    Ok(HttpResponse::NoContent().finish())
}
