pub mod invites;
pub mod metrics;
pub mod pay;
pub mod redeem;
pub mod reset;
pub mod settings;
pub mod token;

pub use invites::{create_invites_handler, delete_invite_handler, list_invites_handler};
pub use metrics::metrics_handler;
pub use pay::{pay_check_handler, pay_notify_form_handler, pay_notify_query_handler, pay_submit_handler};
pub use redeem::redeem_handler;
pub use reset::reset_password_handler;
pub use settings::{get_settings_handler, put_settings_handler};
pub use token::{list_skus_handler, refresh_token_handler};

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use invite_shop_domain::model::CodeFormatError;
use invite_shop_domain::storage::StorageError;
use invite_shop_gateway::GatewayError;
use invite_shop_provider::ProviderError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("invite code already used")]
    AlreadyUsed,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("server configuration incomplete: {0}")]
    ConfigMissing(&'static str),
    #[error("upstream request timed out")]
    UpstreamTimeout,
    #[error("upstream rejected the request ({status}): {body}")]
    UpstreamRejected { status: u16, body: String },
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error("storage failure: {0}")]
    Storage(StorageError),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::AlreadyUsed | ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::ConfigMissing(_) | ApiError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::UpstreamRejected { .. } | ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
        })
    }
}

impl From<CodeFormatError> for ApiError {
    fn from(err: CodeFormatError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DuplicateCode(code) => {
                ApiError::Conflict(format!("invite code `{code}` already exists"))
            }
            other => ApiError::Storage(other),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Timeout => ApiError::UpstreamTimeout,
            GatewayError::Rejected { status, body } => {
                ApiError::UpstreamRejected { status, body }
            }
            GatewayError::Unreachable(msg) | GatewayError::BadResponse(msg) => {
                ApiError::Upstream(msg)
            }
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::ConfigMissing(what) => ApiError::ConfigMissing(what),
            ProviderError::NoStoredToken => ApiError::ConfigMissing("provider token"),
            ProviderError::RefreshUnavailable => {
                ApiError::ConfigMissing("provider refresh token")
            }
            ProviderError::Timeout => ApiError::UpstreamTimeout,
            ProviderError::Rejected { status, body } => {
                ApiError::UpstreamRejected { status, body }
            }
            ProviderError::InsufficientPrivilege(msg) => ApiError::Upstream(format!(
                "directory permissions missing, re-grant User.ReadWrite.All: {msg}"
            )),
            ProviderError::UnknownAccount(_) => ApiError::NotFound,
            ProviderError::Unreachable(msg) | ProviderError::BadResponse(msg) => {
                ApiError::Upstream(msg)
            }
            ProviderError::Storage(err) => err.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
