use std::collections::BTreeMap;

use actix_web::{web, HttpResponse};
use chrono::Utc;
use invite_shop_domain::model::{
    amount_to_cents, format_money, generate_trade_no, NewOrder, OrderRecord, OrderStatus,
};
use invite_shop_domain::sign::verify_params;
use invite_shop_domain::storage::{OrderStore, SettingsStore};
use invite_shop_domain::AppSettings;
use invite_shop_gateway::{GatewayCredentials, SubmitOrder};
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

use super::ApiError;

#[derive(Debug, Deserialize, Serialize)]
pub struct SubmitRequest {
    /// Reuse an existing pending order instead of creating a fresh one.
    pub trade_no: Option<String>,
    pub buyer: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub trade_no: String,
    pub amount: String,
    pub redirect_url: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CheckRequest {
    pub trade_no: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResponse {
    pub trade_no: String,
    pub status: OrderStatus,
    pub code: Option<String>,
}

/// Loads the admin settings and derives gateway credentials, refusing to talk
/// to the gateway with an incomplete configuration.
pub(crate) async fn gateway_settings(
    state: &AppState,
) -> Result<(AppSettings, GatewayCredentials), ApiError> {
    let settings = match state.settings_cache().get() {
        Some(settings) => settings,
        None => {
            let settings = state
                .storage()
                .load_settings()
                .await?
                .ok_or(ApiError::ConfigMissing("app settings"))?;
            state.settings_cache().store(settings.clone());
            settings
        }
    };
    if settings.gateway_merchant_id.is_empty() {
        return Err(ApiError::ConfigMissing("gateway merchant id"));
    }
    if settings.gateway_key.is_empty() {
        return Err(ApiError::ConfigMissing("gateway key"));
    }
    if settings.gateway_url.is_empty() {
        return Err(ApiError::ConfigMissing("gateway url"));
    }
    let creds = GatewayCredentials {
        merchant_id: settings.gateway_merchant_id.clone(),
        key: settings.gateway_key.clone(),
        base_url: settings.gateway_url.clone(),
    };
    Ok((settings, creds))
}

/// Creates (or reuses) a pending order and submits it to the gateway,
/// answering with the checkout redirect. Stale pending orders are flipped to
/// expired and refused instead of being resubmitted.
pub async fn pay_submit_handler(
    state: web::Data<AppState>,
    payload: web::Json<SubmitRequest>,
) -> Result<HttpResponse, ApiError> {
    let (settings, creds) = gateway_settings(&state).await?;

    let order = match &payload.trade_no {
        Some(trade_no) => reusable_order(&state, trade_no).await?,
        None => {
            state
                .storage()
                .create_order(NewOrder {
                    trade_no: generate_trade_no(),
                    amount: settings.invite_price,
                    buyer: payload.buyer.clone(),
                })
                .await?
        }
    };

    let base = state.public_base_url();
    let submit = SubmitOrder {
        trade_no: order.trade_no.clone(),
        amount: order.amount,
        subject: "invite code".to_string(),
        notify_url: format!("{base}/api/v1/pay/notify"),
        return_url: format!("{base}/pay/result"),
    };
    let outcome = match state.gateway().submit_order(&creds, &submit).await {
        Ok(outcome) => outcome,
        Err(err) => {
            counter!("api_pay_requests_total", 1, "endpoint" => "submit", "status" => "gateway_error");
            return Err(err.into());
        }
    };
    if let Some(gateway_trade_no) = &outcome.gateway_trade_no {
        state
            .storage()
            .record_gateway_trade_no(order.id, gateway_trade_no)
            .await?;
    }
    counter!("api_pay_requests_total", 1, "endpoint" => "submit", "status" => "redirected");

    Ok(HttpResponse::Ok().json(SubmitResponse {
        trade_no: order.trade_no,
        amount: format_money(order.amount),
        redirect_url: outcome.redirect_url,
    }))
}

/// Fetches a caller-named order for resubmission. Paid and expired orders are
/// refused; a pending order past the staleness window is expired first.
async fn reusable_order(state: &AppState, trade_no: &str) -> Result<OrderRecord, ApiError> {
    let order = state
        .storage()
        .find_order(trade_no)
        .await?
        .ok_or(ApiError::NotFound)?;
    match order.status {
        OrderStatus::Paid => Err(ApiError::Conflict("order already paid".to_string())),
        OrderStatus::Expired => Err(ApiError::Conflict("order expired".to_string())),
        OrderStatus::Pending => {
            let stale_after = order.created_at + state.pending_order_ttl();
            if Utc::now() >= stale_after {
                state.storage().expire_order(order.id).await?;
                counter!("api_pay_requests_total", 1, "endpoint" => "submit", "status" => "expired");
                return Err(ApiError::Conflict("order expired".to_string()));
            }
            Ok(order)
        }
    }
}

/// Poll path: answers from local state when the order is already paid,
/// otherwise asks the gateway and settles on a paid report.
pub async fn pay_check_handler(
    state: web::Data<AppState>,
    payload: web::Json<CheckRequest>,
) -> Result<HttpResponse, ApiError> {
    let order = state
        .storage()
        .find_order(&payload.trade_no)
        .await?
        .ok_or(ApiError::NotFound)?;

    if order.status == OrderStatus::Paid {
        let code = state.storage().code_for_order(order.id).await?;
        counter!("api_pay_requests_total", 1, "endpoint" => "check", "status" => "already_paid");
        return Ok(HttpResponse::Ok().json(CheckResponse {
            trade_no: order.trade_no,
            status: OrderStatus::Paid,
            code: code.map(|record| record.code),
        }));
    }

    let (_, creds) = gateway_settings(&state).await?;
    let report = state
        .gateway()
        .query_order(&creds, &order.trade_no, order.gateway_trade_no.as_deref())
        .await?;
    if !report.paid {
        let status_tag = order.status.as_ref().to_owned();
        counter!("api_pay_requests_total", 1, "endpoint" => "check", "status" => status_tag);
        return Ok(HttpResponse::Ok().json(CheckResponse {
            trade_no: order.trade_no,
            status: order.status,
            code: None,
        }));
    }

    let gateway_trade_no = report
        .gateway_trade_no
        .or(order.gateway_trade_no.clone())
        .unwrap_or_else(|| order.trade_no.clone());
    let outcome = state
        .storage()
        .settle_order(order.id, &gateway_trade_no)
        .await?;
    let status_tag = if outcome.newly_paid { "settled" } else { "already_paid" };
    counter!("api_pay_requests_total", 1, "endpoint" => "check", "status" => status_tag);

    Ok(HttpResponse::Ok().json(CheckResponse {
        trade_no: outcome.order.trade_no,
        status: outcome.order.status,
        code: outcome.code,
    }))
}

pub async fn pay_notify_query_handler(
    state: web::Data<AppState>,
    query: web::Query<BTreeMap<String, String>>,
) -> HttpResponse {
    process_notify(&state, query.into_inner()).await
}

pub async fn pay_notify_form_handler(
    state: web::Data<AppState>,
    form: web::Form<BTreeMap<String, String>>,
) -> HttpResponse {
    process_notify(&state, form.into_inner()).await
}

/// Webhook path. The gateway protocol expects a bare `success`/`fail` body;
/// signature or lookup failures never mutate order state.
async fn process_notify(state: &AppState, params: BTreeMap<String, String>) -> HttpResponse {
    let (_, creds) = match gateway_settings(state).await {
        Ok(loaded) => loaded,
        Err(err) => {
            tracing::warn!(error = %err, "notify refused, settings unavailable");
            return notify_reply(false);
        }
    };

    if !verify_params(&params, &creds.key) {
        counter!("api_pay_requests_total", 1, "endpoint" => "notify", "status" => "bad_signature");
        return notify_reply(false);
    }

    if params.get("trade_status").map(String::as_str) != Some("TRADE_SUCCESS") {
        counter!("api_pay_requests_total", 1, "endpoint" => "notify", "status" => "ignored");
        return notify_reply(true);
    }

    let Some(trade_no) = params.get("out_trade_no") else {
        return notify_reply(false);
    };
    let order = match state.storage().find_order(trade_no).await {
        Ok(Some(order)) => order,
        Ok(None) => {
            counter!("api_pay_requests_total", 1, "endpoint" => "notify", "status" => "unknown_order");
            return notify_reply(false);
        }
        Err(err) => {
            tracing::error!(error = %err, "notify order lookup failed");
            return notify_reply(false);
        }
    };

    if let Some(money) = params.get("money") {
        if !amount_matches(money, order.amount) {
            counter!("api_pay_requests_total", 1, "endpoint" => "notify", "status" => "amount_mismatch");
            tracing::warn!(trade_no, money, "notify amount does not match the order");
            return notify_reply(false);
        }
    }

    if order.status == OrderStatus::Paid {
        counter!("api_pay_requests_total", 1, "endpoint" => "notify", "status" => "already_paid");
        return notify_reply(true);
    }

    let gateway_trade_no = params
        .get("trade_no")
        .cloned()
        .or(order.gateway_trade_no.clone())
        .unwrap_or_else(|| order.trade_no.clone());
    match state.storage().settle_order(order.id, &gateway_trade_no).await {
        Ok(outcome) => {
            let status_tag = if outcome.newly_paid { "settled" } else { "already_paid" };
            counter!("api_pay_requests_total", 1, "endpoint" => "notify", "status" => status_tag);
            notify_reply(true)
        }
        Err(err) => {
            tracing::error!(error = %err, trade_no, "notify settlement failed");
            notify_reply(false)
        }
    }
}

fn amount_matches(reported: &str, expected: Decimal) -> bool {
    match reported.trim().parse::<Decimal>() {
        Ok(amount) => amount_to_cents(amount) == amount_to_cents(expected),
        Err(_) => false,
    }
}

fn notify_reply(ok: bool) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body(if ok { "success" } else { "fail" })
}
