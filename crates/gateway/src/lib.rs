//! Payment-gateway client: signed form submission and order-status queries
//! against the external checkout service, behind a trait so the workflow can
//! be exercised without the network.

mod types;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use invite_shop_domain::model::format_money;
use invite_shop_domain::sign::{sign_params, SIGN_KEY, SIGN_TYPE_KEY};
use reqwest::{redirect, StatusCode, Url};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, warn};

pub use types::OrderQueryResponse;

/// Outbound calls are bounded; a timeout is retryable by the caller, a
/// rejection is not, so the two must stay distinguishable.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

const BODY_EXCERPT_LEN: usize = 200;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway request timed out")]
    Timeout,
    #[error("gateway unreachable: {0}")]
    Unreachable(String),
    #[error("gateway rejected the request: status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("gateway returned an unusable response: {0}")]
    BadResponse(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Unreachable(err.to_string())
        }
    }
}

/// Merchant credentials, read from the admin settings row per call so an
/// admin edit takes effect without a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCredentials {
    pub merchant_id: String,
    pub key: String,
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOrder {
    pub trade_no: String,
    pub amount: Decimal,
    pub subject: String,
    pub notify_url: String,
    pub return_url: String,
}

/// What submit captured: the hosted-checkout redirect and, when the gateway
/// put one in the redirect URL, its own order identifier for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub redirect_url: String,
    pub gateway_trade_no: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOrderStatus {
    pub paid: bool,
    pub gateway_trade_no: Option<String>,
    pub message: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Submits a signed order form and captures the checkout redirect.
    async fn submit_order(
        &self,
        creds: &GatewayCredentials,
        order: &SubmitOrder,
    ) -> Result<SubmitOutcome, GatewayError>;

    /// Queries the gateway-side settlement state of an order.
    async fn query_order(
        &self,
        creds: &GatewayCredentials,
        trade_no: &str,
        gateway_trade_no: Option<&str>,
    ) -> Result<GatewayOrderStatus, GatewayError>;
}

pub struct HttpPaymentGateway {
    client: reqwest::Client,
}

impl HttpPaymentGateway {
    /// Builds the client. Redirects are never followed: the submit protocol
    /// *is* the 301/302 response.
    pub fn new() -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| GatewayError::Unreachable(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn submit_order(
        &self,
        creds: &GatewayCredentials,
        order: &SubmitOrder,
    ) -> Result<SubmitOutcome, GatewayError> {
        let params = build_submit_params(creds, order);
        let submit_url = format!("{}/pay/submit.php", creds.base_url.trim_end_matches('/'));
        debug!(url = submit_url, trade_no = order.trade_no, "submitting order to gateway");

        let response = self.client.post(&submit_url).form(&params).send().await?;
        let status = response.status();

        if status == StatusCode::FOUND || status == StatusCode::MOVED_PERMANENTLY {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
                .ok_or_else(|| {
                    GatewayError::BadResponse("redirect without a Location header".into())
                })?;
            let gateway_trade_no = extract_order_no(&location);
            if gateway_trade_no.is_none() {
                warn!(location, "gateway redirect carried no order_no");
            }
            return Ok(SubmitOutcome {
                redirect_url: location,
                gateway_trade_no,
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(GatewayError::Rejected {
            status: status.as_u16(),
            body: excerpt(&body),
        })
    }

    async fn query_order(
        &self,
        creds: &GatewayCredentials,
        trade_no: &str,
        gateway_trade_no: Option<&str>,
    ) -> Result<GatewayOrderStatus, GatewayError> {
        let query_url = format!("{}/api.php", creds.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&query_url)
            .query(&[
                ("act", "order"),
                ("pid", creds.merchant_id.as_str()),
                ("key", creds.key.as_str()),
                ("trade_no", gateway_trade_no.unwrap_or("")),
                ("out_trade_no", trade_no),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body: excerpt(&body),
            });
        }

        let parsed: OrderQueryResponse = response
            .json()
            .await
            .map_err(|err| GatewayError::BadResponse(err.to_string()))?;
        Ok(parsed.into_status())
    }
}

/// Builds the signed form the gateway expects, `sign`/`sign_type` included.
pub fn build_submit_params(
    creds: &GatewayCredentials,
    order: &SubmitOrder,
) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert("pid".to_string(), creds.merchant_id.clone());
    params.insert("type".to_string(), "epay".to_string());
    params.insert("out_trade_no".to_string(), order.trade_no.clone());
    params.insert("notify_url".to_string(), order.notify_url.clone());
    params.insert("return_url".to_string(), order.return_url.clone());
    params.insert("name".to_string(), order.subject.clone());
    params.insert("money".to_string(), format_money(order.amount));
    params.insert("device".to_string(), "pc".to_string());

    let signature = sign_params(&params, &creds.key);
    params.insert(SIGN_KEY.to_string(), signature);
    params.insert(SIGN_TYPE_KEY.to_string(), "MD5".to_string());
    params
}

/// Pulls the gateway's own order identifier out of the checkout redirect,
/// e.g. `https://checkout.example.com/paying?order_no=...`.
fn extract_order_no(location: &str) -> Option<String> {
    let url = Url::parse(location).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "order_no")
        .map(|(_, value)| value.into_owned())
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_LEN).collect()
}
