use serde::Deserialize;
use serde_json::Value;

use crate::GatewayOrderStatus;

/// Raw order-status payload. The gateway is loose about types (`status` and
/// `trade_no` arrive as strings or numbers depending on deployment), so the
/// flexible fields are normalized here and nowhere else.
#[derive(Debug, Deserialize, Default)]
pub struct OrderQueryResponse {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub status: Option<Value>,
    #[serde(default)]
    pub trade_no: Option<Value>,
    #[serde(default)]
    pub msg: Option<String>,
}

impl OrderQueryResponse {
    /// `code == 1` means the query itself succeeded; `status == 1` means the
    /// order is settled.
    pub fn into_status(self) -> GatewayOrderStatus {
        let paid = self.code == 1
            && self
                .status
                .as_ref()
                .map(|value| loose_string(value) == "1")
                .unwrap_or(false);
        GatewayOrderStatus {
            paid,
            gateway_trade_no: self
                .trade_no
                .as_ref()
                .map(loose_string)
                .filter(|s| !s.is_empty()),
            message: self.msg,
        }
    }
}

fn loose_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
