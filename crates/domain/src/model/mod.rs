//! Data structures and generation helpers shared across the workspace.

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::AsRefStr;
use thiserror::Error;

/// Prefix carried by every invite code, `INV-` plus six random characters.
pub const INVITE_CODE_PREFIX: &str = "INV-";

/// Number of random base-36 characters after the prefix.
pub const INVITE_CODE_RANDOM_LEN: usize = 6;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Character set for generated account passwords. Mixed case, digits and
/// symbols so the directory provider's complexity rules are always met;
/// ambiguous glyphs (`I`, `l`, `0`/`O` confusions) are left out.
const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz0123456789!@#$%^&*()";

/// Length of generated account passwords.
pub const PASSWORD_LENGTH: usize = 20;

/// Maximum length of a slugified principal-name local part.
pub const LOCAL_PART_MAX_LEN: usize = 32;

/// Generates a fresh invite code of the shape `INV-XXXXXX`. Uniqueness is the
/// storage layer's concern; collisions there are retried with a fresh draw.
pub fn generate_invite_code() -> String {
    let mut rng = rand::thread_rng();
    let mut code = String::with_capacity(INVITE_CODE_PREFIX.len() + INVITE_CODE_RANDOM_LEN);
    code.push_str(INVITE_CODE_PREFIX);
    for _ in 0..INVITE_CODE_RANDOM_LEN {
        let idx = rng.gen_range(0..CODE_ALPHABET.len());
        code.push(CODE_ALPHABET[idx] as char);
    }
    code
}

/// Errors emitted when an externally supplied invite code fails validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodeFormatError {
    #[error("invite code must look like {INVITE_CODE_PREFIX}XXXXXX")]
    BadShape,
}

/// Validates the `INV-` + 6 base-36 uppercase contract.
pub fn validate_invite_code(code: &str) -> Result<(), CodeFormatError> {
    let Some(tail) = code.strip_prefix(INVITE_CODE_PREFIX) else {
        return Err(CodeFormatError::BadShape);
    };
    if tail.len() != INVITE_CODE_RANDOM_LEN
        || !tail
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
    {
        return Err(CodeFormatError::BadShape);
    }
    Ok(())
}

/// Generates a caller-side trade number: `ORD` + unix millis + 3 random
/// digits. Unique enough per install; the database enforces the rest.
pub fn generate_trade_no() -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix = rand::thread_rng().gen_range(0..1000);
    format!("ORD{millis}{suffix:03}")
}

/// Generates a high-entropy password satisfying the provider's complexity
/// expectations. Distinct on every call.
pub fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    (0..PASSWORD_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..PASSWORD_ALPHABET.len());
            PASSWORD_ALPHABET[idx] as char
        })
        .collect()
}

/// Derives a principal-name local part from a display name: lowercase,
/// non-alphanumeric runs collapsed to a single `-`, trimmed of separators and
/// capped at [`LOCAL_PART_MAX_LEN`]. Falls back to a random `userNNNN` when
/// nothing survives (e.g. a fully non-Latin display name).
pub fn slugify_local_part(display_name: &str) -> String {
    let mut slug = String::new();
    let mut pending_sep = false;
    for c in display_name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('-');
            }
            pending_sep = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
        if slug.len() >= LOCAL_PART_MAX_LEN {
            break;
        }
    }
    slug.truncate(LOCAL_PART_MAX_LEN);
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        let n = rand::thread_rng().gen_range(0..10_000);
        return format!("user{n}");
    }
    slug
}

/// Default invite price used when the settings row does not carry one.
pub fn default_invite_price() -> Decimal {
    Decimal::new(1000, 2) // 10.00
}

/// Converts a currency amount to integer cents for storage.
pub fn amount_to_cents(amount: Decimal) -> i64 {
    use rust_decimal::prelude::ToPrimitive;
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .unwrap_or(i64::MAX)
}

/// Converts stored integer cents back to a currency amount.
pub fn cents_to_amount(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Formats an amount the way the gateway expects it: fixed two decimals.
pub fn format_money(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}

/// Order lifecycle. `Pending` flips monotonically to `Paid` on confirmed
/// payment and never reverts; a stale pending order flips to `Expired`.
/// Late gateway settlement still wins over `Expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Expired,
}

/// How an invite code came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "snake_case")]
pub enum CodeSource {
    Manual,
    Purchase,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRecord {
    pub id: i32,
    pub trade_no: String,
    pub amount: Decimal,
    pub status: OrderStatus,
    pub gateway_trade_no: Option<String>,
    pub buyer: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub trade_no: String,
    pub amount: Decimal,
    pub buyer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteCodeRecord {
    pub id: i32,
    pub code: String,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub source: CodeSource,
    pub owner: Option<String>,
    pub order_id: Option<i32>,
    pub enterprise_user_id: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// Filters accepted by the admin listing endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InviteFilter {
    pub source: Option<CodeSource>,
    pub used: Option<bool>,
}

/// A listed invite code enriched with its bound account, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteListEntry {
    pub invite: InviteCodeRecord,
    pub enterprise_user: Option<EnterpriseUserRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnterpriseUserRecord {
    pub id: i32,
    pub provider_user_id: String,
    pub principal_name: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEnterpriseUser {
    pub provider_user_id: String,
    pub principal_name: String,
    pub display_name: String,
}

/// Admin-editable configuration: provider client credentials, gateway
/// credentials and pricing. Single mutable row, last write wins.
#[derive(Debug, Clone, PartialEq)]
pub struct AppSettings {
    pub client_id: String,
    pub client_secret: String,
    pub license_sku_id: Option<String>,
    pub gateway_merchant_id: String,
    pub gateway_key: String,
    pub gateway_url: String,
    pub invite_price: Decimal,
}

/// The currently held provider OAuth token. Single cell, replaced on refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderTokenRecord {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub scope: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub obtained_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProviderToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub scope: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Result of applying a paid observation to an order.
#[derive(Debug, Clone, PartialEq)]
pub struct SettleOutcome {
    pub order: OrderRecord,
    /// The invite code bound to this order after settlement. `None` only if
    /// the order could not be settled (not yet paid).
    pub code: Option<String>,
    /// Whether this call performed the pending-to-paid transition, as opposed
    /// to observing a transition some earlier path already made.
    pub newly_paid: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_codes_match_their_own_contract() {
        for _ in 0..64 {
            let code = generate_invite_code();
            validate_invite_code(&code).expect("generated code validates");
        }
    }

    #[test]
    fn code_validation_rejects_malformed_inputs() {
        assert!(validate_invite_code("INV-ABC123").is_ok());
        assert_eq!(
            validate_invite_code("INV-abc123"),
            Err(CodeFormatError::BadShape)
        );
        assert_eq!(
            validate_invite_code("INV-ABCD"),
            Err(CodeFormatError::BadShape)
        );
        assert_eq!(
            validate_invite_code("XYZ-ABC123"),
            Err(CodeFormatError::BadShape)
        );
        assert_eq!(validate_invite_code(""), Err(CodeFormatError::BadShape));
    }

    #[test]
    fn trade_numbers_carry_prefix_and_digits() {
        let trade_no = generate_trade_no();
        assert!(trade_no.starts_with("ORD"));
        assert!(trade_no["ORD".len()..].bytes().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn passwords_are_long_and_distinct() {
        let seen: HashSet<String> = (0..16).map(|_| generate_password()).collect();
        assert_eq!(seen.len(), 16);
        for pwd in &seen {
            assert_eq!(pwd.chars().count(), PASSWORD_LENGTH);
        }
    }

    #[test]
    fn slugify_collapses_and_lowercases() {
        assert_eq!(slugify_local_part("Zhang San"), "zhang-san");
        assert_eq!(slugify_local_part("  Ada   Lovelace! "), "ada-lovelace");
        assert_eq!(slugify_local_part("O'Brien, Pat"), "o-brien-pat");
    }

    #[test]
    fn slugify_caps_length_and_trims_separators() {
        let long = "a".repeat(64);
        assert_eq!(slugify_local_part(&long).len(), LOCAL_PART_MAX_LEN);
        assert!(!slugify_local_part("hey!!!").ends_with('-'));
    }

    #[test]
    fn slugify_falls_back_for_empty_result() {
        let slug = slugify_local_part("张三");
        assert!(slug.starts_with("user"));
        assert!(slug["user".len()..].bytes().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn status_enums_render_snake_case_metric_tags() {
        assert_eq!(OrderStatus::Pending.as_ref(), "pending");
        assert_eq!(OrderStatus::Paid.as_ref(), "paid");
        assert_eq!(OrderStatus::Expired.as_ref(), "expired");
        assert_eq!(CodeSource::Manual.as_ref(), "manual");
        assert_eq!(CodeSource::Purchase.as_ref(), "purchase");
    }

    #[test]
    fn money_round_trips_through_cents() {
        let amount = Decimal::new(1234, 2); // 12.34
        assert_eq!(amount_to_cents(amount), 1234);
        assert_eq!(cents_to_amount(1234), amount);
        assert_eq!(format_money(amount), "12.34");
        assert_eq!(format_money(Decimal::from(10)), "10.00");
    }
}
