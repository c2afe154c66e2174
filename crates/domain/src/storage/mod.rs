//! Storage trait contracts implemented by the SeaORM adapter crate.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{
    AppSettings, EnterpriseUserRecord, InviteCodeRecord, InviteFilter, InviteListEntry,
    NewEnterpriseUser, NewOrder, NewProviderToken, OrderRecord, ProviderTokenRecord,
    SettleOutcome,
};

/// Common result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("invite code `{0}` already exists")]
    DuplicateCode(String),
}

impl StorageError {
    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }
}

/// The invite-code ledger: allocation, the single-use gate and revocation.
#[async_trait]
pub trait InviteStore: Send + Sync {
    /// Creates `count` fresh `INV-XXXXXX` codes. Collisions against existing
    /// codes are retried per item without discarding already-committed ones.
    async fn allocate_codes(&self, count: u32, owner: Option<&str>) -> StorageResult<Vec<String>>;

    /// Creates exactly the given code; `DuplicateCode` if it already exists.
    async fn create_code(&self, code: &str, owner: Option<&str>)
        -> StorageResult<InviteCodeRecord>;

    async fn find_code(&self, code: &str) -> StorageResult<Option<InviteCodeRecord>>;

    /// Conditional single-use transition: sets `used`, `used_at` and the bound
    /// account in one `... WHERE used = FALSE` update. Returns whether this
    /// call performed the transition; `false` means another redemption won.
    async fn mark_code_used(&self, invite_id: i32, enterprise_user_id: i32)
        -> StorageResult<bool>;

    /// Hard delete. Returns whether a row existed.
    async fn delete_code(&self, invite_id: i32) -> StorageResult<bool>;

    /// Codes matching the filter, newest first, with bound-account summaries.
    async fn list_codes(&self, filter: InviteFilter) -> StorageResult<Vec<InviteListEntry>>;
}

/// Order persistence plus the one place true atomicity is required: the
/// settle transaction that flips status and issues the purchase code.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create_order(&self, order: NewOrder) -> StorageResult<OrderRecord>;

    async fn find_order(&self, trade_no: &str) -> StorageResult<Option<OrderRecord>>;

    /// Persists the gateway-side order identifier captured at submit time.
    async fn record_gateway_trade_no(
        &self,
        order_id: i32,
        gateway_trade_no: &str,
    ) -> StorageResult<()>;

    /// Conditional pending-to-expired flip. Returns whether a row changed.
    async fn expire_order(&self, order_id: i32) -> StorageResult<bool>;

    /// Applies a confirmed payment in a single transaction: flips status to
    /// paid (pending or expired, never unpaying a paid order), records the
    /// gateway trade number and issues the purchase invite code if the order
    /// does not have one yet. Concurrent callers agree on one code.
    async fn settle_order(
        &self,
        order_id: i32,
        gateway_trade_no: &str,
    ) -> StorageResult<SettleOutcome>;

    async fn code_for_order(&self, order_id: i32) -> StorageResult<Option<InviteCodeRecord>>;
}

/// Single-row admin settings, last write wins.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load_settings(&self) -> StorageResult<Option<AppSettings>>;
    async fn save_settings(&self, settings: &AppSettings) -> StorageResult<()>;
}

/// Current provider OAuth token cell, replaced wholesale on refresh.
#[async_trait]
pub trait ProviderTokenStore: Send + Sync {
    async fn current_token(&self) -> StorageResult<Option<ProviderTokenRecord>>;
    async fn replace_token(&self, token: NewProviderToken) -> StorageResult<ProviderTokenRecord>;
}

/// Local mirror of provisioned directory accounts. Append-only.
#[async_trait]
pub trait EnterpriseUserStore: Send + Sync {
    async fn insert_user(&self, user: NewEnterpriseUser) -> StorageResult<EnterpriseUserRecord>;
    async fn find_user(&self, id: i32) -> StorageResult<Option<EnterpriseUserRecord>>;
    async fn find_user_by_principal(
        &self,
        principal_name: &str,
    ) -> StorageResult<Option<EnterpriseUserRecord>>;
}
