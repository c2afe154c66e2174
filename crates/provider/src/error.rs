use invite_shop_domain::StorageError;
use thiserror::Error;

/// Failures surfaced by the directory-provider layer.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Required credentials are missing from the stored settings.
    #[error("provider configuration incomplete: {0}")]
    ConfigMissing(&'static str),
    /// No token has ever been stored, so a refresh cannot run.
    #[error("no stored provider token; seed one before provisioning")]
    NoStoredToken,
    /// The stored token carries no refresh token and has expired.
    #[error("stored token expired and cannot be refreshed")]
    RefreshUnavailable,
    /// The upstream endpoint did not answer in time.
    #[error("provider request timed out")]
    Timeout,
    /// The upstream endpoint could not be reached at all.
    #[error("provider unreachable: {0}")]
    Unreachable(String),
    /// The upstream endpoint answered with a non-success status.
    #[error("provider rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    /// The token or the app registration lacks a required permission.
    #[error("provider denied the operation, check granted permissions: {0}")]
    InsufficientPrivilege(String),
    /// The upstream answered with a body we could not interpret.
    #[error("unexpected provider response: {0}")]
    BadResponse(String),
    /// No locally mirrored account matches the requested principal.
    #[error("no provisioned account `{0}`")]
    UnknownAccount(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_connect() {
            ProviderError::Unreachable(err.to_string())
        } else {
            ProviderError::BadResponse(err.to_string())
        }
    }
}
