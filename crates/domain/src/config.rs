//! Environment-driven configuration shared by the API binary.
//!
//! Deployment facts (database, bind addresses, tenant identity, public URL)
//! come from the environment; everything an admin edits at runtime (gateway
//! credentials, client secret, pricing) lives in the `app_settings` row
//! instead.

use std::env;

use thiserror::Error;

/// Minutes a pending order may sit before the submit path refuses to reuse it
/// and flips it to expired.
pub const DEFAULT_PENDING_ORDER_TTL_MINUTES: i64 = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    database_url: String,
    api_bind_address: String,
    api_unix_socket: Option<String>,
    internal_bind_address: Option<String>,
    internal_unix_socket: Option<String>,
    public_base_url: String,
    tenant_id: String,
    tenant_domain: String,
    pending_order_ttl_minutes: i64,
}

impl ApiConfig {
    /// Loads the variables required by the API binary, hydrating `.env` first.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let pending_order_ttl_minutes = match get_optional_var("PENDING_ORDER_TTL_MINUTES") {
            Some(raw) => raw.parse().map_err(|source| ConfigError::InvalidNumber {
                key: "PENDING_ORDER_TTL_MINUTES",
                source,
            })?,
            None => DEFAULT_PENDING_ORDER_TTL_MINUTES,
        };

        Ok(Self {
            database_url: get_required_var("DATABASE_URL")?,
            api_bind_address: get_required_var("API_BIND_ADDRESS")?,
            api_unix_socket: get_optional_var("API_UNIX_SOCKET"),
            internal_bind_address: get_optional_var("API_INTERNAL_BIND_ADDRESS"),
            internal_unix_socket: get_optional_var("API_INTERNAL_UNIX_SOCKET"),
            public_base_url: get_required_var("PUBLIC_BASE_URL")?,
            tenant_id: get_required_var("TENANT_ID")?,
            tenant_domain: get_required_var("TENANT_DOMAIN")?,
            pending_order_ttl_minutes,
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn api_bind_address(&self) -> &str {
        &self.api_bind_address
    }

    pub fn api_unix_socket(&self) -> Option<&str> {
        self.api_unix_socket.as_deref()
    }

    pub fn internal_bind_address(&self) -> Option<&str> {
        self.internal_bind_address.as_deref()
    }

    pub fn internal_unix_socket(&self) -> Option<&str> {
        self.internal_unix_socket.as_deref()
    }

    pub fn has_internal_listener(&self) -> bool {
        self.internal_bind_address.is_some() || self.internal_unix_socket.is_some()
    }

    /// Base URL callbacks and return pages are built from, without a trailing
    /// slash.
    pub fn public_base_url(&self) -> &str {
        self.public_base_url.trim_end_matches('/')
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Domain appended to slugified local parts to form principal names.
    pub fn tenant_domain(&self) -> &str {
        &self.tenant_domain
    }

    pub fn pending_order_ttl_minutes(&self) -> i64 {
        self.pending_order_ttl_minutes
    }
}

fn get_required_var(key: &'static str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Err(ConfigError::MissingVar { key })
            } else {
                Ok(trimmed.to_string())
            }
        }
        Err(_) => Err(ConfigError::MissingVar { key }),
    }
}

fn get_optional_var(key: &'static str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("INVITE_SHOP_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: &'static str },
    #[error("invalid integer in `{key}`: {source}")]
    InvalidNumber {
        key: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}
