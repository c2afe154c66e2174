use std::{path::Path, sync::Arc};

#[cfg(unix)]
use std::fs;

use actix_web::{middleware::Logger, web, App, HttpServer};

use invite_shop_domain::config::{ApiConfig, ConfigError};
use invite_shop_domain::services::{
    cache::SettingsCache,
    telemetry::{init_telemetry, AbuseTracker, TelemetryConfig, TelemetryError},
};
use invite_shop_gateway::{GatewayError, HttpPaymentGateway};
use invite_shop_provider::{
    HttpDirectoryApi, HttpTokenEndpoint, ProviderError, ProvisioningService,
};
use invite_shop_storage::SeaOrmStorage;
use thiserror::Error;

use crate::{
    handlers::{
        create_invites_handler, delete_invite_handler, get_settings_handler, list_invites_handler,
        list_skus_handler, metrics_handler, pay_check_handler, pay_notify_form_handler,
        pay_notify_query_handler, pay_submit_handler, put_settings_handler, redeem_handler,
        refresh_token_handler, reset_password_handler,
    },
    state::AppState,
};

pub async fn run() -> Result<(), BootstrapError> {
    let config = ApiConfig::load_from_env()?;

    let telemetry_config = TelemetryConfig::from_env("API");
    let telemetry = init_telemetry(&telemetry_config)?;

    let storage = SeaOrmStorage::connect(config.database_url()).await?;

    let settings_cache = Arc::new(SettingsCache::default());
    let gateway = Arc::new(HttpPaymentGateway::new()?);
    let provisioning = Arc::new(ProvisioningService::new(
        storage.clone(),
        Arc::new(HttpDirectoryApi::new()?),
        Arc::new(HttpTokenEndpoint::new(config.tenant_id())?),
        settings_cache.clone(),
        config.tenant_domain().to_string(),
    ));
    let abuse_tracker = AbuseTracker::new(telemetry_config.abuse_threshold());

    let state = AppState::new(
        storage,
        gateway,
        provisioning,
        settings_cache,
        telemetry.clone(),
        abuse_tracker,
        config.public_base_url().to_string(),
        chrono::Duration::minutes(config.pending_order_ttl_minutes()),
    );

    // With an internal listener configured, metrics and admin surfaces stay
    // off the public one.
    let include_metrics_on_public = !config.has_internal_listener();

    let public_state = state.clone();
    let mut public_server = HttpServer::new(move || {
        let mut app = App::new()
            .app_data(web::Data::new(public_state.clone()))
            .wrap(Logger::default())
            .route("/api/v1/pay/submit", web::post().to(pay_submit_handler))
            .route("/api/v1/pay/check", web::post().to(pay_check_handler))
            .route("/api/v1/pay/notify", web::get().to(pay_notify_query_handler))
            .route("/api/v1/pay/notify", web::post().to(pay_notify_form_handler))
            .route("/api/v1/redeem", web::post().to(redeem_handler))
            .route(
                "/api/v1/reset-password",
                web::post().to(reset_password_handler),
            );

        if include_metrics_on_public {
            app = app.route("/metrics", web::get().to(metrics_handler));
        }

        app
    });

    #[cfg(unix)]
    {
        if let Some(socket) = config.api_unix_socket() {
            cleanup_socket(socket)?;
            public_server = public_server.bind_uds(socket)?;
        } else {
            public_server = public_server.bind(config.api_bind_address())?;
        }
    }

    #[cfg(not(unix))]
    {
        if let Some(socket) = config.api_unix_socket() {
            return Err(BootstrapError::Io(std::io::Error::other(format!(
                "unix socket '{socket}' requested but this platform does not support it"
            ))));
        }
        public_server = public_server.bind(config.api_bind_address())?;
    }

    let public_server = public_server.run();

    let internal_server = if config.has_internal_listener() {
        let internal_state = state.clone();
        let mut internal_server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(internal_state.clone()))
                .wrap(Logger::default())
                .route("/metrics", web::get().to(metrics_handler))
                .route("/api/v1/invites", web::get().to(list_invites_handler))
                .route("/api/v1/invites", web::post().to(create_invites_handler))
                .route(
                    "/api/v1/invites/{code}",
                    web::delete().to(delete_invite_handler),
                )
                .route("/api/v1/settings", web::get().to(get_settings_handler))
                .route("/api/v1/settings", web::put().to(put_settings_handler))
                .route(
                    "/api/v1/provider-token/refresh",
                    web::post().to(refresh_token_handler),
                )
                .route("/api/v1/skus", web::get().to(list_skus_handler))
        });

        #[cfg(unix)]
        {
            if let Some(socket) = config.internal_unix_socket() {
                cleanup_socket(socket)?;
                internal_server = internal_server.bind_uds(socket)?;
            } else if let Some(addr) = config.internal_bind_address() {
                internal_server = internal_server.bind(addr)?;
            } else {
                return Err(BootstrapError::Io(std::io::Error::other(
                    "internal listener configured but no bind target provided",
                )));
            }
        }

        #[cfg(not(unix))]
        {
            if let Some(socket) = config.internal_unix_socket() {
                return Err(BootstrapError::Io(std::io::Error::other(format!(
                    "internal unix socket '{socket}' requested but this platform does not support it"
                ))));
            }
            if let Some(addr) = config.internal_bind_address() {
                internal_server = internal_server.bind(addr)?;
            } else {
                return Err(BootstrapError::Io(std::io::Error::other(
                    "internal listener configured but no bind target provided",
                )));
            }
        }

        Some(internal_server.run())
    } else {
        None
    };

    if let Some(internal) = internal_server {
        tokio::try_join!(public_server, internal)?;
    } else {
        public_server.await?;
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("storage error: {0}")]
    Storage(#[from] invite_shop_domain::storage::StorageError),
    #[error("gateway client error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("provider client error: {0}")]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// Stale socket files from an unclean shutdown would make bind_uds fail.
#[cfg(unix)]
fn cleanup_socket(path: &str) -> std::io::Result<()> {
    let socket_path = Path::new(path);
    if socket_path.exists() {
        fs::remove_file(socket_path)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn cleanup_socket(_path: &str) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    #[cfg(unix)]
    #[actix_web::test]
    async fn cleanup_socket_removes_stale_file() {
        use super::cleanup_socket;

        let path = std::env::temp_dir().join(format!(
            "invite-shop-test-{}-{}.sock",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::SystemTime::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::write(&path, b"stub").expect("write socket file");
        cleanup_socket(path.to_str().unwrap()).expect("cleanup succeeds");
        assert!(!path.exists());
    }
}
