use std::sync::Arc;

use chrono::Duration;
use invite_shop_domain::services::{AbuseTracker, SettingsCache, TelemetryGuard};
use invite_shop_gateway::PaymentGateway;
use invite_shop_provider::ProvisioningService;
use invite_shop_storage::SeaOrmStorage;

#[derive(Clone)]
pub struct AppState {
    storage: SeaOrmStorage,
    gateway: Arc<dyn PaymentGateway>,
    provisioning: Arc<ProvisioningService>,
    settings_cache: Arc<SettingsCache>,
    telemetry: TelemetryGuard,
    abuse_tracker: AbuseTracker,
    public_base_url: String,
    pending_order_ttl: Duration,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: SeaOrmStorage,
        gateway: Arc<dyn PaymentGateway>,
        provisioning: Arc<ProvisioningService>,
        settings_cache: Arc<SettingsCache>,
        telemetry: TelemetryGuard,
        abuse_tracker: AbuseTracker,
        public_base_url: String,
        pending_order_ttl: Duration,
    ) -> Self {
        Self {
            storage,
            gateway,
            provisioning,
            settings_cache,
            telemetry,
            abuse_tracker,
            public_base_url,
            pending_order_ttl,
        }
    }

    pub fn storage(&self) -> &SeaOrmStorage {
        &self.storage
    }

    pub fn gateway(&self) -> &dyn PaymentGateway {
        self.gateway.as_ref()
    }

    pub fn provisioning(&self) -> &ProvisioningService {
        self.provisioning.as_ref()
    }

    pub fn settings_cache(&self) -> &SettingsCache {
        self.settings_cache.as_ref()
    }

    pub fn telemetry(&self) -> &TelemetryGuard {
        &self.telemetry
    }

    pub fn abuse_tracker(&self) -> &AbuseTracker {
        &self.abuse_tracker
    }

    pub fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    pub fn pending_order_ttl(&self) -> Duration {
        self.pending_order_ttl
    }
}
