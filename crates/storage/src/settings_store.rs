use chrono::Utc;
use invite_shop_domain::model::{amount_to_cents, cents_to_amount, AppSettings};
use invite_shop_domain::storage::{SettingsStore, StorageError, StorageResult};
use sea_orm::sea_query::OnConflict;
use sea_orm::{EntityTrait, Set};

use crate::entity::app_settings;
use crate::SeaOrmStorage;

/// Fixed id of the single settings row.
const SETTINGS_ROW: i32 = 1;

#[async_trait::async_trait]
impl SettingsStore for SeaOrmStorage {
    async fn load_settings(&self) -> StorageResult<Option<AppSettings>> {
        let maybe = app_settings::Entity::find_by_id(SETTINGS_ROW)
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(maybe.map(|model| AppSettings {
            client_id: model.client_id,
            client_secret: model.client_secret,
            license_sku_id: model.license_sku_id,
            gateway_merchant_id: model.gateway_merchant_id,
            gateway_key: model.gateway_key,
            gateway_url: model.gateway_url,
            invite_price: cents_to_amount(model.invite_price_cents),
        }))
    }

    async fn save_settings(&self, settings: &AppSettings) -> StorageResult<()> {
        let model = app_settings::ActiveModel {
            id: Set(SETTINGS_ROW),
            client_id: Set(settings.client_id.clone()),
            client_secret: Set(settings.client_secret.clone()),
            license_sku_id: Set(settings.license_sku_id.clone()),
            gateway_merchant_id: Set(settings.gateway_merchant_id.clone()),
            gateway_key: Set(settings.gateway_key.clone()),
            gateway_url: Set(settings.gateway_url.clone()),
            invite_price_cents: Set(amount_to_cents(settings.invite_price)),
            updated_at: Set(Utc::now()),
        };
        app_settings::Entity::insert(model)
            .on_conflict(
                OnConflict::column(app_settings::Column::Id)
                    .update_columns([
                        app_settings::Column::ClientId,
                        app_settings::Column::ClientSecret,
                        app_settings::Column::LicenseSkuId,
                        app_settings::Column::GatewayMerchantId,
                        app_settings::Column::GatewayKey,
                        app_settings::Column::GatewayUrl,
                        app_settings::Column::InvitePriceCents,
                        app_settings::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn settings(price_cents: i64) -> AppSettings {
        AppSettings {
            client_id: "cid".into(),
            client_secret: "secret".into(),
            license_sku_id: Some("sku-1".into()),
            gateway_merchant_id: "1001".into(),
            gateway_key: "gw-key".into(),
            gateway_url: "https://pay.example.com".into(),
            invite_price: cents_to_amount(price_cents),
        }
    }

    #[tokio::test]
    async fn save_is_last_write_wins() {
        let storage = SeaOrmStorage::connect("sqlite::memory:").await.unwrap();
        assert!(storage.load_settings().await.unwrap().is_none());

        storage.save_settings(&settings(1000)).await.unwrap();
        storage.save_settings(&settings(2550)).await.unwrap();

        let loaded = storage.load_settings().await.unwrap().expect("row exists");
        assert_eq!(loaded.invite_price, Decimal::new(2550, 2));
        assert_eq!(loaded.license_sku_id.as_deref(), Some("sku-1"));
    }
}
