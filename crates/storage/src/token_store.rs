use chrono::Utc;
use invite_shop_domain::model::{NewProviderToken, ProviderTokenRecord};
use invite_shop_domain::storage::{ProviderTokenStore, StorageError, StorageResult};
use sea_orm::sea_query::OnConflict;
use sea_orm::{EntityTrait, Set};

use crate::entity::provider_tokens;
use crate::SeaOrmStorage;

/// Fixed id of the single token cell.
const TOKEN_ROW: i32 = 1;

#[async_trait::async_trait]
impl ProviderTokenStore for SeaOrmStorage {
    async fn current_token(&self) -> StorageResult<Option<ProviderTokenRecord>> {
        let maybe = provider_tokens::Entity::find_by_id(TOKEN_ROW)
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(maybe.map(token_to_record))
    }

    async fn replace_token(&self, token: NewProviderToken) -> StorageResult<ProviderTokenRecord> {
        let obtained_at = Utc::now();
        let model = provider_tokens::ActiveModel {
            id: Set(TOKEN_ROW),
            access_token: Set(token.access_token),
            refresh_token: Set(token.refresh_token),
            token_type: Set(token.token_type),
            scope: Set(token.scope),
            expires_at: Set(token.expires_at),
            obtained_at: Set(obtained_at),
        };
        provider_tokens::Entity::insert(model)
            .on_conflict(
                OnConflict::column(provider_tokens::Column::Id)
                    .update_columns([
                        provider_tokens::Column::AccessToken,
                        provider_tokens::Column::RefreshToken,
                        provider_tokens::Column::TokenType,
                        provider_tokens::Column::Scope,
                        provider_tokens::Column::ExpiresAt,
                        provider_tokens::Column::ObtainedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(StorageError::from_source)?;

        self.current_token()
            .await?
            .ok_or_else(|| StorageError::Database("token cell missing after replace".into()))
    }
}

fn token_to_record(model: provider_tokens::Model) -> ProviderTokenRecord {
    ProviderTokenRecord {
        access_token: model.access_token,
        refresh_token: model.refresh_token,
        token_type: model.token_type,
        scope: model.scope,
        expires_at: model.expires_at,
        obtained_at: model.obtained_at,
    }
}
