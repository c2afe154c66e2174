use chrono::Utc;
use invite_shop_domain::model::{EnterpriseUserRecord, NewEnterpriseUser};
use invite_shop_domain::storage::{EnterpriseUserStore, StorageError, StorageResult};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};

use crate::entity::enterprise_users;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl EnterpriseUserStore for SeaOrmStorage {
    async fn insert_user(&self, user: NewEnterpriseUser) -> StorageResult<EnterpriseUserRecord> {
        let model = enterprise_users::ActiveModel {
            provider_user_id: Set(user.provider_user_id),
            principal_name: Set(user.principal_name),
            display_name: Set(user.display_name),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        let created = model
            .insert(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(user_to_record(created))
    }

    async fn find_user(&self, id: i32) -> StorageResult<Option<EnterpriseUserRecord>> {
        let maybe = enterprise_users::Entity::find_by_id(id)
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(maybe.map(user_to_record))
    }

    async fn find_user_by_principal(
        &self,
        principal_name: &str,
    ) -> StorageResult<Option<EnterpriseUserRecord>> {
        let maybe = enterprise_users::Entity::find()
            .filter(enterprise_users::Column::PrincipalName.eq(principal_name))
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(maybe.map(user_to_record))
    }
}

pub(crate) fn user_to_record(model: enterprise_users::Model) -> EnterpriseUserRecord {
    EnterpriseUserRecord {
        id: model.id,
        provider_user_id: model.provider_user_id,
        principal_name: model.principal_name,
        display_name: model.display_name,
        created_at: model.created_at,
    }
}
