use chrono::Utc;
use invite_shop_domain::model::{
    generate_invite_code, CodeSource, InviteCodeRecord, InviteFilter, InviteListEntry,
};
use invite_shop_domain::storage::{InviteStore, StorageError, StorageResult};
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};

use crate::entity::invite_codes::{self, CodeSourceDb};
use crate::user_store::user_to_record;
use crate::{is_unique_violation, SeaOrmStorage};

/// Upper bound on regeneration attempts per code. The space is ~2.2 billion
/// codes, so hitting this means something other than bad luck.
const MAX_COLLISION_RETRIES: u32 = 16;

#[async_trait::async_trait]
impl InviteStore for SeaOrmStorage {
    async fn allocate_codes(&self, count: u32, owner: Option<&str>) -> StorageResult<Vec<String>> {
        let mut created = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let code = self.insert_fresh_code(owner).await?;
            created.push(code);
        }
        Ok(created)
    }

    async fn create_code(
        &self,
        code: &str,
        owner: Option<&str>,
    ) -> StorageResult<InviteCodeRecord> {
        let model = invite_codes::ActiveModel {
            code: Set(code.to_owned()),
            used: Set(false),
            source: Set(CodeSourceDb::Manual),
            owner: Set(owner.map(str::to_owned)),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        match model.insert(self.connection()).await {
            Ok(created) => Ok(invite_to_record(created)),
            Err(err) if is_unique_violation(&err) => {
                Err(StorageError::DuplicateCode(code.to_owned()))
            }
            Err(err) => Err(StorageError::from_source(err)),
        }
    }

    async fn find_code(&self, code: &str) -> StorageResult<Option<InviteCodeRecord>> {
        let maybe = invite_codes::Entity::find()
            .filter(invite_codes::Column::Code.eq(code))
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(maybe.map(invite_to_record))
    }

    async fn mark_code_used(
        &self,
        invite_id: i32,
        enterprise_user_id: i32,
    ) -> StorageResult<bool> {
        let result = invite_codes::Entity::update_many()
            .col_expr(invite_codes::Column::Used, Expr::value(true))
            .col_expr(invite_codes::Column::UsedAt, Expr::value(Utc::now()))
            .col_expr(
                invite_codes::Column::EnterpriseUserId,
                Expr::value(enterprise_user_id),
            )
            .filter(invite_codes::Column::Id.eq(invite_id))
            .filter(invite_codes::Column::Used.eq(false))
            .exec(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(result.rows_affected > 0)
    }

    async fn delete_code(&self, invite_id: i32) -> StorageResult<bool> {
        let result = invite_codes::Entity::delete_by_id(invite_id)
            .exec(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(result.rows_affected > 0)
    }

    async fn list_codes(&self, filter: InviteFilter) -> StorageResult<Vec<InviteListEntry>> {
        let mut query = invite_codes::Entity::find();
        if let Some(source) = filter.source {
            query = query.filter(invite_codes::Column::Source.eq(source_to_db(source)));
        }
        if let Some(used) = filter.used {
            query = query.filter(invite_codes::Column::Used.eq(used));
        }
        let rows = query
            .order_by_desc(invite_codes::Column::CreatedAt)
            .order_by_desc(invite_codes::Column::Id)
            .find_also_related(crate::entity::enterprise_users::Entity)
            .all(self.connection())
            .await
            .map_err(StorageError::from_source)?;

        Ok(rows
            .into_iter()
            .map(|(invite, user)| InviteListEntry {
                invite: invite_to_record(invite),
                enterprise_user: user.map(user_to_record),
            })
            .collect())
    }
}

impl SeaOrmStorage {
    /// Inserts one freshly generated code, regenerating on a code collision
    /// without touching codes already committed in this batch.
    async fn insert_fresh_code(&self, owner: Option<&str>) -> StorageResult<String> {
        for _ in 0..MAX_COLLISION_RETRIES {
            let code = generate_invite_code();
            let model = invite_codes::ActiveModel {
                code: Set(code.clone()),
                used: Set(false),
                source: Set(CodeSourceDb::Manual),
                owner: Set(owner.map(str::to_owned)),
                created_at: Set(Utc::now()),
                ..Default::default()
            };
            match model.insert(self.connection()).await {
                Ok(_) => return Ok(code),
                Err(err) if is_unique_violation(&err) => continue,
                Err(err) => return Err(StorageError::from_source(err)),
            }
        }
        Err(StorageError::Database(
            "exhausted invite code regeneration attempts".into(),
        ))
    }
}

pub(crate) fn invite_to_record(model: invite_codes::Model) -> InviteCodeRecord {
    InviteCodeRecord {
        id: model.id,
        code: model.code,
        used: model.used,
        used_at: model.used_at,
        source: match model.source {
            CodeSourceDb::Manual => CodeSource::Manual,
            CodeSourceDb::Purchase => CodeSource::Purchase,
        },
        owner: model.owner,
        order_id: model.order_id,
        enterprise_user_id: model.enterprise_user_id,
        created_at: model.created_at,
    }
}

pub(crate) fn source_to_db(source: CodeSource) -> CodeSourceDb {
    match source {
        CodeSource::Manual => CodeSourceDb::Manual,
        CodeSource::Purchase => CodeSourceDb::Purchase,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invite_shop_domain::model::validate_invite_code;
    use std::collections::HashSet;

    async fn storage() -> SeaOrmStorage {
        SeaOrmStorage::connect("sqlite::memory:")
            .await
            .expect("storage inits")
    }

    #[tokio::test]
    async fn allocate_returns_distinct_unused_codes() {
        let storage = storage().await;
        let codes = storage.allocate_codes(5, None).await.unwrap();
        assert_eq!(codes.len(), 5);
        assert_eq!(codes.iter().collect::<HashSet<_>>().len(), 5);
        for code in &codes {
            validate_invite_code(code).expect("allocated code validates");
            let record = storage.find_code(code).await.unwrap().expect("persisted");
            assert!(!record.used);
            assert!(record.used_at.is_none());
            assert_eq!(record.source, CodeSource::Manual);
        }
    }

    #[tokio::test]
    async fn exact_code_creation_detects_duplicates() {
        let storage = storage().await;
        storage.create_code("INV-FIXED1", None).await.unwrap();
        let err = storage.create_code("INV-FIXED1", None).await.unwrap_err();
        assert_eq!(err, StorageError::DuplicateCode("INV-FIXED1".into()));
    }

    #[tokio::test]
    async fn mark_used_is_single_shot() {
        let storage = storage().await;
        let record = storage.create_code("INV-ONCE01", None).await.unwrap();
        assert!(storage.mark_code_used(record.id, 7).await.unwrap());
        // Second attempt loses the conditional update.
        assert!(!storage.mark_code_used(record.id, 8).await.unwrap());

        let reread = storage
            .find_code("INV-ONCE01")
            .await
            .unwrap()
            .expect("still present");
        assert!(reread.used);
        assert!(reread.used_at.is_some());
        assert_eq!(reread.enterprise_user_id, Some(7));
    }

    #[tokio::test]
    async fn delete_reports_row_presence() {
        let storage = storage().await;
        let record = storage.create_code("INV-GONE01", None).await.unwrap();
        assert!(storage.delete_code(record.id).await.unwrap());
        assert!(!storage.delete_code(record.id).await.unwrap());
        assert!(storage.find_code("INV-GONE01").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn listing_filters_by_used_state() {
        let storage = storage().await;
        let used = storage.create_code("INV-USED01", None).await.unwrap();
        storage.create_code("INV-FRESH1", None).await.unwrap();
        storage.mark_code_used(used.id, 1).await.unwrap();

        let unused = storage
            .list_codes(InviteFilter {
                used: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(unused.len(), 1);
        assert_eq!(unused[0].invite.code, "INV-FRESH1");

        let all = storage.list_codes(InviteFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
