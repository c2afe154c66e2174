//! SeaORM-backed storage adapters that satisfy the domain storage traits
//! while keeping the database backend swappable (SQLite by default,
//! PostgreSQL via feature flag).

mod entity;
mod invite_store;
mod migration;
mod order_store;
mod settings_store;
mod token_store;
mod user_store;

use std::sync::Arc;

use invite_shop_domain::storage::{StorageError, StorageResult};
use migration::run_migrations;
use sea_orm::{Database, DatabaseConnection, DbErr};

/// Shared storage handle used by the HTTP API and the provisioning service.
#[derive(Clone)]
pub struct SeaOrmStorage {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmStorage {
    /// Connects to the provided database URL and ensures the schema is
    /// present.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let db = Database::connect(database_url)
            .await
            .map_err(StorageError::from_source)?;
        run_migrations(&db).await?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }
}

/// Unique-constraint violations are retried (code collisions) or translated
/// (duplicate admin codes); everything else is a hard storage failure.
pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    err.to_string().to_lowercase().contains("unique")
}
