use sea_orm::sea_query::{ColumnDef, Expr, Table, TableCreateStatement};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection};

use crate::entity::{app_settings, enterprise_users, invite_codes, orders, provider_tokens};
use invite_shop_domain::storage::StorageResult;

pub async fn run_migrations(db: &DatabaseConnection) -> StorageResult<()> {
    let backend = db.get_database_backend();

    let orders_table = Table::create()
        .if_not_exists()
        .table(orders::Entity)
        .col(
            ColumnDef::new(orders::Column::Id)
                .integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(orders::Column::TradeNo)
                .string_len(64)
                .not_null()
                .unique_key(),
        )
        .col(
            ColumnDef::new(orders::Column::AmountCents)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(orders::Column::Status)
                .tiny_integer()
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new(orders::Column::GatewayTradeNo)
                .string_len(64)
                .null(),
        )
        .col(ColumnDef::new(orders::Column::Buyer).string_len(128).null())
        .col(
            ColumnDef::new(orders::Column::CreatedAt)
                .date_time()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(
            ColumnDef::new(orders::Column::UpdatedAt)
                .date_time()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .to_owned();
    create_table(db, backend, orders_table).await?;

    let invite_codes_table = Table::create()
        .if_not_exists()
        .table(invite_codes::Entity)
        .col(
            ColumnDef::new(invite_codes::Column::Id)
                .integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(invite_codes::Column::Code)
                .string_len(16)
                .not_null()
                .unique_key(),
        )
        .col(
            ColumnDef::new(invite_codes::Column::Used)
                .boolean()
                .not_null()
                .default(false),
        )
        .col(
            ColumnDef::new(invite_codes::Column::UsedAt)
                .date_time()
                .null(),
        )
        .col(
            ColumnDef::new(invite_codes::Column::Source)
                .tiny_integer()
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new(invite_codes::Column::Owner)
                .string_len(128)
                .null(),
        )
        .col(
            ColumnDef::new(invite_codes::Column::OrderId)
                .integer()
                .null()
                .unique_key(),
        )
        .col(
            ColumnDef::new(invite_codes::Column::EnterpriseUserId)
                .integer()
                .null(),
        )
        .col(
            ColumnDef::new(invite_codes::Column::CreatedAt)
                .date_time()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .to_owned();
    create_table(db, backend, invite_codes_table).await?;

    let enterprise_users_table = Table::create()
        .if_not_exists()
        .table(enterprise_users::Entity)
        .col(
            ColumnDef::new(enterprise_users::Column::Id)
                .integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(enterprise_users::Column::ProviderUserId)
                .string_len(64)
                .not_null()
                .unique_key(),
        )
        .col(
            ColumnDef::new(enterprise_users::Column::PrincipalName)
                .string_len(256)
                .not_null()
                .unique_key(),
        )
        .col(
            ColumnDef::new(enterprise_users::Column::DisplayName)
                .string_len(256)
                .not_null(),
        )
        .col(
            ColumnDef::new(enterprise_users::Column::CreatedAt)
                .date_time()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .to_owned();
    create_table(db, backend, enterprise_users_table).await?;

    let app_settings_table = Table::create()
        .if_not_exists()
        .table(app_settings::Entity)
        .col(
            ColumnDef::new(app_settings::Column::Id)
                .integer()
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(app_settings::Column::ClientId)
                .string_len(128)
                .not_null(),
        )
        .col(
            ColumnDef::new(app_settings::Column::ClientSecret)
                .string_len(256)
                .not_null(),
        )
        .col(
            ColumnDef::new(app_settings::Column::LicenseSkuId)
                .string_len(64)
                .null(),
        )
        .col(
            ColumnDef::new(app_settings::Column::GatewayMerchantId)
                .string_len(64)
                .not_null(),
        )
        .col(
            ColumnDef::new(app_settings::Column::GatewayKey)
                .string_len(128)
                .not_null(),
        )
        .col(
            ColumnDef::new(app_settings::Column::GatewayUrl)
                .string_len(256)
                .not_null(),
        )
        .col(
            ColumnDef::new(app_settings::Column::InvitePriceCents)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(app_settings::Column::UpdatedAt)
                .date_time()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .to_owned();
    create_table(db, backend, app_settings_table).await?;

    let provider_tokens_table = Table::create()
        .if_not_exists()
        .table(provider_tokens::Entity)
        .col(
            ColumnDef::new(provider_tokens::Column::Id)
                .integer()
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(provider_tokens::Column::AccessToken)
                .text()
                .not_null(),
        )
        .col(
            ColumnDef::new(provider_tokens::Column::RefreshToken)
                .text()
                .null(),
        )
        .col(
            ColumnDef::new(provider_tokens::Column::TokenType)
                .string_len(32)
                .not_null(),
        )
        .col(
            ColumnDef::new(provider_tokens::Column::Scope)
                .string_len(512)
                .null(),
        )
        .col(
            ColumnDef::new(provider_tokens::Column::ExpiresAt)
                .date_time()
                .not_null(),
        )
        .col(
            ColumnDef::new(provider_tokens::Column::ObtainedAt)
                .date_time()
                .not_null(),
        )
        .to_owned();
    create_table(db, backend, provider_tokens_table).await?;

    Ok(())
}

async fn create_table(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    mut statement: TableCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(invite_shop_domain::storage::StorageError::from_source)?;
    Ok(())
}
