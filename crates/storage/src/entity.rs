pub mod orders {
    use sea_orm::entity::prelude::*;
    use sea_orm::sea_query::Expr;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "orders")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        #[sea_orm(unique)]
        pub trade_no: String,
        pub amount_cents: i64,
        pub status: OrderStatusDb,
        pub gateway_trade_no: Option<String>,
        pub buyer: Option<String>,
        #[sea_orm(default_expr = "Expr::current_timestamp()")]
        pub created_at: DateTimeUtc,
        #[sea_orm(default_expr = "Expr::current_timestamp()")]
        pub updated_at: DateTimeUtc,
    }

    #[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
    #[sea_orm(rs_type = "i8", db_type = "TinyInteger")]
    pub enum OrderStatusDb {
        #[sea_orm(num_value = 0)]
        Pending,
        #[sea_orm(num_value = 1)]
        Paid,
        #[sea_orm(num_value = 2)]
        Expired,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod invite_codes {
    use sea_orm::entity::prelude::*;
    use sea_orm::sea_query::Expr;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "invite_codes")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        #[sea_orm(unique)]
        pub code: String,
        pub used: bool,
        pub used_at: Option<DateTimeUtc>,
        pub source: CodeSourceDb,
        pub owner: Option<String>,
        #[sea_orm(unique)]
        pub order_id: Option<i32>,
        pub enterprise_user_id: Option<i32>,
        #[sea_orm(default_expr = "Expr::current_timestamp()")]
        pub created_at: DateTimeUtc,
    }

    #[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
    #[sea_orm(rs_type = "i8", db_type = "TinyInteger")]
    pub enum CodeSourceDb {
        #[sea_orm(num_value = 0)]
        Manual,
        #[sea_orm(num_value = 1)]
        Purchase,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::enterprise_users::Entity",
            from = "Column::EnterpriseUserId",
            to = "super::enterprise_users::Column::Id"
        )]
        EnterpriseUser,
    }

    impl Related<super::enterprise_users::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::EnterpriseUser.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod enterprise_users {
    use sea_orm::entity::prelude::*;
    use sea_orm::sea_query::Expr;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "enterprise_users")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        #[sea_orm(unique)]
        pub provider_user_id: String,
        #[sea_orm(unique)]
        pub principal_name: String,
        pub display_name: String,
        #[sea_orm(default_expr = "Expr::current_timestamp()")]
        pub created_at: DateTimeUtc,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod app_settings {
    use sea_orm::entity::prelude::*;
    use sea_orm::sea_query::Expr;

    /// Single mutable row (id = 1), last write wins.
    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "app_settings")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: i32,
        pub client_id: String,
        pub client_secret: String,
        pub license_sku_id: Option<String>,
        pub gateway_merchant_id: String,
        pub gateway_key: String,
        pub gateway_url: String,
        pub invite_price_cents: i64,
        #[sea_orm(default_expr = "Expr::current_timestamp()")]
        pub updated_at: DateTimeUtc,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod provider_tokens {
    use sea_orm::entity::prelude::*;

    /// Current-token cell (id = 1), replaced wholesale on exchange/refresh.
    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "provider_tokens")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: i32,
        pub access_token: String,
        pub refresh_token: Option<String>,
        pub token_type: String,
        pub scope: Option<String>,
        pub expires_at: DateTimeUtc,
        pub obtained_at: DateTimeUtc,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
