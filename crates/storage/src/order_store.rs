use chrono::Utc;
use invite_shop_domain::model::{
    amount_to_cents, cents_to_amount, generate_invite_code, NewOrder, OrderRecord, OrderStatus,
    SettleOutcome,
};
use invite_shop_domain::storage::{OrderStore, StorageError, StorageResult};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};

use crate::entity::invite_codes::{self, CodeSourceDb};
use crate::entity::orders::{self, OrderStatusDb};
use crate::invite_store::invite_to_record;
use crate::{is_unique_violation, SeaOrmStorage};

const MAX_COLLISION_RETRIES: u32 = 16;

#[async_trait::async_trait]
impl OrderStore for SeaOrmStorage {
    async fn create_order(&self, order: NewOrder) -> StorageResult<OrderRecord> {
        let now = Utc::now();
        let model = orders::ActiveModel {
            trade_no: Set(order.trade_no),
            amount_cents: Set(amount_to_cents(order.amount)),
            status: Set(OrderStatusDb::Pending),
            buyer: Set(order.buyer),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        let created = model
            .insert(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(order_to_record(created))
    }

    async fn find_order(&self, trade_no: &str) -> StorageResult<Option<OrderRecord>> {
        let maybe = orders::Entity::find()
            .filter(orders::Column::TradeNo.eq(trade_no))
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(maybe.map(order_to_record))
    }

    async fn record_gateway_trade_no(
        &self,
        order_id: i32,
        gateway_trade_no: &str,
    ) -> StorageResult<()> {
        orders::Entity::update_many()
            .col_expr(
                orders::Column::GatewayTradeNo,
                Expr::value(gateway_trade_no),
            )
            .col_expr(orders::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(orders::Column::Id.eq(order_id))
            .exec(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(())
    }

    async fn expire_order(&self, order_id: i32) -> StorageResult<bool> {
        let result = orders::Entity::update_many()
            .col_expr(orders::Column::Status, Expr::value(OrderStatusDb::Expired))
            .col_expr(orders::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(orders::Column::Id.eq(order_id))
            .filter(orders::Column::Status.eq(OrderStatusDb::Pending))
            .exec(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(result.rows_affected > 0)
    }

    async fn settle_order(
        &self,
        order_id: i32,
        gateway_trade_no: &str,
    ) -> StorageResult<SettleOutcome> {
        let txn = self
            .connection()
            .begin()
            .await
            .map_err(StorageError::from_source)?;

        // The one place true atomicity is required: the status flip and the
        // code issuance either both land or neither does.
        let flip = orders::Entity::update_many()
            .col_expr(orders::Column::Status, Expr::value(OrderStatusDb::Paid))
            .col_expr(
                orders::Column::GatewayTradeNo,
                Expr::value(gateway_trade_no),
            )
            .col_expr(orders::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(orders::Column::Id.eq(order_id))
            .filter(orders::Column::Status.ne(OrderStatusDb::Paid))
            .exec(&txn)
            .await
            .map_err(StorageError::from_source)?;
        let newly_paid = flip.rows_affected > 0;

        let order = orders::Entity::find_by_id(order_id)
            .one(&txn)
            .await
            .map_err(StorageError::from_source)?
            .ok_or_else(|| StorageError::Database(format!("order {order_id} vanished")))?;

        let code = match existing_code(&txn, order_id).await? {
            Some(existing) => existing,
            None => issue_purchase_code(&txn, &order).await?,
        };

        txn.commit().await.map_err(StorageError::from_source)?;

        Ok(SettleOutcome {
            order: order_to_record(order),
            code: Some(code),
            newly_paid,
        })
    }

    async fn code_for_order(
        &self,
        order_id: i32,
    ) -> StorageResult<Option<invite_shop_domain::model::InviteCodeRecord>> {
        let maybe = invite_codes::Entity::find()
            .filter(invite_codes::Column::OrderId.eq(order_id))
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(maybe.map(invite_to_record))
    }
}

async fn existing_code<C: ConnectionTrait>(
    conn: &C,
    order_id: i32,
) -> StorageResult<Option<String>> {
    let maybe = invite_codes::Entity::find()
        .filter(invite_codes::Column::OrderId.eq(order_id))
        .one(conn)
        .await
        .map_err(StorageError::from_source)?;
    Ok(maybe.map(|model| model.code))
}

/// Issues the purchase code for a freshly paid order. A unique violation can
/// mean either a code collision (regenerate) or a concurrent settle having
/// bound this order already (return its code).
async fn issue_purchase_code<C: ConnectionTrait>(
    conn: &C,
    order: &orders::Model,
) -> StorageResult<String> {
    for _ in 0..MAX_COLLISION_RETRIES {
        let code = generate_invite_code();
        let model = invite_codes::ActiveModel {
            code: Set(code.clone()),
            used: Set(false),
            source: Set(CodeSourceDb::Purchase),
            owner: Set(order.buyer.clone()),
            order_id: Set(Some(order.id)),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        match model.insert(conn).await {
            Ok(_) => return Ok(code),
            Err(err) if is_unique_violation(&err) => {
                if let Some(existing) = existing_code(conn, order.id).await? {
                    return Ok(existing);
                }
                continue;
            }
            Err(err) => return Err(StorageError::from_source(err)),
        }
    }
    Err(StorageError::Database(
        "exhausted invite code regeneration attempts".into(),
    ))
}

pub(crate) fn order_to_record(model: orders::Model) -> OrderRecord {
    OrderRecord {
        id: model.id,
        trade_no: model.trade_no,
        amount: cents_to_amount(model.amount_cents),
        status: match model.status {
            OrderStatusDb::Pending => OrderStatus::Pending,
            OrderStatusDb::Paid => OrderStatus::Paid,
            OrderStatusDb::Expired => OrderStatus::Expired,
        },
        gateway_trade_no: model.gateway_trade_no,
        buyer: model.buyer,
        created_at: model.created_at,
        updated_at: model.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    async fn storage() -> SeaOrmStorage {
        SeaOrmStorage::connect("sqlite::memory:")
            .await
            .expect("storage inits")
    }

    fn order(trade_no: &str) -> NewOrder {
        NewOrder {
            trade_no: trade_no.into(),
            amount: Decimal::new(1000, 2),
            buyer: Some("buyer-1".into()),
        }
    }

    #[tokio::test]
    async fn settle_flips_status_and_issues_one_code() {
        let storage = storage().await;
        let created = storage.create_order(order("ORD1")).await.unwrap();
        assert_eq!(created.status, OrderStatus::Pending);

        let outcome = storage.settle_order(created.id, "T1").await.unwrap();
        assert!(outcome.newly_paid);
        assert_eq!(outcome.order.status, OrderStatus::Paid);
        assert_eq!(outcome.order.gateway_trade_no.as_deref(), Some("T1"));
        let code = outcome.code.expect("code issued");

        let bound = storage
            .code_for_order(created.id)
            .await
            .unwrap()
            .expect("code bound to order");
        assert_eq!(bound.code, code);
        assert_eq!(bound.owner.as_deref(), Some("buyer-1"));
    }

    #[tokio::test]
    async fn settling_twice_reuses_the_same_code() {
        let storage = storage().await;
        let created = storage.create_order(order("ORD2")).await.unwrap();

        let first = storage.settle_order(created.id, "T1").await.unwrap();
        let second = storage.settle_order(created.id, "T1").await.unwrap();
        assert!(first.newly_paid);
        assert!(!second.newly_paid);
        assert_eq!(first.code, second.code);
    }

    #[tokio::test]
    async fn concurrent_settles_agree_on_one_code() {
        let storage = storage().await;
        let created = storage.create_order(order("ORD3")).await.unwrap();

        let (a, b) = tokio::join!(
            storage.settle_order(created.id, "T1"),
            storage.settle_order(created.id, "T1"),
        );
        let a = a.unwrap();
        let b = b.unwrap();
        assert_eq!(a.code, b.code);
        // Exactly one of the two performed the transition.
        assert!(a.newly_paid ^ b.newly_paid);
    }

    #[tokio::test]
    async fn expire_only_touches_pending_orders() {
        let storage = storage().await;
        let created = storage.create_order(order("ORD4")).await.unwrap();
        assert!(storage.expire_order(created.id).await.unwrap());
        assert!(!storage.expire_order(created.id).await.unwrap());

        // A late settlement still wins over expiry.
        let outcome = storage.settle_order(created.id, "T9").await.unwrap();
        assert!(outcome.newly_paid);
        assert_eq!(outcome.order.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn paid_orders_never_expire() {
        let storage = storage().await;
        let created = storage.create_order(order("ORD5")).await.unwrap();
        storage.settle_order(created.id, "T1").await.unwrap();
        assert!(!storage.expire_order(created.id).await.unwrap());
        let reread = storage.find_order("ORD5").await.unwrap().unwrap();
        assert_eq!(reread.status, OrderStatus::Paid);
    }
}
