use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::{ActiveModel as OrderActiveModel, Column};
use crate::entities::order_item::{self, ActiveModel as OrderItemActiveModel};
use crate::entities::{
    CartItemModel, Order, OrderItem, OrderItemModel, OrderModel, OrderStatus,
};

#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    pub name: String,
    pub image_url: Option<String>,
    pub seller_id: Uuid,
    pub price: Decimal,
    pub qty: i32,
}

impl From<&CartItemModel> for NewOrderItem {
    fn from(line: &CartItemModel) -> Self {
        Self {
            product_id: line.product_id,
            name: line.name.clone(),
            image_url: line.image_url.clone(),
            seller_id: line.seller_id,
            price: line.price,
            qty: line.qty,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_ref: String,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub payment_id: String,
    pub items: Vec<NewOrderItem>,
}

/// One order line as seen by the seller who sold it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SellerOrderDetails {
    pub order_id: Uuid,
    pub order_ref: String,
    pub order_status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub order_item_id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub image_url: Option<String>,
    #[schema(value_type = String, example = "10.00")]
    pub price: Decimal,
    pub qty: i32,
    pub customer_id: Uuid,
}

impl SellerOrderDetails {
    fn from_parts(item: OrderItemModel, order: OrderModel) -> Self {
        Self {
            order_id: order.id,
            order_ref: order.order_ref,
            order_status: order.status,
            created_at: order.created_at,
            order_item_id: item.id,
            product_id: item.product_id,
            name: item.name,
            image_url: item.image_url,
            price: item.price,
            qty: item.qty,
            customer_id: order.user_id,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OrderRepository;

impl OrderRepository {
    /// Inserts the order and its items. Callers run this inside the
    /// transaction that also clears the cart and settles the ledger.
    pub async fn create_order<C: ConnectionTrait>(
        db: &C,
        new: NewOrder,
    ) -> Result<(OrderModel, Vec<OrderItemModel>), DbErr> {
        let now = Utc::now();
        let order = OrderActiveModel {
            id: Set(Uuid::new_v4()),
            order_ref: Set(new.order_ref),
            user_id: Set(new.user_id),
            amount: Set(new.amount),
            payment_id: Set(new.payment_id),
            status: Set(OrderStatus::Confirmed),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await?;

        let mut items = Vec::with_capacity(new.items.len());
        for item in new.items {
            let saved = OrderItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(item.product_id),
                name: Set(item.name),
                image_url: Set(item.image_url),
                seller_id: Set(item.seller_id),
                price: Set(item.price),
                qty: Set(item.qty),
                created_at: Set(now),
            }
            .insert(db)
            .await?;
            items.push(saved);
        }

        Ok((order, items))
    }

    pub async fn find_by_order_ref<C: ConnectionTrait>(
        db: &C,
        order_ref: &str,
    ) -> Result<Option<OrderModel>, DbErr> {
        Order::find()
            .filter(Column::OrderRef.eq(order_ref))
            .one(db)
            .await
    }

    /// Buyer's orders, newest first, with their items.
    pub async fn find_user_orders<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
    ) -> Result<Vec<(OrderModel, Vec<OrderItemModel>)>, DbErr> {
        Order::find()
            .filter(Column::UserId.eq(user_id))
            .order_by_desc(Column::CreatedAt)
            .find_with_related(OrderItem)
            .all(db)
            .await
    }

    pub async fn find_user_order_by_ref<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
        order_ref: &str,
    ) -> Result<Option<(OrderModel, Vec<OrderItemModel>)>, DbErr> {
        let mut found = Order::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::OrderRef.eq(order_ref))
            .find_with_related(OrderItem)
            .all(db)
            .await?;
        Ok(found.pop())
    }

    /// Every order line sold by `seller_id`, newest order first.
    pub async fn find_seller_orders<C: ConnectionTrait>(
        db: &C,
        seller_id: Uuid,
    ) -> Result<Vec<SellerOrderDetails>, DbErr> {
        let rows = OrderItem::find()
            .filter(order_item::Column::SellerId.eq(seller_id))
            .find_also_related(Order)
            .order_by_desc(Column::CreatedAt)
            .order_by_asc(order_item::Column::Id)
            .all(db)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(item, order)| order.map(|o| SellerOrderDetails::from_parts(item, o)))
            .collect())
    }

    /// The seller's lines of a single order; empty when the seller sold nothing in it.
    pub async fn find_seller_order<C: ConnectionTrait>(
        db: &C,
        seller_id: Uuid,
        order_ref: &str,
    ) -> Result<Vec<SellerOrderDetails>, DbErr> {
        let rows = OrderItem::find()
            .filter(order_item::Column::SellerId.eq(seller_id))
            .find_also_related(Order)
            .filter(Column::OrderRef.eq(order_ref))
            .order_by_asc(order_item::Column::Id)
            .all(db)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(item, order)| order.map(|o| SellerOrderDetails::from_parts(item, o)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use crate::repositories::payment_repository::is_unique_violation;
    use rust_decimal_macros::dec;

    fn line(seller_id: Uuid, price: Decimal, qty: i32) -> NewOrderItem {
        NewOrderItem {
            product_id: Uuid::new_v4(),
            name: "Lamp".to_string(),
            image_url: None,
            seller_id,
            price,
            qty,
        }
    }

    #[tokio::test]
    async fn seller_sees_only_their_lines() {
        let db = connect_in_memory().await.unwrap();
        let (buyer, seller_a, seller_b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let (order, items) = OrderRepository::create_order(
            &db,
            NewOrder {
                order_ref: "ref-1".to_string(),
                user_id: buyer,
                amount: dec!(25.00),
                payment_id: "pi_1".to_string(),
                items: vec![line(seller_a, dec!(10.00), 2), line(seller_b, dec!(5.00), 1)],
            },
        )
        .await
        .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(order.status, OrderStatus::Confirmed);

        let rows = OrderRepository::find_seller_orders(&db, seller_a).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].customer_id, buyer);
        assert_eq!(rows[0].qty, 2);

        let single = OrderRepository::find_seller_order(&db, seller_b, "ref-1")
            .await
            .unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].price, dec!(5.00));

        assert!(OrderRepository::find_seller_order(&db, Uuid::new_v4(), "ref-1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn order_ref_is_unique() {
        let db = connect_in_memory().await.unwrap();
        let new = || NewOrder {
            order_ref: "ref-dup".to_string(),
            user_id: Uuid::new_v4(),
            amount: dec!(1.00),
            payment_id: "pi_dup".to_string(),
            items: vec![],
        };

        OrderRepository::create_order(&db, new()).await.unwrap();
        let err = OrderRepository::create_order(&db, new()).await.unwrap_err();
        assert!(is_unique_violation(&err));
    }
}
