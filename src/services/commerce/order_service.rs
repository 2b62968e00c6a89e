use crate::{
    entities::{OrderItemModel, OrderModel, OrderStatus},
    errors::ServiceError,
    repositories::{OrderRepository, SellerOrderDetails},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderItemView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub image_url: Option<String>,
    pub seller_id: Uuid,
    #[schema(value_type = String, example = "10.00")]
    pub price: Decimal,
    pub qty: i32,
}

impl From<OrderItemModel> for OrderItemView {
    fn from(item: OrderItemModel) -> Self {
        Self {
            id: item.id,
            product_id: item.product_id,
            name: item.name,
            image_url: item.image_url,
            seller_id: item.seller_id,
            price: item.price,
            qty: item.qty,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderView {
    pub id: Uuid,
    pub order_ref: String,
    #[schema(value_type = String, example = "25.00")]
    pub amount: Decimal,
    pub payment_id: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemView>,
}

impl From<(OrderModel, Vec<OrderItemModel>)> for OrderView {
    fn from((order, items): (OrderModel, Vec<OrderItemModel>)) -> Self {
        Self {
            id: order.id,
            order_ref: order.order_ref,
            amount: order.amount,
            payment_id: order.payment_id,
            status: order.status,
            created_at: order.created_at,
            items: items.into_iter().map(OrderItemView::from).collect(),
        }
    }
}

/// Read side of placed orders, for buyers and sellers.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn list_user_orders(&self, user_id: Uuid) -> Result<Vec<OrderView>, ServiceError> {
        let orders = OrderRepository::find_user_orders(&*self.db, user_id).await?;
        Ok(orders.into_iter().map(OrderView::from).collect())
    }

    #[instrument(skip(self))]
    pub async fn get_user_order(
        &self,
        user_id: Uuid,
        order_ref: &str,
    ) -> Result<OrderView, ServiceError> {
        OrderRepository::find_user_order_by_ref(&*self.db, user_id, order_ref)
            .await?
            .map(OrderView::from)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_ref)))
    }

    #[instrument(skip(self))]
    pub async fn list_seller_orders(
        &self,
        seller_id: Uuid,
    ) -> Result<Vec<SellerOrderDetails>, ServiceError> {
        Ok(OrderRepository::find_seller_orders(&*self.db, seller_id).await?)
    }

    /// The seller's lines of one order; 404 when the seller sold nothing in it.
    #[instrument(skip(self))]
    pub async fn get_seller_order(
        &self,
        seller_id: Uuid,
        order_ref: &str,
    ) -> Result<Vec<SellerOrderDetails>, ServiceError> {
        let rows = OrderRepository::find_seller_order(&*self.db, seller_id, order_ref).await?;
        if rows.is_empty() {
            return Err(ServiceError::NotFound(format!(
                "Order {} not found",
                order_ref
            )));
        }
        Ok(rows)
    }
}
