use crate::{
    entities::CartItemModel,
    errors::ServiceError,
    repositories::{cart_total, CartRepository, ProductRepository},
};
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Request to add, re-quantify or remove (qty 0) a cart line.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    #[validate(range(min = 0, max = 1000))]
    pub qty: i32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartLine {
    pub product_id: Uuid,
    pub name: String,
    pub image_url: Option<String>,
    pub seller_id: Uuid,
    #[schema(value_type = String, example = "10.00")]
    pub price: Decimal,
    pub qty: i32,
    #[schema(value_type = String, example = "20.00")]
    pub line_total: Decimal,
}

impl From<CartItemModel> for CartLine {
    fn from(item: CartItemModel) -> Self {
        let line_total = item.line_total();
        Self {
            product_id: item.product_id,
            name: item.name,
            image_url: item.image_url,
            seller_id: item.seller_id,
            price: item.price,
            qty: item.qty,
            line_total,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartView {
    pub items: Vec<CartLine>,
    #[schema(value_type = String, example = "25.00")]
    pub total: Decimal,
}

impl CartView {
    fn from_items(items: Vec<CartItemModel>) -> Self {
        let total = cart_total(&items);
        Self {
            items: items.into_iter().map(CartLine::from).collect(),
            total,
        }
    }
}

/// Per-user cart backed by catalog snapshots.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let items = CartRepository::find_cart_items(&*self.db, user_id).await?;
        Ok(CartView::from_items(items))
    }

    /// Sets the quantity of one product in the cart. A quantity of zero
    /// removes the line; otherwise the line is (re)snapshotted from the catalog.
    #[instrument(skip(self, request), fields(user_id = %user_id, product_id = %request.product_id))]
    pub async fn add_to_cart(
        &self,
        user_id: Uuid,
        request: AddToCartRequest,
    ) -> Result<CartView, ServiceError> {
        request.validate()?;
        let db = &*self.db;

        let product = ProductRepository::find_by_id(db, request.product_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", request.product_id))
            })?;

        if request.qty == 0 {
            let removed = CartRepository::delete_line(db, user_id, product.id).await?;
            info!(removed, "cart line removed");
        } else {
            if request.qty > product.stock {
                return Err(ServiceError::BadRequest("stock not available".to_string()));
            }
            CartRepository::upsert_line(db, user_id, &product, request.qty).await?;
            info!(qty = request.qty, "cart line updated");
        }

        self.get_cart(user_id).await
    }
}
