use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::entities::cart_item::{self, ActiveModel as CartItemActiveModel, Column};
use crate::entities::{CartItem, CartItemModel, ProductModel};

/// Sum of `price * qty` over the snapshotted line prices.
pub fn cart_total(items: &[CartItemModel]) -> Decimal {
    items.iter().map(CartItemModel::line_total).sum()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CartRepository;

impl CartRepository {
    pub async fn find_cart_items<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
    ) -> Result<Vec<CartItemModel>, DbErr> {
        CartItem::find()
            .filter(Column::UserId.eq(user_id))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::ProductId)
            .all(db)
            .await
    }

    pub async fn find_cart_item<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<CartItemModel>, DbErr> {
        CartItem::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::ProductId.eq(product_id))
            .one(db)
            .await
    }

    /// Sets the line for `product` to `qty`, re-snapshotting name, image and price.
    pub async fn upsert_line<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
        product: &ProductModel,
        qty: i32,
    ) -> Result<CartItemModel, DbErr> {
        let now = Utc::now();
        match Self::find_cart_item(db, user_id, product.id).await? {
            Some(existing) => {
                let mut line = existing.into_active_model();
                line.qty = Set(qty);
                line.name = Set(product.name.clone());
                line.image_url = Set(product.image_url.clone());
                line.seller_id = Set(product.seller_id);
                line.price = Set(product.price);
                line.updated_at = Set(now);
                line.update(db).await
            }
            None => {
                CartItemActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    product_id: Set(product.id),
                    name: Set(product.name.clone()),
                    image_url: Set(product.image_url.clone()),
                    seller_id: Set(product.seller_id),
                    price: Set(product.price),
                    qty: Set(qty),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(db)
                .await
            }
        }
    }

    pub async fn delete_line<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<u64, DbErr> {
        let result = CartItem::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(db)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn delete_cart_items<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
    ) -> Result<u64, DbErr> {
        let result = CartItem::delete_many()
            .filter(Column::UserId.eq(user_id))
            .exec(db)
            .await?;
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use crate::entities::product::ActiveModel as ProductActiveModel;
    use rust_decimal_macros::dec;

    async fn seed_product(db: &sea_orm::DatabaseConnection, price: Decimal) -> ProductModel {
        let now = Utc::now();
        ProductActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Widget".to_string()),
            description: Set(None),
            image_url: Set(Some("https://img.example.com/w.png".to_string())),
            price: Set(price),
            seller_id: Set(Uuid::new_v4()),
            stock: Set(10),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn upsert_replaces_quantity_and_resnapshots_price() {
        let db = connect_in_memory().await.unwrap();
        let user_id = Uuid::new_v4();
        let mut product = seed_product(&db, dec!(10.00)).await;

        CartRepository::upsert_line(&db, user_id, &product, 2).await.unwrap();
        product.price = dec!(12.50);
        let line = CartRepository::upsert_line(&db, user_id, &product, 3).await.unwrap();

        assert_eq!(line.qty, 3);
        assert_eq!(line.price, dec!(12.50));
        let items = CartRepository::find_cart_items(&db, user_id).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(cart_total(&items), dec!(37.50));
    }

    #[tokio::test]
    async fn delete_cart_items_only_touches_one_user() {
        let db = connect_in_memory().await.unwrap();
        let product = seed_product(&db, dec!(5.00)).await;
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        CartRepository::upsert_line(&db, alice, &product, 1).await.unwrap();
        CartRepository::upsert_line(&db, bob, &product, 1).await.unwrap();

        assert_eq!(CartRepository::delete_cart_items(&db, alice).await.unwrap(), 1);
        assert!(CartRepository::find_cart_items(&db, alice).await.unwrap().is_empty());
        assert_eq!(CartRepository::find_cart_items(&db, bob).await.unwrap().len(), 1);
    }
}
