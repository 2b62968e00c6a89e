use sea_orm::{ConnectionTrait, DbErr, EntityTrait};
use uuid::Uuid;

use crate::entities::{Product, ProductModel};

/// Read-only catalog access.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProductRepository;

impl ProductRepository {
    pub async fn find_by_id<C: ConnectionTrait>(
        db: &C,
        product_id: Uuid,
    ) -> Result<Option<ProductModel>, DbErr> {
        Product::find_by_id(product_id).one(db).await
    }
}
