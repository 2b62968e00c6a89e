pub use sea_orm_migration::prelude::*;

use sea_orm_migration::sea_orm::DatabaseBackend;

mod m20240301_000001_create_products_table;
mod m20240301_000002_create_cart_items_table;
mod m20240301_000003_create_payments_table;
mod m20240301_000004_create_orders_table;
mod m20240301_000005_create_order_items_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_products_table::Migration),
            Box::new(m20240301_000002_create_cart_items_table::Migration),
            Box::new(m20240301_000003_create_payments_table::Migration),
            Box::new(m20240301_000004_create_orders_table::Migration),
            Box::new(m20240301_000005_create_order_items_table::Migration),
        ]
    }
}

/// Non-null money column. SQLite caps decimal precision at 16 digits.
pub(crate) fn money_column<T: IntoIden + 'static>(manager: &SchemaManager, name: T) -> ColumnDef {
    let mut column = ColumnDef::new(name);
    match manager.get_database_backend() {
        DatabaseBackend::Sqlite => column.decimal_len(16, 4),
        _ => column.decimal_len(19, 4),
    };
    column.not_null();
    column
}
