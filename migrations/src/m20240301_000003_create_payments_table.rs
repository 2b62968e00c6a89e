use sea_orm_migration::prelude::*;

use crate::money_column;

#[derive(DeriveMigrationName)]
pub struct Migration;

/// Partial unique index backing the "one unresolved payment per user" rule.
/// Both Postgres and SQLite accept the `WHERE` clause on index creation.
const UNRESOLVED_PAYMENT_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS \
     idx_payments_user_unresolved ON payments (user_id) \
     WHERE status IN ('initial', 'pending')";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Payments::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Payments::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Payments::UserId).uuid().not_null())
                    .col(ColumnDef::new(Payments::OrderRef).string_len(64).not_null())
                    .col(ColumnDef::new(Payments::PaymentId).string().null())
                    .col(ColumnDef::new(Payments::ClientSecret).string().null())
                    .col(money_column(manager, Payments::Amount))
                    .col(ColumnDef::new(Payments::Currency).string_len(8).not_null())
                    .col(ColumnDef::new(Payments::Status).string_len(32).not_null())
                    .col(ColumnDef::new(Payments::Response).text().null())
                    .col(
                        ColumnDef::new(Payments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Payments::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_payments_order_ref")
                    .table(Payments::Table)
                    .col(Payments::OrderRef)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_payments_user_created")
                    .table(Payments::Table)
                    .col(Payments::UserId)
                    .col(Payments::CreatedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(UNRESOLVED_PAYMENT_INDEX)
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Payments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Payments {
    Table,
    Id,
    UserId,
    OrderRef,
    PaymentId,
    ClientSecret,
    Amount,
    Currency,
    Status,
    Response,
    CreatedAt,
    UpdatedAt,
}
