use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait,
    Iterable, QueryFilter, QueryOrder, Set, SqlErr,
};
use uuid::Uuid;

use crate::entities::payment::{ActiveModel as PaymentActiveModel, Column};
use crate::entities::{Payment, PaymentModel, PaymentStatus};

/// A claim on the user's single unresolved checkout slot.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub user_id: Uuid,
    pub order_ref: String,
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerInsert {
    Created(PaymentModel),
    /// Another unresolved record already holds the user's slot.
    Conflict,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PaymentRepository;

impl PaymentRepository {
    pub async fn find_by_id<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
    ) -> Result<Option<PaymentModel>, DbErr> {
        Payment::find_by_id(id).one(db).await
    }

    pub async fn find_unresolved_payment<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
    ) -> Result<Option<PaymentModel>, DbErr> {
        Payment::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::Status.is_in(PaymentStatus::UNRESOLVED))
            .order_by_desc(Column::CreatedAt)
            .one(db)
            .await
    }

    pub async fn find_latest_payment<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
    ) -> Result<Option<PaymentModel>, DbErr> {
        Payment::find()
            .filter(Column::UserId.eq(user_id))
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::UpdatedAt)
            .one(db)
            .await
    }

    pub async fn find_by_gateway_id<C: ConnectionTrait>(
        db: &C,
        gateway_id: &str,
    ) -> Result<Option<PaymentModel>, DbErr> {
        Payment::find()
            .filter(Column::PaymentId.eq(gateway_id))
            .one(db)
            .await
    }

    /// Inserts an `initial` record without gateway data. The partial unique
    /// index on unresolved records turns a concurrent second claim into
    /// [`LedgerInsert::Conflict`].
    pub async fn create_payment<C: ConnectionTrait>(
        db: &C,
        new: NewPayment,
    ) -> Result<LedgerInsert, DbErr> {
        let now = Utc::now();
        let record = PaymentActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(new.user_id),
            order_ref: Set(new.order_ref),
            payment_id: Set(None),
            client_secret: Set(None),
            amount: Set(new.amount),
            currency: Set(new.currency),
            status: Set(PaymentStatus::Initial),
            response: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match record.insert(db).await {
            Ok(model) => Ok(LedgerInsert::Created(model)),
            Err(err) if is_unique_violation(&err) => Ok(LedgerInsert::Conflict),
            Err(err) => Err(err),
        }
    }

    /// Attaches the gateway payment to a claim. Returns false when the claim
    /// is gone, already attached, or no longer unresolved.
    pub async fn attach_gateway<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        gateway_id: &str,
        client_secret: &str,
    ) -> Result<bool, DbErr> {
        let result = Payment::update_many()
            .col_expr(Column::PaymentId, Expr::value(gateway_id))
            .col_expr(Column::ClientSecret, Expr::value(client_secret))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            .filter(Column::PaymentId.is_null())
            .filter(Column::Status.is_in(PaymentStatus::UNRESOLVED))
            .exec(db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Conditional status update. Only rows whose current status may move to
    /// `to` (see [`PaymentStatus::can_transition_to`]) are touched, so a
    /// terminal transition is applied at most once.
    pub async fn transition<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        to: PaymentStatus,
        response: Option<String>,
    ) -> Result<bool, DbErr> {
        let sources: Vec<PaymentStatus> = PaymentStatus::iter()
            .filter(|from| from.can_transition_to(to))
            .collect();
        if sources.is_empty() {
            return Err(DbErr::Custom(format!("payments cannot transition to {}", to)));
        }

        let result = Payment::update_many()
            .col_expr(Column::Status, Expr::value(to.as_str()))
            .col_expr(Column::Response, Expr::value(response))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.is_in(sources))
            .exec(db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Fails a claim that never reached the gateway. Attached or already
    /// settled records are left alone.
    pub async fn abandon_claim<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        response: String,
    ) -> Result<bool, DbErr> {
        let result = Payment::update_many()
            .col_expr(Column::Status, Expr::value(PaymentStatus::Failed.as_str()))
            .col_expr(Column::Response, Expr::value(response))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            .filter(Column::PaymentId.is_null())
            .filter(Column::Status.eq(PaymentStatus::Initial))
            .exec(db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Removes a claim that never reached the gateway.
    pub async fn delete_claim<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<bool, DbErr> {
        let result = Payment::delete_many()
            .filter(Column::Id.eq(id))
            .filter(Column::PaymentId.is_null())
            .filter(Column::Status.eq(PaymentStatus::Initial))
            .exec(db)
            .await?;
        Ok(result.rows_affected == 1)
    }
}

pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
