use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Ledger status of a checkout attempt.
///
/// `Initial` and `Pending` are unresolved; at most one unresolved record may
/// exist per user (partial unique index `idx_payments_user_unresolved`).
/// `Success` and `Failed` are terminal.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "initial")]
    Initial,
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "success")]
    Success,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl PaymentStatus {
    pub const UNRESOLVED: [PaymentStatus; 2] = [PaymentStatus::Initial, PaymentStatus::Pending];

    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Success | PaymentStatus::Failed)
    }

    /// Allowed ledger moves: `initial -> pending -> success | failed`, with
    /// `initial` permitted to settle directly and `pending` refreshed in place
    /// on each gateway poll. Terminal states never move.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        match (self, next) {
            (PaymentStatus::Initial | PaymentStatus::Pending, PaymentStatus::Pending) => true,
            (PaymentStatus::Initial | PaymentStatus::Pending, PaymentStatus::Success) => true,
            (PaymentStatus::Initial | PaymentStatus::Pending, PaymentStatus::Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Initial => "initial",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One checkout attempt. `payment_id` and `client_secret` are empty while the
/// attempt is claimed but the gateway has not answered yet.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_ref: String,
    pub payment_id: Option<String>,
    #[serde(skip_serializing)]
    pub client_secret: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    #[sea_orm(column_type = "Text", nullable)]
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn is_unresolved(&self) -> bool {
        !self.status.is_terminal()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(PaymentStatus::Initial, PaymentStatus::Pending, true)]
    #[case(PaymentStatus::Initial, PaymentStatus::Success, true)]
    #[case(PaymentStatus::Initial, PaymentStatus::Failed, true)]
    #[case(PaymentStatus::Pending, PaymentStatus::Success, true)]
    #[case(PaymentStatus::Pending, PaymentStatus::Failed, true)]
    #[case(PaymentStatus::Pending, PaymentStatus::Initial, false)]
    #[case(PaymentStatus::Pending, PaymentStatus::Pending, true)]
    #[case(PaymentStatus::Initial, PaymentStatus::Initial, false)]
    #[case(PaymentStatus::Success, PaymentStatus::Failed, false)]
    #[case(PaymentStatus::Failed, PaymentStatus::Success, false)]
    #[case(PaymentStatus::Success, PaymentStatus::Pending, false)]
    fn ledger_transitions(
        #[case] from: PaymentStatus,
        #[case] to: PaymentStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn only_success_and_failed_are_terminal() {
        assert!(!PaymentStatus::Initial.is_terminal());
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Success.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
    }
}
