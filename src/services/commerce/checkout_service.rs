use crate::{
    config::AppConfig,
    entities::{PaymentModel, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{CreatePaymentRequest, GatewayError, PaymentGateway, Settlement},
    repositories::{
        cart_total, payment_repository::is_unique_violation, CartRepository, LedgerInsert,
        NewOrder, NewOrderItem, NewPayment, OrderRepository, PaymentRepository,
    },
};
use chrono::Utc;
use metrics::counter;
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, DbErr, TransactionError, TransactionTrait};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

const ORDER_REF_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub currency: String,
    /// Age at which a claim that never reached the gateway counts as
    /// abandoned. Kept above `gateway_timeout` so an in-flight claim is
    /// never taken over.
    pub claim_timeout: Duration,
    /// Upper bound on one gateway call, whatever the client's own timeout.
    pub gateway_timeout: Duration,
    /// How long a concurrent request waits for another request's claim.
    pub claim_wait: Duration,
    pub claim_poll_interval: Duration,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            currency: "usd".to_string(),
            claim_timeout: Duration::from_secs(30),
            gateway_timeout: Duration::from_secs(10),
            claim_wait: Duration::from_secs(11),
            claim_poll_interval: Duration::from_millis(50),
        }
    }
}

impl From<&AppConfig> for CheckoutSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            currency: cfg.default_currency.to_ascii_lowercase(),
            claim_timeout: cfg.claim_timeout(),
            gateway_timeout: cfg.gateway_timeout(),
            claim_wait: cfg.gateway_timeout() + Duration::from_secs(1),
            ..Default::default()
        }
    }
}

/// What the client needs to confirm the payment on its side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSession {
    pub publishable_key: Option<String>,
    pub client_secret: String,
    pub order_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckoutOutcome {
    Succeeded { order_ref: String },
    Failed { order_ref: String },
    Pending { order_ref: String },
}

impl CheckoutOutcome {
    fn from_record(record: &PaymentModel) -> Self {
        let order_ref = record.order_ref.clone();
        match record.status {
            PaymentStatus::Success => CheckoutOutcome::Succeeded { order_ref },
            PaymentStatus::Failed => CheckoutOutcome::Failed { order_ref },
            PaymentStatus::Initial | PaymentStatus::Pending => {
                CheckoutOutcome::Pending { order_ref }
            }
        }
    }

    pub fn order_ref(&self) -> &str {
        match self {
            CheckoutOutcome::Succeeded { order_ref }
            | CheckoutOutcome::Failed { order_ref }
            | CheckoutOutcome::Pending { order_ref } => order_ref,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            CheckoutOutcome::Succeeded { .. } => "Payment verified successfully",
            CheckoutOutcome::Failed { .. } => "Payment failed",
            CheckoutOutcome::Pending { .. } => "Payment is still being processed",
        }
    }
}

fn generate_order_ref() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ORDER_REF_LEN)
        .map(char::from)
        .collect()
}

/// Coordinates the cart, the payment ledger and the gateway.
///
/// At most one unresolved ledger record exists per user; the partial unique
/// index on `payments` is what serializes concurrent checkouts, so the
/// service keeps no in-process locks and can run on any number of replicas.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
            settings,
        }
    }

    /// Starts (or resumes) the user's checkout and returns the client secret.
    ///
    /// Repeated calls while a payment is unresolved return the same secret
    /// without touching the gateway again.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn start_checkout(&self, user_id: Uuid) -> Result<PaymentSession, ServiceError> {
        let db = &*self.db;
        let deadline = Instant::now() + self.settings.claim_wait;

        loop {
            if let Some(existing) = PaymentRepository::find_unresolved_payment(db, user_id).await? {
                if let Some(client_secret) = existing.client_secret.clone() {
                    debug!(order_ref = %existing.order_ref, "reusing unresolved payment");
                    counter!("checkout.reused", 1);
                    return Ok(PaymentSession {
                        publishable_key: self.gateway.publishable_key(),
                        client_secret,
                        order_ref: existing.order_ref,
                    });
                }

                if self.is_abandoned(&existing) {
                    if !self.abandon_claim(&existing).await? {
                        debug!(order_ref = %existing.order_ref, "claim moved on before it could be abandoned");
                    }
                    continue;
                }

                if Instant::now() >= deadline {
                    warn!(order_ref = %existing.order_ref, "timed out waiting for concurrent checkout");
                    return Err(ServiceError::GatewayUnavailable(
                        "another checkout for this user is still in progress".to_string(),
                    ));
                }
                tokio::time::sleep(self.settings.claim_poll_interval).await;
                continue;
            }

            let items = CartRepository::find_cart_items(db, user_id).await?;
            if items.is_empty() {
                return Err(ServiceError::EmptyCart);
            }
            let amount = cart_total(&items);

            let claim = PaymentRepository::create_payment(
                db,
                NewPayment {
                    user_id,
                    order_ref: generate_order_ref(),
                    amount,
                    currency: self.settings.currency.clone(),
                },
            )
            .await?;

            match claim {
                LedgerInsert::Created(record) => return self.open_gateway_payment(record).await,
                LedgerInsert::Conflict => {
                    debug!("lost checkout claim race; waiting for the winner");
                    if Instant::now() >= deadline {
                        return Err(ServiceError::GatewayUnavailable(
                            "another checkout for this user is still in progress".to_string(),
                        ));
                    }
                }
            }
        }
    }

    /// Creates the gateway payment for a fresh claim and attaches it.
    async fn open_gateway_payment(
        &self,
        record: PaymentModel,
    ) -> Result<PaymentSession, ServiceError> {
        let db = &*self.db;
        let request = CreatePaymentRequest {
            amount: record.amount,
            currency: record.currency.clone(),
            user_id: record.user_id,
            order_ref: record.order_ref.clone(),
        };

        counter!("checkout.gateway_calls", 1);
        let created = tokio::time::timeout(
            self.settings.gateway_timeout,
            self.gateway.create_payment(&request),
        )
        .await
        .unwrap_or(Err(GatewayError::Timeout));
        let payment = match created {
            Ok(payment) => payment,
            Err(err) => {
                warn!(order_ref = %record.order_ref, error = %err, "gateway refused payment creation");
                match PaymentRepository::delete_claim(db, record.id).await {
                    Ok(true) => {}
                    Ok(false) => warn!(order_ref = %record.order_ref, "checkout claim already gone"),
                    Err(db_err) => {
                        error!(order_ref = %record.order_ref, error = %db_err, "failed to release checkout claim")
                    }
                }
                return Err(err.into());
            }
        };

        match PaymentRepository::attach_gateway(
            db,
            record.id,
            &payment.gateway_id,
            &payment.client_secret,
        )
        .await
        {
            Ok(true) => {}
            Ok(false) => {
                error!(
                    gateway_id = %payment.gateway_id,
                    order_ref = %record.order_ref,
                    "checkout claim vanished after gateway payment was created; gateway payment is orphaned"
                );
                return Err(ServiceError::InternalError(
                    "checkout claim lost before the payment was recorded".to_string(),
                ));
            }
            Err(db_err) => {
                error!(
                    gateway_id = %payment.gateway_id,
                    order_ref = %record.order_ref,
                    error = %db_err,
                    "failed to record gateway payment; gateway payment is orphaned"
                );
                return Err(db_err.into());
            }
        }

        info!(order_ref = %record.order_ref, amount = %record.amount, "checkout started");
        counter!("checkout.started", 1);
        self.event_sender.send_or_log(Event::CheckoutStarted {
            user_id: record.user_id,
            payment_record_id: record.id,
            order_ref: record.order_ref.clone(),
            amount: record.amount,
        });

        Ok(PaymentSession {
            publishable_key: self.gateway.publishable_key(),
            client_secret: payment.client_secret,
            order_ref: record.order_ref,
        })
    }

    fn is_abandoned(&self, record: &PaymentModel) -> bool {
        if record.payment_id.is_some() {
            return false;
        }
        let age = Utc::now().signed_duration_since(record.created_at);
        age.to_std()
            .map(|age| age > self.settings.claim_timeout)
            .unwrap_or(false)
    }

    async fn abandon_claim(&self, record: &PaymentModel) -> Result<bool, ServiceError> {
        warn!(order_ref = %record.order_ref, created_at = %record.created_at, "closing abandoned checkout claim");
        let response = json!({
            "error": "checkout claim abandoned before a gateway payment was created",
        })
        .to_string();
        Ok(PaymentRepository::abandon_claim(&*self.db, record.id, response).await?)
    }

    /// Checks the gateway for the user's unresolved payment and settles it.
    ///
    /// Once the attempt is terminal, further calls report the same outcome.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn verify_checkout(&self, user_id: Uuid) -> Result<CheckoutOutcome, ServiceError> {
        let db = &*self.db;

        let record = match PaymentRepository::find_unresolved_payment(db, user_id).await? {
            Some(record) => record,
            None => {
                return PaymentRepository::find_latest_payment(db, user_id)
                    .await?
                    .map(|latest| CheckoutOutcome::from_record(&latest))
                    .ok_or(ServiceError::NoActivePayment);
            }
        };

        let Some(gateway_id) = record.payment_id.clone() else {
            return Ok(CheckoutOutcome::Pending {
                order_ref: record.order_ref,
            });
        };

        let status = self.gateway.payment_status(&gateway_id).await?;
        let raw = status.raw.to_string();

        match status.settlement {
            Settlement::Succeeded => self.settle_success(record, gateway_id, raw).await,
            Settlement::Failed => {
                let applied = PaymentRepository::transition(
                    db,
                    record.id,
                    PaymentStatus::Failed,
                    Some(raw),
                )
                .await?;
                if !applied {
                    return self.current_outcome(&record).await;
                }
                info!(order_ref = %record.order_ref, "payment failed");
                counter!("checkout.settled", 1, "status" => "failed");
                self.event_sender.send_or_log(Event::PaymentSettled {
                    user_id,
                    order_ref: record.order_ref.clone(),
                    status: PaymentStatus::Failed,
                });
                Ok(CheckoutOutcome::Failed {
                    order_ref: record.order_ref,
                })
            }
            Settlement::Pending => {
                let applied = PaymentRepository::transition(
                    db,
                    record.id,
                    PaymentStatus::Pending,
                    Some(raw),
                )
                .await?;
                if !applied {
                    return self.current_outcome(&record).await;
                }
                Ok(CheckoutOutcome::Pending {
                    order_ref: record.order_ref,
                })
            }
        }
    }

    /// Creates the order, clears the cart and marks the record `success` in one transaction.
    async fn settle_success(
        &self,
        record: PaymentModel,
        gateway_id: String,
        raw: String,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let record_id = record.id;
        let user_id = record.user_id;
        let amount = record.amount;
        let order_ref = record.order_ref.clone();

        let result = self
            .db
            .transaction::<_, SettleResult, ServiceError>(move |txn| {
                Box::pin(async move {
                    let current = PaymentRepository::find_by_id(txn, record_id)
                        .await?
                        .ok_or(ServiceError::NoActivePayment)?;
                    if current.status.is_terminal() {
                        return Ok(SettleResult::AlreadySettled);
                    }

                    let items = CartRepository::find_cart_items(txn, user_id).await?;
                    ensure_cart_matches(&items, amount)?;

                    let (order, order_items) = OrderRepository::create_order(
                        txn,
                        NewOrder {
                            order_ref: order_ref.clone(),
                            user_id,
                            amount,
                            payment_id: gateway_id,
                            items: items.iter().map(NewOrderItem::from).collect(),
                        },
                    )
                    .await?;

                    CartRepository::delete_cart_items(txn, user_id).await?;

                    let applied = PaymentRepository::transition(
                        txn,
                        record_id,
                        PaymentStatus::Success,
                        Some(raw),
                    )
                    .await?;
                    if !applied {
                        return Err(ServiceError::PersistenceFailure(DbErr::RecordNotUpdated));
                    }

                    Ok(SettleResult::Created {
                        order_id: order.id,
                        item_count: order_items.len(),
                    })
                })
            })
            .await
            .map_err(|e| match e {
                TransactionError::Connection(db_err) => ServiceError::PersistenceFailure(db_err),
                TransactionError::Transaction(err) => err,
            });

        match result {
            Ok(SettleResult::Created {
                order_id,
                item_count,
            }) => {
                info!(%order_id, order_ref = %record.order_ref, item_count, "payment succeeded; order created");
                counter!("checkout.settled", 1, "status" => "success");
                self.event_sender.send_or_log(Event::PaymentSettled {
                    user_id,
                    order_ref: record.order_ref.clone(),
                    status: PaymentStatus::Success,
                });
                self.event_sender.send_or_log(Event::OrderCreated {
                    order_id,
                    order_ref: record.order_ref.clone(),
                    user_id,
                    amount,
                });
                Ok(CheckoutOutcome::Succeeded {
                    order_ref: record.order_ref,
                })
            }
            Ok(SettleResult::AlreadySettled) => self.current_outcome(&record).await,
            Err(ServiceError::PersistenceFailure(ref db_err))
                if is_unique_violation(db_err) || matches!(db_err, DbErr::RecordNotUpdated) =>
            {
                debug!(order_ref = %record.order_ref, "payment settled by a concurrent verification");
                self.current_outcome(&record).await
            }
            Err(err) => Err(err),
        }
    }

    /// Outcome of a record another request may have settled meanwhile.
    async fn current_outcome(&self, record: &PaymentModel) -> Result<CheckoutOutcome, ServiceError> {
        let current = PaymentRepository::find_by_id(&*self.db, record.id)
            .await?
            .ok_or(ServiceError::NoActivePayment)?;
        Ok(CheckoutOutcome::from_record(&current))
    }

    /// Owner of a gateway payment, for callbacks that carry no user metadata.
    pub async fn find_payment_owner(&self, gateway_id: &str) -> Result<Option<Uuid>, ServiceError> {
        Ok(PaymentRepository::find_by_gateway_id(&*self.db, gateway_id)
            .await?
            .map(|record| record.user_id))
    }
}

enum SettleResult {
    Created { order_id: Uuid, item_count: usize },
    AlreadySettled,
}

fn ensure_cart_matches(
    items: &[crate::entities::CartItemModel],
    paid: Decimal,
) -> Result<(), ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::CartChanged(
            "cart was emptied after the payment was started".to_string(),
        ));
    }
    let total = cart_total(items);
    if total != paid {
        return Err(ServiceError::CartChanged(format!(
            "cart total {} no longer matches the paid amount {}",
            total, paid
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use crate::entities::ProductModel;
    use crate::gateway::{GatewayPayment, GatewayStatus, InMemoryGateway, MockPaymentGateway};
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use sea_orm::{ActiveModelTrait, IntoActiveModel, Set};
    use tokio::sync::mpsc;

    fn product(price: Decimal) -> ProductModel {
        let now = Utc::now();
        ProductModel {
            id: Uuid::new_v4(),
            name: "Lamp".to_string(),
            description: None,
            image_url: None,
            price,
            seller_id: Uuid::new_v4(),
            stock: 100,
            created_at: now,
            updated_at: now,
        }
    }

    fn settings() -> CheckoutSettings {
        CheckoutSettings {
            claim_timeout: Duration::from_millis(400),
            gateway_timeout: Duration::from_millis(300),
            claim_wait: Duration::from_millis(350),
            claim_poll_interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    fn service_with(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        settings: CheckoutSettings,
    ) -> CheckoutService {
        let (tx, _rx) = mpsc::channel(16);
        CheckoutService::new(db, gateway, Arc::new(EventSender::new(tx)), settings)
    }

    fn service(db: Arc<DatabaseConnection>, gateway: MockPaymentGateway) -> CheckoutService {
        service_with(db, Arc::new(gateway), settings())
    }

    async fn seeded_cart(db: &DatabaseConnection, user_id: Uuid) {
        CartRepository::upsert_line(db, user_id, &product(dec!(10.00)), 2)
            .await
            .unwrap();
        CartRepository::upsert_line(db, user_id, &product(dec!(5.00)), 1)
            .await
            .unwrap();
    }

    fn gateway_payment() -> GatewayPayment {
        GatewayPayment {
            gateway_id: "pi_123".to_string(),
            client_secret: "pi_123_secret_abc".to_string(),
        }
    }

    #[tokio::test]
    async fn empty_cart_never_reaches_the_gateway() {
        let db = Arc::new(connect_in_memory().await.unwrap());
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_payment().never();

        let user_id = Uuid::new_v4();
        let err = service(db.clone(), gateway)
            .start_checkout(user_id)
            .await
            .unwrap_err();

        assert_matches!(err, ServiceError::EmptyCart);
        assert!(PaymentRepository::find_latest_payment(&*db, user_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn gateway_error_leaves_no_ledger_record() {
        let db = Arc::new(connect_in_memory().await.unwrap());
        let user_id = Uuid::new_v4();
        seeded_cart(&db, user_id).await;

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_payment()
            .times(1)
            .returning(|_| Err(GatewayError::Timeout));

        let err = service(db.clone(), gateway)
            .start_checkout(user_id)
            .await
            .unwrap_err();

        assert_matches!(err, ServiceError::GatewayUnavailable(_));
        assert!(PaymentRepository::find_latest_payment(&*db, user_id)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            CartRepository::find_cart_items(&*db, user_id).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn start_quotes_cart_total_and_is_idempotent() {
        let db = Arc::new(connect_in_memory().await.unwrap());
        let user_id = Uuid::new_v4();
        seeded_cart(&db, user_id).await;

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_payment()
            .withf(move |req| req.amount == dec!(25.00) && req.user_id == user_id)
            .times(1)
            .returning(|_| Ok(gateway_payment()));
        gateway
            .expect_publishable_key()
            .returning(|| Some("pk_test".to_string()));

        let checkout = service(db.clone(), gateway);
        let first = checkout.start_checkout(user_id).await.unwrap();
        let second = checkout.start_checkout(user_id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.client_secret, "pi_123_secret_abc");
        assert_eq!(first.publishable_key.as_deref(), Some("pk_test"));

        let record = PaymentRepository::find_unresolved_payment(&*db, user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, PaymentStatus::Initial);
        assert_eq!(record.amount, dec!(25.00));
        assert_eq!(record.order_ref, first.order_ref);
    }

    #[tokio::test]
    async fn verify_success_creates_order_and_clears_cart() {
        let db = Arc::new(connect_in_memory().await.unwrap());
        let user_id = Uuid::new_v4();
        seeded_cart(&db, user_id).await;

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_payment()
            .returning(|_| Ok(gateway_payment()));
        gateway.expect_publishable_key().returning(|| None);
        gateway
            .expect_payment_status()
            .withf(|id| id == "pi_123")
            .times(1)
            .returning(|_| {
                Ok(GatewayStatus {
                    settlement: Settlement::Succeeded,
                    raw: json!({"id": "pi_123", "status": "succeeded"}),
                })
            });

        let checkout = service(db.clone(), gateway);
        let session = checkout.start_checkout(user_id).await.unwrap();

        let outcome = checkout.verify_checkout(user_id).await.unwrap();
        assert_eq!(
            outcome,
            CheckoutOutcome::Succeeded {
                order_ref: session.order_ref.clone()
            }
        );

        // terminal now: answered from the ledger without another gateway call
        let again = checkout.verify_checkout(user_id).await.unwrap();
        assert_eq!(again, outcome);

        let (order, items) =
            OrderRepository::find_user_order_by_ref(&*db, user_id, &session.order_ref)
                .await
                .unwrap()
                .unwrap();
        assert_eq!(order.amount, dec!(25.00));
        assert_eq!(order.payment_id, "pi_123");
        assert_eq!(items.len(), 2);
        assert!(CartRepository::find_cart_items(&*db, user_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn verify_with_changed_cart_keeps_payment_unresolved() {
        let db = Arc::new(connect_in_memory().await.unwrap());
        let user_id = Uuid::new_v4();
        seeded_cart(&db, user_id).await;

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_payment()
            .returning(|_| Ok(gateway_payment()));
        gateway.expect_publishable_key().returning(|| None);
        gateway.expect_payment_status().returning(|_| {
            Ok(GatewayStatus {
                settlement: Settlement::Succeeded,
                raw: json!({}),
            })
        });

        let checkout = service(db.clone(), gateway);
        checkout.start_checkout(user_id).await.unwrap();
        CartRepository::upsert_line(&*db, user_id, &product(dec!(1.00)), 1)
            .await
            .unwrap();

        let err = checkout.verify_checkout(user_id).await.unwrap_err();
        assert_matches!(err, ServiceError::CartChanged(_));

        assert!(PaymentRepository::find_unresolved_payment(&*db, user_id)
            .await
            .unwrap()
            .is_some());
        assert!(OrderRepository::find_user_orders(&*db, user_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn verify_without_any_payment_is_not_found() {
        let db = Arc::new(connect_in_memory().await.unwrap());
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_payment_status().never();

        let err = service(db, gateway)
            .verify_checkout(Uuid::new_v4())
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::NoActivePayment);
    }

    #[tokio::test]
    async fn verify_of_unattached_claim_reports_pending() {
        let db = Arc::new(connect_in_memory().await.unwrap());
        let user_id = Uuid::new_v4();
        PaymentRepository::create_payment(
            &*db,
            NewPayment {
                user_id,
                order_ref: "claimed".to_string(),
                amount: dec!(3.00),
                currency: "usd".to_string(),
            },
        )
        .await
        .unwrap();

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_payment_status().never();

        let outcome = service(db, gateway).verify_checkout(user_id).await.unwrap();
        assert_eq!(
            outcome,
            CheckoutOutcome::Pending {
                order_ref: "claimed".to_string()
            }
        );
    }

    #[tokio::test]
    async fn abandoned_claim_is_failed_and_replaced() {
        let db = Arc::new(connect_in_memory().await.unwrap());
        let user_id = Uuid::new_v4();
        seeded_cart(&db, user_id).await;

        let LedgerInsert::Created(stale) = PaymentRepository::create_payment(
            &*db,
            NewPayment {
                user_id,
                order_ref: "stale".to_string(),
                amount: dec!(25.00),
                currency: "usd".to_string(),
            },
        )
        .await
        .unwrap() else {
            panic!("expected claim");
        };
        let mut old = stale.clone().into_active_model();
        old.created_at = Set(Utc::now() - chrono::Duration::minutes(10));
        old.update(&*db).await.unwrap();

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_payment()
            .times(1)
            .returning(|_| Ok(gateway_payment()));
        gateway.expect_publishable_key().returning(|| None);

        let session = service(db.clone(), gateway)
            .start_checkout(user_id)
            .await
            .unwrap();
        assert_ne!(session.order_ref, "stale");

        let closed = PaymentRepository::find_by_id(&*db, stale.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.status, PaymentStatus::Failed);
        assert!(closed.response.unwrap().contains("abandoned"));
    }

    #[tokio::test]
    async fn slow_gateway_is_called_once_for_concurrent_starts() {
        let db = Arc::new(connect_in_memory().await.unwrap());
        let user_id = Uuid::new_v4();
        seeded_cart(&db, user_id).await;

        let gateway = Arc::new(InMemoryGateway::new().with_latency(Duration::from_millis(150)));
        let checkout = service_with(db.clone(), gateway.clone(), settings());

        let second = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            checkout.start_checkout(user_id).await
        };
        let (a, b) = tokio::join!(checkout.start_checkout(user_id), second);
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.client_secret, b.client_secret);
        assert_eq!(gateway.create_calls(), 1);
        assert_eq!(gateway.payment_count(), 1);

        let record = PaymentRepository::find_unresolved_payment(&*db, user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, PaymentStatus::Initial);
        assert!(record.payment_id.is_some());
    }

    #[tokio::test]
    async fn gateway_call_is_cut_before_the_claim_can_be_taken_over() {
        let db = Arc::new(connect_in_memory().await.unwrap());
        let user_id = Uuid::new_v4();
        seeded_cart(&db, user_id).await;

        let gateway = Arc::new(InMemoryGateway::new().with_latency(Duration::from_secs(2)));
        let checkout = service_with(db.clone(), gateway.clone(), settings());

        let second = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            checkout.start_checkout(user_id).await
        };
        let (a, b) = tokio::join!(checkout.start_checkout(user_id), second);

        assert_matches!(a, Err(ServiceError::GatewayUnavailable(_)));
        assert_matches!(b, Err(ServiceError::GatewayUnavailable(_)));
        // both calls were cut before the gateway created anything
        assert_eq!(gateway.payment_count(), 0);
        assert!(PaymentRepository::find_latest_payment(&*db, user_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn waiting_on_a_live_claim_times_out() {
        let db = Arc::new(connect_in_memory().await.unwrap());
        let user_id = Uuid::new_v4();
        seeded_cart(&db, user_id).await;

        let LedgerInsert::Created(in_flight) = PaymentRepository::create_payment(
            &*db,
            NewPayment {
                user_id,
                order_ref: "in-flight".to_string(),
                amount: dec!(25.00),
                currency: "usd".to_string(),
            },
        )
        .await
        .unwrap() else {
            panic!("expected claim");
        };

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_payment().never();
        let checkout = service_with(
            db.clone(),
            Arc::new(gateway),
            CheckoutSettings {
                claim_timeout: Duration::from_secs(60),
                claim_wait: Duration::from_millis(100),
                ..settings()
            },
        );

        let err = checkout.start_checkout(user_id).await.unwrap_err();
        assert_matches!(err, ServiceError::GatewayUnavailable(_));

        let untouched = PaymentRepository::find_by_id(&*db, in_flight.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(untouched.status, PaymentStatus::Initial);
    }

    #[tokio::test]
    async fn concurrent_verifications_create_one_order() {
        let db = Arc::new(connect_in_memory().await.unwrap());
        let user_id = Uuid::new_v4();
        seeded_cart(&db, user_id).await;

        let gateway = Arc::new(InMemoryGateway::new());
        let checkout = service_with(db.clone(), gateway.clone(), settings());
        let session = checkout.start_checkout(user_id).await.unwrap();
        assert!(gateway.settle_order(&session.order_ref, Settlement::Succeeded));

        let (a, b) = tokio::join!(
            checkout.verify_checkout(user_id),
            checkout.verify_checkout(user_id)
        );
        let expected = CheckoutOutcome::Succeeded {
            order_ref: session.order_ref.clone(),
        };
        assert_eq!(a.unwrap(), expected);
        assert_eq!(b.unwrap(), expected);

        assert_eq!(
            OrderRepository::find_user_orders(&*db, user_id)
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(CartRepository::find_cart_items(&*db, user_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn order_ref_collision_reports_the_current_record() {
        let db = Arc::new(connect_in_memory().await.unwrap());
        let user_id = Uuid::new_v4();
        seeded_cart(&db, user_id).await;

        let gateway = Arc::new(InMemoryGateway::new());
        let checkout = service_with(db.clone(), gateway.clone(), settings());
        let session = checkout.start_checkout(user_id).await.unwrap();
        gateway.settle_order(&session.order_ref, Settlement::Succeeded);

        // another verification already wrote the order but has not settled the ledger yet
        OrderRepository::create_order(
            &*db,
            NewOrder {
                order_ref: session.order_ref.clone(),
                user_id,
                amount: dec!(25.00),
                payment_id: "pi_other".to_string(),
                items: vec![],
            },
        )
        .await
        .unwrap();

        let outcome = checkout.verify_checkout(user_id).await.unwrap();
        assert_eq!(
            outcome,
            CheckoutOutcome::Pending {
                order_ref: session.order_ref.clone()
            }
        );
        assert_eq!(
            OrderRepository::find_user_orders(&*db, user_id)
                .await
                .unwrap()
                .len(),
            1
        );
        // the rolled back settlement left the cart in place
        assert_eq!(
            CartRepository::find_cart_items(&*db, user_id).await.unwrap().len(),
            2
        );
    }

    #[test]
    fn order_refs_are_alphanumeric() {
        let a = generate_order_ref();
        assert_eq!(a.len(), ORDER_REF_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, generate_order_ref());
    }
}
