//! Process-local gateway used for local development and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use rand::{distributions::Alphanumeric, Rng};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use super::{
    CreatePaymentRequest, GatewayError, GatewayPayment, GatewayStatus, PaymentGateway, Settlement,
};

#[derive(Debug, Clone)]
struct StoredPayment {
    amount_minor: i64,
    currency: String,
    user_id: Uuid,
    order_ref: String,
    client_secret: String,
    settlement: Settlement,
}

/// Payments live in a concurrent map keyed by gateway id. Creation is
/// idempotent on `order_ref`, like the Stripe idempotency key.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    payments: DashMap<String, StoredPayment>,
    by_order_ref: DashMap<String, String>,
    create_calls: AtomicUsize,
    status_calls: AtomicUsize,
    unavailable: AtomicBool,
    latency: Option<Duration>,
    publishable_key: Option<String>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_publishable_key(mut self, key: Option<String>) -> Self {
        self.publishable_key = key;
        self
    }

    /// Delay applied to every call; widens race windows in concurrency tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// While set, every call fails with a retryable network error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_settlement(&self, gateway_id: &str, settlement: Settlement) -> bool {
        match self.payments.get_mut(gateway_id) {
            Some(mut payment) => {
                payment.settlement = settlement;
                true
            }
            None => false,
        }
    }

    /// Settles whichever payment was created for `order_ref`.
    pub fn settle_order(&self, order_ref: &str, settlement: Settlement) -> bool {
        let gateway_id = match self.by_order_ref.get(order_ref) {
            Some(id) => id.value().clone(),
            None => return false,
        };
        self.set_settlement(&gateway_id, settlement)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn payment_count(&self) -> usize {
        self.payments.len()
    }

    async fn simulate(&self) -> Result<(), GatewayError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Network("in-memory gateway offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    fn provider(&self) -> &'static str {
        "in-memory"
    }

    fn publishable_key(&self) -> Option<String> {
        self.publishable_key.clone()
    }

    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<GatewayPayment, GatewayError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;
        let amount_minor = request.amount_minor_units()?;

        if let Some(existing) = self.by_order_ref.get(&request.order_ref) {
            if let Some(payment) = self.payments.get(existing.value()) {
                return Ok(GatewayPayment {
                    gateway_id: existing.value().clone(),
                    client_secret: payment.client_secret.clone(),
                });
            }
        }

        let gateway_id = format!("pi_mem_{}", Uuid::new_v4().simple());
        let secret_suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        let client_secret = format!("{}_secret_{}", gateway_id, secret_suffix);

        self.payments.insert(
            gateway_id.clone(),
            StoredPayment {
                amount_minor,
                currency: request.currency.to_ascii_lowercase(),
                user_id: request.user_id,
                order_ref: request.order_ref.clone(),
                client_secret: client_secret.clone(),
                settlement: Settlement::Pending,
            },
        );
        self.by_order_ref
            .insert(request.order_ref.clone(), gateway_id.clone());

        Ok(GatewayPayment {
            gateway_id,
            client_secret,
        })
    }

    async fn payment_status(&self, gateway_id: &str) -> Result<GatewayStatus, GatewayError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;
        let payment = self
            .payments
            .get(gateway_id)
            .ok_or_else(|| GatewayError::Rejected {
                status: 404,
                message: format!("No such payment: {}", gateway_id),
            })?;

        let raw = json!({
            "id": gateway_id,
            "object": "payment_intent",
            "amount": payment.amount_minor,
            "currency": payment.currency,
            "status": payment.settlement,
            "metadata": {
                "user_id": payment.user_id.to_string(),
                "order_ref": payment.order_ref,
            },
        });

        Ok(GatewayStatus {
            settlement: payment.settlement,
            raw,
        })
    }
}
