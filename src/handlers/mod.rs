pub mod commerce;
pub mod health;
pub mod orders;
pub mod payment_webhooks;

use crate::{
    db::DbPool,
    events::EventSender,
    gateway::PaymentGateway,
    services::commerce::{CartService, CheckoutService, CheckoutSettings, OrderService},
};
use std::sync::Arc;

pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        checkout_settings: CheckoutSettings,
    ) -> Self {
        let cart = Arc::new(CartService::new(db_pool.clone()));
        let orders = Arc::new(OrderService::new(db_pool.clone()));
        let checkout = Arc::new(CheckoutService::new(
            db_pool,
            gateway,
            event_sender,
            checkout_settings,
        ));

        Self {
            cart,
            checkout,
            orders,
        }
    }
}
