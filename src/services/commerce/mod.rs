pub mod cart_service;
pub mod checkout_service;
pub mod order_service;

pub use cart_service::{AddToCartRequest, CartLine, CartService, CartView};
pub use checkout_service::{CheckoutOutcome, CheckoutService, CheckoutSettings, PaymentSession};
pub use order_service::{OrderItemView, OrderService, OrderView};
