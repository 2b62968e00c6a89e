//! Data access for the checkout core.
//!
//! Repositories are stateless and take the connection per call, generic over
//! [`sea_orm::ConnectionTrait`], so the same operation runs against the pool
//! or inside a [`sea_orm::DatabaseTransaction`].

pub mod cart_repository;
pub mod order_repository;
pub mod payment_repository;
pub mod product_repository;

pub use cart_repository::{cart_total, CartRepository};
pub use order_repository::{NewOrder, NewOrderItem, OrderRepository, SellerOrderDetails};
pub use payment_repository::{LedgerInsert, NewPayment, PaymentRepository};
pub use product_repository::ProductRepository;
