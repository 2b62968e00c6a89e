//! Persistence models for the checkout core.
//!
//! Cart lines and order items are stored denormalized: the product name, image
//! and price are copied at write time so later catalog changes never alter an
//! existing cart or a placed order.

pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod product;

pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use payment::{Entity as Payment, Model as PaymentModel, PaymentStatus};
pub use product::{Entity as Product, Model as ProductModel};
