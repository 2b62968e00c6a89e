use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Marketplace API",
        version = "1.0.0",
        description = r#"
# Marketplace API

Shopping cart, checkout and order endpoints for a multi-seller marketplace.

## Checkout

1. `GET /transactions/payment` creates (or resumes) a payment for the current cart and
   returns the publishable key and client secret used to confirm it client side.
2. `GET /transactions/payment/verify` asks the gateway for the payment outcome. On success
   an order is created from the cart and the cart is emptied.

Both calls are idempotent per user: at most one payment is unresolved at any time.

## Authentication

Bearer JWT tokens signed with HS256. Seller endpoints require the `seller` role.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Cart", description = "Shopping cart endpoints"),
        (name = "Checkout", description = "Payment and checkout endpoints"),
        (name = "Orders", description = "Buyer and seller order endpoints"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::commerce::carts::get_cart,
        crate::handlers::commerce::carts::add_to_cart,
        crate::handlers::commerce::checkout::make_payment,
        crate::handlers::commerce::checkout::verify_payment,
        crate::handlers::payment_webhooks::payment_webhook,
        crate::handlers::orders::list_my_orders,
        crate::handlers::orders::get_my_order,
        crate::handlers::orders::list_seller_orders,
        crate::handlers::orders::get_seller_order,
        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            crate::services::commerce::AddToCartRequest,
            crate::services::commerce::CartLine,
            crate::services::commerce::CartView,
            crate::services::commerce::CheckoutOutcome,
            crate::services::commerce::OrderItemView,
            crate::services::commerce::OrderView,
            crate::handlers::commerce::checkout::PaymentSessionResponse,
            crate::handlers::payment_webhooks::WebhookAck,
            crate::handlers::health::HealthResponse,
            crate::repositories::SellerOrderDetails,
            crate::entities::order::OrderStatus,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDoc;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
