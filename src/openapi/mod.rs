use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront Cart & Checkout API

Carts for signed-in and anonymous shoppers, gateway-backed checkout and
payment reconciliation.

## Identity

Signed-in callers send a bearer token:

```
Authorization: Bearer <your-jwt-token>
```

Anonymous callers are tracked by the signed `storefront_session` cookie,
which is issued by the first cart write.

## Payments

`POST /api/v1/checkout/payment-order` creates a gateway order for the
current cart. The payment is confirmed by either
`POST /api/v1/checkout/verify` (from the checkout widget) or the gateway's
`POST /api/v1/payments/webhook`; whichever arrives first creates the order
and the other is acknowledged as a duplicate.

## Error Handling

```json
{
  "error": "Bad Request",
  "message": "Cart is empty",
  "request_id": "0d6c…",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Cart", description = "Cart endpoints"),
        (name = "Checkout", description = "Payment order and client confirmation"),
        (name = "Payments", description = "Gateway webhooks"),
        (name = "Orders", description = "Order history"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Cart
        crate::handlers::commerce::carts::get_cart,
        crate::handlers::commerce::carts::add_to_cart,
        crate::handlers::commerce::carts::update_cart_item,
        crate::handlers::commerce::carts::remove_cart_item,
        crate::handlers::commerce::carts::merge_cart,

        // Checkout
        crate::handlers::commerce::checkout::create_payment_order,
        crate::handlers::commerce::checkout::verify_payment,

        // Webhooks
        crate::handlers::payment_webhooks::payment_webhook,

        // Orders
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,

        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            crate::services::commerce::CartView,
            crate::services::commerce::CartLine,
            crate::services::commerce::ShippingSnapshot,
            crate::services::commerce::PaymentOrderResponse,
            crate::services::commerce::ReconcileOutcome,
            crate::handlers::commerce::carts::AddItemRequest,
            crate::handlers::commerce::carts::UpdateQuantityRequest,
            crate::handlers::commerce::carts::MergeResponse,
            crate::handlers::commerce::checkout::PaymentOrderRequest,
            crate::handlers::commerce::checkout::VerifyPaymentRequest,
            crate::handlers::commerce::checkout::VerifyPaymentResponse,
            crate::handlers::payment_webhooks::WebhookAck,
            crate::services::orders::OrderResponse,
            crate::services::orders::OrderItemResponse,
            crate::services::orders::OrderListResponse,
            crate::entities::order::OrderStatus,
            crate::entities::order::PaymentStatus,
            crate::handlers::health::HealthResponse,

            // Error types
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
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
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_generation() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("Storefront API"));
        assert!(json.contains("/api/v1/cart/items"));
        assert!(json.contains("/api/v1/payments/webhook"));
        assert!(json.contains("bearer_auth"));
    }
}
