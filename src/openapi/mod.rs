use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront Commerce API

Backend for a general-purpose storefront: product catalog, guest and
authenticated carts, checkout with regional shipping fees, order
lifecycle, and payment confirmation through a Paystack-style gateway.

## Authentication

Customer and admin sessions use JWT bearer tokens. The token is returned
by the login endpoints and also set as an HttpOnly `token` cookie; either
form is accepted:

```
Authorization: Bearer <jwt>
```

Anonymous shoppers are tracked through a `cartId` guest cookie minted on
their first cart write. Signing up or logging in adopts the guest cart
and any guest orders into the account.

## Rate Limiting

Credential endpoints (`/auth/*`, `/api/admin/login`) are rate limited per
client address. Responses carry `X-RateLimit-Limit`,
`X-RateLimit-Remaining` and `X-RateLimit-Reset`; a denied request gets
429 with `Retry-After`.

## Errors

All errors share one envelope:

```json
{
  "success": false,
  "error": "Not Found",
  "message": "Product not found",
  "request_id": "req-abc123",
  "timestamp": "2025-01-01T00:00:00Z"
}
```
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "products", description = "Catalog browsing and admin product management"),
        (name = "carts", description = "Guest and authenticated cart operations"),
        (name = "orders", description = "Checkout, guest orders and order lifecycle"),
        (name = "shipping", description = "Shipping quotes and admin shipping options"),
        (name = "payments", description = "Payment sessions and verification"),
        (name = "webhooks", description = "Gateway callback intake"),
        (name = "auth", description = "Customer signup, login and session"),
        (name = "admin", description = "Back-office session endpoints")
    ),
    paths(
        crate::handlers::products::list_products,
        crate::handlers::products::get_product,
        crate::handlers::products::create_product,
        crate::handlers::products::update_product,
        crate::handlers::products::delete_product,

        crate::handlers::carts::get_cart,
        crate::handlers::carts::add_to_cart,
        crate::handlers::carts::update_cart_item,
        crate::handlers::carts::remove_cart_item,
        crate::handlers::carts::clear_cart,
        crate::handlers::carts::checkout,

        crate::handlers::orders::create_order,
        crate::handlers::orders::create_guest_order,
        crate::handlers::orders::list_my_orders,
        crate::handlers::orders::list_all_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::attach_guest_orders,

        crate::handlers::shipping::list_shipping_prices,
        crate::handlers::shipping::calculate_shipping,
        crate::handlers::shipping::list_shipping_options,
        crate::handlers::shipping::create_shipping_option,
        crate::handlers::shipping::update_shipping_option,
        crate::handlers::shipping::delete_shipping_option,

        crate::handlers::payments::create_payment,
        crate::handlers::payments::verify_payment,
        crate::handlers::webhooks::payment_webhook,

        crate::handlers::auth::signup,
        crate::handlers::auth::login,
        crate::handlers::auth::logout,
        crate::handlers::auth::me,

        crate::handlers::admin::admin_login,
        crate::handlers::admin::admin_logout,
        crate::handlers::admin::admin_me,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,
            crate::PaginatedResponse<serde_json::Value>,

            crate::entities::product::Model,
            crate::entities::order::Model,
            crate::entities::order::FulfillmentStatus,
            crate::entities::order::PaymentStatus,
            crate::entities::order::PaymentMethod,
            crate::entities::order_item::Model,
            crate::entities::shipping_option::Model,
            crate::entities::user::Model,
            crate::entities::user::Role,

            crate::services::catalog::CreateProductRequest,
            crate::services::catalog::UpdateProductRequest,
            crate::services::catalog::ProductSort,
            crate::services::catalog::ProductPage,

            crate::services::carts::AddItemRequest,
            crate::services::carts::UpdateItemRequest,
            crate::services::carts::ProductSummary,
            crate::services::carts::CartLineView,
            crate::services::carts::CartView,

            crate::services::shipping::CreateShippingOptionRequest,
            crate::services::shipping::UpdateShippingOptionRequest,
            crate::services::shipping::ShippingQuote,

            crate::services::orders::ShippingAddress,
            crate::services::orders::GuestContact,
            crate::services::orders::CheckoutRequest,
            crate::services::orders::DirectOrderItem,
            crate::services::orders::DirectOrderRequest,
            crate::services::orders::OrderView,
            crate::services::orders::OrderPage,

            crate::services::payments::InitPaymentRequest,
            crate::services::payments::PaymentSession,
            crate::services::payments::PaymentVerification,

            crate::handlers::auth::SignupRequest,
            crate::handlers::auth::LoginRequest,
            crate::handlers::auth::AuthSession,
            crate::handlers::orders::UpdateOrderStatusRequest,
            crate::handlers::orders::AttachGuestOrdersRequest,
            crate::handlers::orders::AttachGuestOrdersResponse,
            crate::handlers::shipping::QuoteShippingRequest,
            crate::handlers::payments::VerifyPaymentRequest,

            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "Bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
