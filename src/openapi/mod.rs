use axum::{response::Json, routing::get, Router};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront API

Shopping cart and order lifecycle for the clothing storefront.

## Authentication

Every `/api/v1` endpoint expects a JWT in the Authorization header:

```
Authorization: Bearer <your-jwt-token>
```

Admin endpoints additionally require the `admin` role claim.

## Error Handling

Failures share one body shape:

```json
{
  "error": "Bad Request",
  "message": "Insufficient stock: Linen Shirt has 1 in stock, 2 requested",
  "details": "insufficient_stock",
  "request_id": "5f0c...",
  "timestamp": "2026-01-01T00:00:00Z"
}
```

## Pagination

Order listings accept `page` and `limit` (default 20, admin 50, max 100).
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Cart", description = "Per-user shopping cart"),
        (name = "Orders", description = "Checkout and order lifecycle"),
        (name = "Admin", description = "Order administration")
    ),
    paths(
        // Cart
        crate::handlers::commerce::carts::get_cart,
        crate::handlers::commerce::carts::get_cart_summary,
        crate::handlers::commerce::carts::add_to_cart,
        crate::handlers::commerce::carts::update_cart_item,
        crate::handlers::commerce::carts::remove_cart_item,
        crate::handlers::commerce::carts::clear_cart,
        crate::handlers::commerce::carts::merge_guest_cart,

        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::order_statistics,
        crate::handlers::orders::cancellable_orders,
        crate::handlers::orders::get_order_by_number,
        crate::handlers::orders::get_order,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::update_payment_status,

        // Admin
        crate::handlers::orders::admin_list_orders,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::update_shipping,
    ),
    components(
        schemas(
            crate::handlers::commerce::carts::AddItemRequest,
            crate::handlers::commerce::carts::UpdateQuantityRequest,
            crate::handlers::commerce::carts::MergeCartRequest,
            crate::services::commerce::cart_service::CartView,
            crate::services::commerce::cart_service::CartSummary,
            crate::services::commerce::cart_service::MergeOutcome,

            crate::services::orders::CreateOrderInput,
            crate::services::orders::OrderView,
            crate::services::orders::OrderPage,
            crate::handlers::orders::OrderStatistics,
            crate::services::order_status::CancelOrderInput,
            crate::services::order_status::UpdateStatusInput,
            crate::services::order_status::UpdateShippingInput,
            crate::services::order_status::UpdatePaymentInput,
            crate::entities::OrderStatus,
            crate::entities::PaymentStatus,
            crate::entities::PaymentMethod,

            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

/// Serves the generated document at `/api-docs/openapi.json`
pub fn docs_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDocV1::openapi()) }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_cart_and_order_paths() {
        let json = serde_json::to_string(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("Storefront API"));
        assert!(json.contains("/api/v1/cart/items/{item_id}"));
        assert!(json.contains("/api/v1/orders/{id}/cancel"));
        assert!(json.contains("/api/v1/orders/admin/all"));
    }
}
