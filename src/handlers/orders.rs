use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Serialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::{
    auth::{AuthRouterExt, AuthUser, ADMIN_ROLE},
    handlers::common::{
        created_response, message_response, parse_id, requester, success_response,
        validate_input, CreatedResult, JsonResult,
    },
    services::{
        order_status::{
            CancelOrderInput, UpdatePaymentInput, UpdateShippingInput, UpdateStatusInput,
        },
        orders::{
            AdminOrdersQuery, CreateOrderInput, ListOrdersQuery, OrderPage, OrderView,
            StatusStatistics,
        },
    },
    ApiResponse, AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderStatistics {
    pub total_orders: u64,
    /// Keyed by order status
    pub by_status: BTreeMap<String, StatusStatistics>,
}

/// Customer-facing order routes; each handler enforces ownership itself.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/stats", get(order_statistics))
        .route("/orders/cancellable", get(cancellable_orders))
        .route("/orders/number/:order_number", get(get_order_by_number))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/cancel", put(cancel_order))
        .route("/orders/:id/payment", put(update_payment_status))
}

/// Routes that require the admin role
pub fn admin_order_routes() -> Router<AppState> {
    Router::new()
        .route("/orders/admin/all", get(admin_list_orders))
        .route("/orders/:id/status", put(update_order_status))
        .route("/orders/:id/shipping", put(update_shipping))
        .with_role(ADMIN_ROLE)
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderInput,
    responses(
        (status = 201, description = "Order placed", body = ApiResponse<OrderView>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid input, stock, product or payment problem", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Duplicate submission", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn create_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateOrderInput>,
) -> CreatedResult<OrderView> {
    let order = state
        .services
        .orders
        .create_order(auth_user.user_uuid()?, request)
        .await?;
    Ok(created_response(order, "Order placed"))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(ListOrdersQuery),
    responses(
        (status = 200, description = "The caller's orders", body = ApiResponse<OrderPage>),
        (status = 400, description = "Unsupported sort", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
    auth_user: AuthUser,
) -> JsonResult<OrderPage> {
    let page = state
        .services
        .orders
        .list_orders(auth_user.user_uuid()?, query)
        .await?;
    Ok(success_response(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/admin/all",
    params(AdminOrdersQuery),
    responses(
        (status = 200, description = "Orders across all customers", body = ApiResponse<OrderPage>),
        (status = 400, description = "Malformed date filter", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn admin_list_orders(
    State(state): State<AppState>,
    Query(query): Query<AdminOrdersQuery>,
) -> JsonResult<OrderPage> {
    let page = state.services.orders.admin_list_orders(query).await?;
    Ok(success_response(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/stats",
    responses(
        (status = 200, description = "Count and total per status; global for admins", body = ApiResponse<OrderStatistics>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn order_statistics(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> JsonResult<OrderStatistics> {
    let scope = if auth_user.is_admin() {
        None
    } else {
        Some(auth_user.user_uuid()?)
    };
    let by_status = state.services.orders.statistics(scope).await?;
    Ok(success_response(OrderStatistics {
        total_orders: by_status.values().map(|s| s.count).sum(),
        by_status,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/cancellable",
    responses(
        (status = 200, description = "Orders the caller can still cancel", body = ApiResponse<Vec<OrderView>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn cancellable_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> JsonResult<Vec<OrderView>> {
    let orders = state
        .services
        .orders
        .cancellable_orders(auth_user.user_uuid()?)
        .await?;
    Ok(success_response(orders))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/number/{order_number}",
    params(("order_number" = String, Path, description = "Public order number")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderView>),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn get_order_by_number(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
    auth_user: AuthUser,
) -> JsonResult<OrderView> {
    let order = state
        .services
        .orders
        .get_order_by_number(&order_number, requester(&auth_user)?)
        .await?;
    Ok(success_response(order))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = String, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with status history", body = ApiResponse<OrderView>),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth_user: AuthUser,
) -> JsonResult<OrderView> {
    let order = state
        .services
        .orders
        .get_order(parse_id(&id, "order")?, requester(&auth_user)?)
        .await?;
    Ok(success_response(order))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/cancel",
    params(("id" = String, Path, description = "Order id")),
    request_body = CancelOrderInput,
    responses(
        (status = 200, description = "Order cancelled and stock restored", body = ApiResponse<OrderView>),
        (status = 400, description = "Order can no longer be cancelled", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth_user: AuthUser,
    body: Option<Json<CancelOrderInput>>,
) -> JsonResult<OrderView> {
    let input = body.map(|Json(input)| input).unwrap_or_default();
    let order = state
        .services
        .orders
        .cancel_order(parse_id(&id, "order")?, input, requester(&auth_user)?)
        .await?;
    Ok(message_response(order, "Order cancelled"))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    params(("id" = String, Path, description = "Order id")),
    request_body = UpdateStatusInput,
    responses(
        (status = 200, description = "Status overridden", body = ApiResponse<OrderView>),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth_user: AuthUser,
    Json(request): Json<UpdateStatusInput>,
) -> JsonResult<OrderView> {
    validate_input(&request)?;
    let order = state
        .services
        .orders
        .update_status(parse_id(&id, "order")?, request, auth_user.user_uuid()?)
        .await?;
    Ok(success_response(order))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/shipping",
    params(("id" = String, Path, description = "Order id")),
    request_body = UpdateShippingInput,
    responses(
        (status = 200, description = "Shipping details recorded", body = ApiResponse<OrderView>),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn update_shipping(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateShippingInput>,
) -> JsonResult<OrderView> {
    let order = state
        .services
        .orders
        .update_shipping(parse_id(&id, "order")?, request)
        .await?;
    Ok(success_response(order))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/payment",
    params(("id" = String, Path, description = "Order id")),
    request_body = UpdatePaymentInput,
    responses(
        (status = 200, description = "Payment status updated", body = ApiResponse<OrderView>),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn update_payment_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth_user: AuthUser,
    Json(request): Json<UpdatePaymentInput>,
) -> JsonResult<OrderView> {
    let order = state
        .services
        .orders
        .update_payment_status(parse_id(&id, "order")?, request, requester(&auth_user)?)
        .await?;
    Ok(success_response(order))
}
