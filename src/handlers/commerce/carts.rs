use crate::{
    auth::AuthUser,
    handlers::common::{
        created_response, message_response, parse_id, success_response, validate_input,
        CreatedResult, JsonResult,
    },
    services::commerce::cart_service::{
        AddCartItemInput, CartSummary, CartView, GuestCartItem, MergeCartInput, MergeOutcome,
    },
    ApiResponse, AppState,
};
use axum::{
    extract::{Json, Path, State},
    routing::{get, post, put},
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/cart", get(get_cart).delete(clear_cart))
        .route("/cart/summary", get(get_cart_summary))
        .route("/cart/items", post(add_to_cart))
        .route(
            "/cart/items/:item_id",
            put(update_cart_item).delete(remove_cart_item),
        )
        .route("/cart/merge", post(merge_guest_cart))
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
    /// Defaults to the product's list price
    pub price: Option<Decimal>,
    #[validate(length(max = 20))]
    pub size: Option<String>,
    #[validate(length(max = 30))]
    pub color: Option<String>,
    #[validate(length(max = 200))]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateQuantityRequest {
    /// Zero or less removes the line
    #[validate(range(max = 999))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MergeCartRequest {
    #[serde(default)]
    pub guest_cart_items: Vec<GuestCartItem>,
    pub merge_id: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Current cart, empty when none exists", body = ApiResponse<CartView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn get_cart(State(state): State<AppState>, user: AuthUser) -> JsonResult<CartView> {
    let cart = state.services.cart.get_cart(user.user_uuid()?).await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    get,
    path = "/api/v1/cart/summary",
    responses(
        (status = 200, description = "Totals with shipping information", body = ApiResponse<CartSummary>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn get_cart_summary(
    State(state): State<AppState>,
    user: AuthUser,
) -> JsonResult<CartSummary> {
    let summary = state.services.cart.summarize(user.user_uuid()?).await?;
    Ok(success_response(summary))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    request_body = AddItemRequest,
    responses(
        (status = 201, description = "Item added", body = ApiResponse<CartView>),
        (status = 400, description = "Invalid quantity, inactive product or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddItemRequest>,
) -> CreatedResult<CartView> {
    validate_input(&payload)?;

    let input = AddCartItemInput {
        product_id: payload.product_id,
        quantity: payload.quantity,
        price: payload.price,
        size: payload.size,
        color: payload.color,
        notes: payload.notes,
    };

    let cart = state.services.cart.add_item(user.user_uuid()?, input).await?;
    Ok(created_response(cart, "Item added to cart"))
}

#[utoipa::path(
    put,
    path = "/api/v1/cart/items/{item_id}",
    params(("item_id" = String, Path, description = "Cart item id")),
    request_body = UpdateQuantityRequest,
    responses(
        (status = 200, description = "Quantity updated", body = ApiResponse<CartView>),
        (status = 400, description = "Invalid quantity or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 404, description = "Cart or item not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn update_cart_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<String>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> JsonResult<CartView> {
    validate_input(&payload)?;
    let item_id = parse_id(&item_id, "cart item")?;

    let cart = state
        .services
        .cart
        .update_item_quantity(user.user_uuid()?, item_id, payload.quantity)
        .await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{item_id}",
    params(("item_id" = String, Path, description = "Cart item id")),
    responses(
        (status = 200, description = "Item removed", body = ApiResponse<CartView>),
        (status = 404, description = "Cart or item not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn remove_cart_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<String>,
) -> JsonResult<CartView> {
    let item_id = parse_id(&item_id, "cart item")?;
    let cart = state
        .services
        .cart
        .remove_item(user.user_uuid()?, item_id)
        .await?;
    Ok(message_response(cart, "Item removed from cart"))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Cart emptied", body = ApiResponse<CartView>),
        (status = 404, description = "No cart exists", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn clear_cart(State(state): State<AppState>, user: AuthUser) -> JsonResult<CartView> {
    let cart = state.services.cart.clear(user.user_uuid()?).await?;
    Ok(message_response(cart, "Cart cleared"))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/merge",
    request_body = MergeCartRequest,
    responses(
        (status = 200, description = "Guest items merged; unusable lines are reported as skipped", body = ApiResponse<MergeOutcome>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn merge_guest_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<MergeCartRequest>,
) -> JsonResult<MergeOutcome> {
    let outcome = state
        .services
        .cart
        .merge(
            user.user_uuid()?,
            MergeCartInput {
                items: payload.guest_cart_items,
                merge_id: payload.merge_id,
            },
        )
        .await?;
    Ok(success_response(outcome))
}
