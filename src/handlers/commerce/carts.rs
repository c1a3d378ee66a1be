use crate::handlers::common::{
    existing_owner, map_service_error, no_content_response, success_response, validate_input,
};
use crate::{
    errors::{ApiError, ErrorResponse},
    services::commerce::CartView,
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use axum_extra::extract::cookie::SignedCookieJar;
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart))
        .route("/items", post(add_to_cart))
        .route("/items/:item_id", put(update_cart_item).delete(remove_cart_item))
        .route("/merge", post(merge_cart))
}

/// Get the caller's cart
///
/// Returns `null` when the caller has no cart yet. Never sets a cookie.
#[utoipa::path(
    get,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Cart, or null when none exists", body = Option<CartView>),
    ),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: SignedCookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let Some(owner) = state.session.resolve(&headers, &jar) else {
        return Ok(success_response(Option::<CartView>::None));
    };

    let cart = state
        .services
        .cart
        .get_cart(&owner)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Add a product to the cart
///
/// Creates the cart, and for anonymous callers the session cookie, on first use.
#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    request_body = AddItemRequest,
    responses(
        (status = 200, description = "Updated cart", body = CartView),
        (status = 400, description = "Invalid quantity", body = ErrorResponse),
        (status = 404, description = "Unknown product", body = ErrorResponse),
        (status = 503, description = "Cart unavailable", body = ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: SignedCookieJar,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let (owner, jar) = state.session.resolve_or_issue(&headers, jar);

    let cart = &state.services.cart;
    cart.add_item(&owner, payload.product_id, payload.quantity)
        .await
        .map_err(map_service_error)?;
    let view = cart.get_cart(&owner).await.map_err(map_service_error)?;

    Ok((jar, success_response(view)))
}

/// Set a line's quantity; zero or less removes it
#[utoipa::path(
    put,
    path = "/api/v1/cart/items/{item_id}",
    params(("item_id" = Uuid, Path, description = "Cart item ID")),
    request_body = UpdateQuantityRequest,
    responses(
        (status = 200, description = "Updated cart", body = CartView),
        (status = 404, description = "Item not in caller's cart", body = ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn update_cart_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: SignedCookieJar,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = existing_owner(&state, &headers, &jar)?;

    let cart = &state.services.cart;
    cart.set_quantity(&owner, item_id, payload.quantity)
        .await
        .map_err(map_service_error)?;
    let view = cart.get_cart(&owner).await.map_err(map_service_error)?;

    Ok(success_response(view))
}

/// Remove a line from the cart
#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{item_id}",
    params(("item_id" = Uuid, Path, description = "Cart item ID")),
    responses(
        (status = 204, description = "Removed"),
        (status = 404, description = "Item not in caller's cart", body = ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn remove_cart_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: SignedCookieJar,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = existing_owner(&state, &headers, &jar)?;

    state
        .services
        .cart
        .remove_item(&owner, item_id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

/// Fold the anonymous cart into the signed-in user's cart
///
/// Called right after sign-in. A failed merge does not fail the request:
/// the guest cookie is kept so the merge can be retried.
#[utoipa::path(
    post,
    path = "/api/v1/cart/merge",
    responses(
        (status = 200, description = "Merge result", body = MergeResponse),
        (status = 401, description = "Sign in required", body = ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn merge_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: SignedCookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = state
        .session
        .require_user(&headers)
        .map_err(map_service_error)?;

    let Some(guest_token) = state.session.guest_token(&jar) else {
        return Ok((
            jar,
            success_response(MergeResponse {
                merged: false,
                merged_lines: 0,
            }),
        ));
    };

    match state
        .services
        .cart_merge
        .merge_guest_cart(&guest_token, user_id)
        .await
    {
        Ok(outcome) => {
            let jar = state.session.clear_guest_cookie(jar);
            Ok((
                jar,
                success_response(MergeResponse {
                    merged: outcome.merged_lines > 0,
                    merged_lines: outcome.merged_lines,
                }),
            ))
        }
        Err(err) => {
            warn!(user_id = %user_id, "Guest cart merge failed, keeping guest cart: {}", err);
            Ok((
                jar,
                success_response(MergeResponse {
                    merged: false,
                    merged_lines: 0,
                }),
            ))
        }
    }
}

// Request DTOs

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[serde(default = "default_quantity")]
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateQuantityRequest {
    pub quantity: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MergeResponse {
    pub merged: bool,
    pub merged_lines: usize,
}
