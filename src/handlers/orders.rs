use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use uuid::Uuid;

use crate::handlers::common::{map_service_error, success_response, PaginationParams};
use crate::{
    errors::{ApiError, ErrorResponse},
    services::orders::{OrderListResponse, OrderResponse},
    AppState,
};

pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
}

/// List the caller's orders, newest first
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(PaginationParams),
    responses(
        (status = 200, description = "Orders", body = OrderListResponse),
        (status = 401, description = "Sign in required", body = ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = state
        .session
        .require_user(&headers)
        .map_err(map_service_error)?;
    let (page, per_page) = params.normalized();

    let orders = state
        .services
        .order
        .list_for_user(user_id, page, per_page)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(orders))
}

/// Fetch one of the caller's orders with its lines
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order", body = OrderResponse),
        (status = 401, description = "Sign in required", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = state
        .session
        .require_user(&headers)
        .map_err(map_service_error)?;

    let order = state
        .services
        .order
        .get_for_user(user_id, id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}
