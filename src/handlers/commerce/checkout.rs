use crate::handlers::common::{
    created_response, existing_owner, map_service_error, success_response, validate_input,
};
use crate::{
    errors::{ApiError, ErrorResponse, ServiceError},
    services::commerce::{PaymentOrderResponse, ReconcileOutcome, ShippingSnapshot},
    AppState,
};
use axum::{
    extract::{Json, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Router,
};
use axum_extra::extract::cookie::SignedCookieJar;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/payment-order", post(create_payment_order))
        .route("/verify", post(verify_payment))
}

/// Create a gateway order for the current cart
///
/// The amount is computed from the cart on the server; the response carries
/// what the client needs to open the payment widget.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/payment-order",
    request_body = PaymentOrderRequest,
    responses(
        (status = 201, description = "Gateway order created", body = PaymentOrderResponse),
        (status = 400, description = "Empty cart or invalid shipping details", body = ErrorResponse),
        (status = 502, description = "Gateway failure", body = ErrorResponse),
    ),
    tag = "Checkout"
)]
pub async fn create_payment_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: SignedCookieJar,
    Json(payload): Json<PaymentOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let owner = state
        .session
        .resolve(&headers, &jar)
        .ok_or_else(|| map_service_error(ServiceError::EmptyCart))?;

    let order = state
        .services
        .payment_orders
        .create_payment_order(&owner, &payload.shipping)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(order))
}

/// Confirm a payment from the checkout widget callback
#[utoipa::path(
    post,
    path = "/api/v1/checkout/verify",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Order confirmed", body = VerifyPaymentResponse),
        (status = 400, description = "Signature mismatch or invalid input", body = ErrorResponse),
        (status = 500, description = "Payment kept; order will be confirmed by webhook", body = ErrorResponse),
    ),
    tag = "Checkout"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: SignedCookieJar,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let owner = existing_owner(&state, &headers, &jar)?;

    let outcome = state
        .services
        .reconciliation
        .confirm_client_callback(
            &owner,
            &payload.gateway_order_id,
            &payload.gateway_payment_id,
            &payload.signature,
            &payload.shipping,
        )
        .await
        .map_err(map_service_error)?;

    let response = match outcome {
        ReconcileOutcome::Materialized { order_id } => VerifyPaymentResponse {
            order_id,
            already_confirmed: false,
        },
        ReconcileOutcome::AlreadyConfirmed { order_id } => VerifyPaymentResponse {
            order_id,
            already_confirmed: true,
        },
        ReconcileOutcome::Unreconcilable { reason } => {
            return Err(map_service_error(ServiceError::InvalidOperation(reason)))
        }
        ReconcileOutcome::Ignored { event } => {
            return Err(map_service_error(ServiceError::InternalError(format!(
                "unexpected outcome for client callback: {}",
                event
            ))))
        }
    };

    Ok(success_response(response))
}

// Request DTOs

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PaymentOrderRequest {
    #[validate]
    pub shipping: ShippingSnapshot,
}

/// Fields returned by the checkout widget plus the checkout form.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyPaymentRequest {
    #[serde(alias = "razorpay_order_id")]
    #[validate(length(min = 1))]
    pub gateway_order_id: String,
    #[serde(alias = "razorpay_payment_id")]
    #[validate(length(min = 1))]
    pub gateway_payment_id: String,
    #[serde(alias = "razorpay_signature")]
    #[validate(length(min = 1))]
    pub signature: String,
    /// Checked only for payments not yet confirmed
    pub shipping: ShippingSnapshot,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyPaymentResponse {
    pub order_id: Uuid,
    /// True when another confirmation had already created the order
    pub already_confirmed: bool,
}
