use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use tracing::{error, info};
use utoipa::ToSchema;

use crate::{
    errors::ServiceError, services::commerce::ReconcileOutcome, webhooks::SIGNATURE_HEADER,
    AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub status: String,
    pub outcome: ReconcileOutcome,
}

// POST /api/v1/payments/webhook
//
// 400 for a missing or bad signature and for malformed bodies, 200 once the
// event is handled or deliberately ignored, 500 when materialization fails
// so the gateway redelivers.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    params(
        ("X-Razorpay-Signature" = String, Header, description = "Hex HMAC-SHA256 of the raw body")
    ),
    responses(
        (status = 200, description = "Webhook accepted", body = WebhookAck),
        (status = 400, description = "Missing or invalid signature, or invalid payload", body = crate::errors::ErrorResponse),
        (status = 500, description = "Materialization failed; redeliver", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state
        .services
        .reconciliation
        .handle_webhook(&body, signature)
        .await
        .map_err(|err| {
            if err.status_code().is_server_error() {
                error!("Payment webhook failed, gateway will redeliver: {}", err);
            }
            err
        })?;

    match &outcome {
        ReconcileOutcome::Unreconcilable { reason } => {
            error!("Acknowledging unreconcilable payment webhook: {}", reason)
        }
        other => info!("Payment webhook handled: {:?}", other),
    }

    Ok((
        StatusCode::OK,
        Json(WebhookAck {
            status: "ok".to_string(),
            outcome,
        }),
    ))
}
