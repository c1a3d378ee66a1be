use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    services::commerce::{
        order_materializer::{
            ConfirmationSource, MaterializeOutcome, MaterializeRequest, OrderMaterializer,
        },
        payment_orders::{cart_id_from_notes, find_intent},
        shipping::ShippingSnapshot,
    },
    session::CartOwner,
    webhooks::{client_signature_valid, webhook_signature_valid, CapturedPayment, WebhookEvent},
};
use metrics::counter;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// How a payment confirmation was settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Materialized { order_id: Uuid },
    AlreadyConfirmed { order_id: Uuid },
    /// Event type this service does not act on
    Ignored { event: String },
    /// Payment is real but cannot be tied to a cart; needs manual follow-up
    Unreconcilable { reason: String },
}

impl ReconcileOutcome {
    pub fn order_id(&self) -> Option<Uuid> {
        match self {
            Self::Materialized { order_id } | Self::AlreadyConfirmed { order_id } => {
                Some(*order_id)
            }
            _ => None,
        }
    }
}

/// Accepts payment confirmations from the browser callback and the gateway
/// webhook. Both converge on the same materialization, keyed by the gateway
/// payment id, so either may arrive first, twice or not at all.
#[derive(Clone)]
pub struct ReconciliationService {
    db: Arc<DatabaseConnection>,
    materializer: Arc<OrderMaterializer>,
    event_sender: Arc<EventSender>,
    key_secret: String,
    webhook_secret: String,
}

impl ReconciliationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        materializer: Arc<OrderMaterializer>,
        event_sender: Arc<EventSender>,
        key_secret: String,
        webhook_secret: String,
    ) -> Self {
        Self {
            db,
            materializer,
            event_sender,
            key_secret,
            webhook_secret,
        }
    }

    /// Client-callback path: the widget hands back order id, payment id and
    /// signature, and the buyer's form supplies the shipping snapshot.
    ///
    /// The order is built from the intent recorded when the gateway order was
    /// created, so cart edits made after paying are not part of it.
    ///
    /// # Errors
    ///
    /// * `ServiceError::SignatureInvalid` - signature does not match; nothing
    ///   else is done
    /// * `ServiceError::ValidationError` - invalid shipping snapshot
    /// * `ServiceError::NotFound` - the gateway order belongs to another owner
    /// * `ServiceError::OrderMaterializationFailed` - rolled back; the webhook
    ///   will complete it
    #[instrument(skip(self, signature, shipping), fields(owner = %owner))]
    pub async fn confirm_client_callback(
        &self,
        owner: &CartOwner,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
        shipping: &ShippingSnapshot,
    ) -> Result<ReconcileOutcome, ServiceError> {
        if !client_signature_valid(
            gateway_order_id,
            gateway_payment_id,
            signature,
            &self.key_secret,
        ) {
            return Err(self.reject(ConfirmationSource::ClientCallback));
        }

        if let Some(order_id) = self.materializer.existing_order(gateway_payment_id).await? {
            return Ok(self.duplicate(order_id, gateway_payment_id));
        }
        shipping.validate()?;

        let Some(intent) = find_intent(&*self.db, gateway_order_id).await? else {
            return Ok(unreconcilable(gateway_payment_id, "no payment intent for the gateway order"));
        };
        if intent.owner_ref != owner.to_reference() {
            return Err(ServiceError::NotFound(format!(
                "Payment order {} not found",
                gateway_order_id
            )));
        }

        let request = MaterializeRequest {
            gateway_order_id: gateway_order_id.to_string(),
            gateway_payment_id: gateway_payment_id.to_string(),
            shipping: shipping.clone(),
            method: None,
            captured_amount_minor: None,
            raw_entity: Some(json!({
                "razorpay_order_id": gateway_order_id,
                "razorpay_payment_id": gateway_payment_id,
            })),
            source: ConfirmationSource::ClientCallback,
        };
        self.settle(&request).await
    }

    /// Webhook path. `body` must be the raw bytes the signature covers.
    ///
    /// # Errors
    ///
    /// * `ServiceError::BadRequest` - missing signature header or malformed body
    /// * `ServiceError::SignatureInvalid` - signature does not match
    /// * `ServiceError::OrderMaterializationFailed` - rolled back; the
    ///   gateway's redelivery will retry it
    #[instrument(skip(self, body, signature), fields(body_len = body.len()))]
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let signature = signature
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ServiceError::BadRequest("Missing webhook signature".to_string()))?;
        if !webhook_signature_valid(body, signature, &self.webhook_secret) {
            return Err(self.reject(ConfirmationSource::Webhook));
        }

        let (event, raw) = WebhookEvent::parse(body)
            .map_err(|e| ServiceError::BadRequest(format!("Malformed webhook body: {}", e)))?;

        if !event.is_handled() {
            info!("Ignoring webhook event {}", event.event);
            return Ok(ReconcileOutcome::Ignored { event: event.event });
        }

        let Some(captured) = event.captured_payment(&raw) else {
            return Ok(unreconcilable("<none>", "webhook carries no payment entity"));
        };

        if let Some(order_id) = self
            .materializer
            .existing_order(&captured.gateway_payment_id)
            .await?
        {
            return Ok(self.duplicate(order_id, &captured.gateway_payment_id));
        }

        match self.webhook_request(captured).await? {
            Ok(request) => self.settle(&request).await,
            Err(outcome) => Ok(outcome),
        }
    }

    /// Ties the captured payment to its intent; shipping comes from the
    /// gateway notes, or the intent when the notes lack it.
    async fn webhook_request(
        &self,
        captured: CapturedPayment,
    ) -> Result<Result<MaterializeRequest, ReconcileOutcome>, ServiceError> {
        let payment_id = captured.gateway_payment_id.as_str();

        let Some(gateway_order_id) = captured.gateway_order_id else {
            return Ok(Err(unreconcilable(payment_id, "no gateway order id")));
        };
        let Some(intent) = find_intent(&*self.db, &gateway_order_id).await? else {
            return Ok(Err(unreconcilable(
                payment_id,
                "no payment intent for the gateway order",
            )));
        };

        if let Some(noted_cart) = cart_id_from_notes(&captured.notes) {
            if noted_cart != intent.cart_id {
                info!(
                    "Cart {} was merged into {} after payment order {}",
                    noted_cart, intent.cart_id, gateway_order_id
                );
            }
        }

        if let Some(currency) = captured.currency.as_deref() {
            if !currency.eq_ignore_ascii_case(&intent.currency) {
                warn!(
                    "Payment {} captured in {} but gateway order {} was created in {}",
                    payment_id, currency, gateway_order_id, intent.currency
                );
            }
        }

        let shipping = ShippingSnapshot::from_notes(&captured.notes)
            .or_else(|| serde_json::from_value(intent.shipping.clone()).ok());
        let Some(shipping) = shipping else {
            return Ok(Err(unreconcilable(payment_id, "no shipping snapshot")));
        };

        Ok(Ok(MaterializeRequest {
            gateway_order_id,
            gateway_payment_id: captured.gateway_payment_id,
            shipping,
            method: captured.method,
            captured_amount_minor: captured.amount_minor,
            raw_entity: Some(captured.raw_entity),
            source: ConfirmationSource::Webhook,
        }))
    }

    async fn settle(&self, request: &MaterializeRequest) -> Result<ReconcileOutcome, ServiceError> {
        match self.materializer.materialize(request).await? {
            MaterializeOutcome::Created(order) => {
                Ok(ReconcileOutcome::Materialized { order_id: order.id })
            }
            MaterializeOutcome::AlreadyMaterialized { order_id } => {
                Ok(self.duplicate(order_id, &request.gateway_payment_id))
            }
            MaterializeOutcome::NothingToMaterialize => Ok(unreconcilable(
                &request.gateway_payment_id,
                "no payment intent for the gateway order",
            )),
        }
    }

    fn duplicate(&self, order_id: Uuid, gateway_payment_id: &str) -> ReconcileOutcome {
        counter!("storefront.reconcile.duplicates", 1);
        self.event_sender
            .send_or_log(Event::PaymentConfirmationDuplicate {
                order_id,
                gateway_payment_id: gateway_payment_id.to_string(),
            });
        info!(
            "Payment {} already confirmed as order {}",
            gateway_payment_id, order_id
        );
        ReconcileOutcome::AlreadyConfirmed { order_id }
    }

    fn reject(&self, source: ConfirmationSource) -> ServiceError {
        counter!("storefront.reconcile.signature_rejected", 1);
        self.event_sender.send_or_log(Event::PaymentSignatureRejected {
            source: source.to_string(),
        });
        ServiceError::SignatureInvalid(format!("{} signature mismatch", source))
    }
}

fn unreconcilable(gateway_payment_id: &str, reason: &str) -> ReconcileOutcome {
    error!(
        gateway_payment_id,
        "Captured payment cannot be reconciled: {}", reason
    );
    ReconcileOutcome::Unreconcilable {
        reason: reason.to_string(),
    }
}
