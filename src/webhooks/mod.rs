//! Inbound payment gateway webhooks.

pub mod signature;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;

pub use signature::{client_signature_valid, webhook_signature_valid};

/// Header carrying the hex HMAC of the raw webhook body.
pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

pub const EVENT_PAYMENT_CAPTURED: &str = "payment.captured";
pub const EVENT_ORDER_PAID: &str = "order.paid";

/// Gateway webhook envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub payload: WebhookPayload,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub payment: Option<EntityEnvelope<PaymentEntity>>,
    #[serde(default)]
    pub order: Option<EntityEnvelope<OrderEntity>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityEnvelope<T> {
    pub entity: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default, deserialize_with = "lenient_notes")]
    pub notes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderEntity {
    pub id: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub amount_paid: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_notes")]
    pub notes: BTreeMap<String, String>,
}

/// Payment capture extracted from a webhook, ready for reconciliation.
#[derive(Debug, Clone)]
pub struct CapturedPayment {
    pub gateway_payment_id: String,
    pub gateway_order_id: Option<String>,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
    pub method: Option<String>,
    pub notes: BTreeMap<String, String>,
    /// Raw entity JSON for the payment audit row
    pub raw_entity: Value,
}

impl WebhookEvent {
    pub fn parse(body: &[u8]) -> Result<(Self, Value), serde_json::Error> {
        let raw: Value = serde_json::from_slice(body)?;
        let event = serde_json::from_value(raw.clone())?;
        Ok((event, raw))
    }

    pub fn is_handled(&self) -> bool {
        matches!(self.event.as_str(), EVENT_PAYMENT_CAPTURED | EVENT_ORDER_PAID)
    }

    /// Pulls the capture out of the payload. Notes come from the payment
    /// entity, falling back to the order entity when the payment has none.
    ///
    /// `None` when the payload carries no payment id, which is the
    /// idempotency key and cannot be invented.
    pub fn captured_payment(&self, raw: &Value) -> Option<CapturedPayment> {
        let payment = self.payload.payment.as_ref().map(|p| &p.entity);
        let order = self.payload.order.as_ref().map(|o| &o.entity);
        let payment = payment?;

        let notes = if payment.notes.is_empty() {
            order.map(|o| o.notes.clone()).unwrap_or_default()
        } else {
            payment.notes.clone()
        };

        let raw_entity = raw
            .pointer("/payload/payment/entity")
            .or_else(|| raw.pointer("/payload/order/entity"))
            .cloned()
            .unwrap_or(Value::Null);

        Some(CapturedPayment {
            gateway_payment_id: payment.id.clone(),
            gateway_order_id: payment
                .order_id
                .clone()
                .or_else(|| order.map(|o| o.id.clone())),
            amount_minor: payment
                .amount
                .or_else(|| order.and_then(|o| o.amount_paid.or(o.amount))),
            currency: payment
                .currency
                .clone()
                .or_else(|| order.and_then(|o| o.currency.clone())),
            method: payment.method.clone(),
            notes,
            raw_entity,
        })
    }
}

// The gateway sends `notes` as `[]` when empty and may send non-string
// values; both are folded into a string map.
fn lenient_notes<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Object(map)) => map
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, v)
            })
            .collect(),
        _ => BTreeMap::new(),
    })
}
