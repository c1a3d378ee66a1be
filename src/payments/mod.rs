//! Payment gateway collaborator.
//!
//! Only order creation goes through here. Confirmation arrives back through
//! the client callback and the webhook, see [`crate::webhooks`].

pub mod razorpay;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::ServiceError;

pub use razorpay::RazorpayGateway;

/// Order creation request, amount in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateGatewayOrder {
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub notes: BTreeMap<String, String>,
}

/// Gateway order as returned by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Public key id handed to the client to open the checkout widget.
    fn key_id(&self) -> &str;

    /// Creates a gateway order. Errors are `PaymentGatewayError` and are
    /// never retried here.
    async fn create_order(&self, request: CreateGatewayOrder)
        -> Result<GatewayOrder, ServiceError>;
}
