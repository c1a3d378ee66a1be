use async_trait::async_trait;
use metrics::counter;
use std::time::Duration;
use tracing::{error, info, instrument};

use super::{CreateGatewayOrder, GatewayOrder, PaymentGateway};
use crate::{config::AppConfig, errors::ServiceError};

/// Razorpay Orders API client.
#[derive(Clone)]
pub struct RazorpayGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl std::fmt::Debug for RazorpayGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RazorpayGateway")
            .field("base_url", &self.base_url)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl RazorpayGateway {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ServiceError> {
        Self::new(
            config.gateway_base_url.clone(),
            config.gateway_key_id.clone(),
            config.gateway_key_secret.clone(),
            Duration::from_secs(config.gateway_timeout_secs),
        )
    }

    fn failed(reason: String) -> ServiceError {
        counter!("storefront.payment.gateway_errors", 1);
        error!("Gateway order creation failed: {}", reason);
        ServiceError::PaymentGatewayError(reason)
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    #[instrument(skip(self, request), fields(amount = request.amount, receipt = %request.receipt))]
    async fn create_order(
        &self,
        request: CreateGatewayOrder,
    ) -> Result<GatewayOrder, ServiceError> {
        let url = format!("{}/v1/orders", self.base_url);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Self::failed("gateway timed out".to_string())
                } else {
                    Self::failed(format!("gateway unreachable: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::failed(format!("gateway returned {}: {}", status, body)));
        }

        let order: GatewayOrder = response
            .json()
            .await
            .map_err(|e| Self::failed(format!("undecodable gateway response: {}", e)))?;

        info!("Created gateway order {} for {} minor units", order.id, order.amount);
        Ok(order)
    }
}
