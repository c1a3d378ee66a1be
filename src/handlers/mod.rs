pub mod commerce;
pub mod common;
pub mod health;
pub mod orders;
pub mod payment_webhooks;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    payments::PaymentGateway,
    services::{
        commerce::{
            CartMergeService, CartService, OrderMaterializer, PaymentOrderService,
            PricingService, ReconciliationService,
        },
        orders::OrderService,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub cart_merge: Arc<CartMergeService>,
    pub payment_orders: Arc<PaymentOrderService>,
    pub materializer: Arc<OrderMaterializer>,
    pub reconciliation: Arc<ReconciliationService>,
    pub order: Arc<OrderService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        config: &AppConfig,
    ) -> Self {
        let pricing = PricingService::new(config.currency_minor_unit_exponent);

        let cart = Arc::new(CartService::new(db_pool.clone(), event_sender.clone()));
        let cart_merge = Arc::new(CartMergeService::new(
            db_pool.clone(),
            event_sender.clone(),
        ));
        let payment_orders = Arc::new(PaymentOrderService::new(
            db_pool.clone(),
            gateway,
            event_sender.clone(),
            pricing,
            config.default_currency.clone(),
        ));
        let materializer = Arc::new(OrderMaterializer::new(
            db_pool.clone(),
            event_sender.clone(),
            pricing,
        ));
        let reconciliation = Arc::new(ReconciliationService::new(
            db_pool.clone(),
            materializer.clone(),
            event_sender.clone(),
            config.gateway_key_secret.clone(),
            config.gateway_webhook_secret.clone(),
        ));
        let order = Arc::new(OrderService::new(db_pool, event_sender));

        Self {
            cart,
            cart_merge,
            payment_orders,
            materializer,
            reconciliation,
            order,
        }
    }
}
