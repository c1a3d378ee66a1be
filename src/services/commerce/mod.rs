/// Commerce services: cart, checkout and payment reconciliation
pub mod cart_merge;
pub mod cart_service;
pub mod order_materializer;
pub mod payment_orders;
pub mod pricing_service;
pub mod reconciliation;
pub mod shipping;

// Re-export services for convenience
pub use cart_merge::{CartMergeService, MergeOutcome};
pub use cart_service::{CartLine, CartService, CartView};
pub use order_materializer::{
    ConfirmationSource, MaterializeOutcome, MaterializeRequest, OrderMaterializer,
};
pub use payment_orders::{PaymentOrderResponse, PaymentOrderService};
pub use pricing_service::PricingService;
pub use reconciliation::{ReconcileOutcome, ReconciliationService};
pub use shipping::ShippingSnapshot;
