use crate::{
    entities::{
        commerce::CartModel,
        payment_intent::{self, IntentLine},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    payments::{CreateGatewayOrder, PaymentGateway},
    services::commerce::{
        cart_service::{build_view, find_cart, load_lines, CartView},
        pricing_service::PricingService,
        shipping::ShippingSnapshot,
    },
    session::CartOwner,
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, Set,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

pub const NOTE_CART_ID: &str = "cart_id";
pub const NOTE_OWNER: &str = "owner";

/// What the client needs to open the payment widget.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentOrderResponse {
    pub gateway_order_id: String,
    /// Minor currency units
    pub amount: i64,
    pub currency: String,
    pub key_id: String,
}

/// Computes the payable amount from the live cart, asks the gateway for an
/// order and records a payment intent holding the priced lines.
#[derive(Clone)]
pub struct PaymentOrderService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
    pricing: PricingService,
    currency: String,
}

impl PaymentOrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        pricing: PricingService,
        currency: String,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
            pricing,
            currency,
        }
    }

    /// Creates a gateway order for the owner's cart.
    ///
    /// The amount is always recomputed here from current product prices;
    /// the client never supplies it. The gateway order's notes carry the
    /// cart id, owner reference and shipping snapshot so a webhook can
    /// materialize the order without a browser session. The lines and amount
    /// charged are recorded locally against the gateway order id; later cart
    /// edits do not change what a confirmation materializes.
    ///
    /// # Errors
    ///
    /// * `ServiceError::ValidationError` - invalid shipping snapshot
    /// * `ServiceError::EmptyCart` - no cart or no lines
    /// * `ServiceError::PaymentGatewayError` - gateway rejected or timed out
    /// * `ServiceError::DatabaseError` - the intent could not be recorded; the
    ///   gateway order is never handed to the client
    #[instrument(skip(self, shipping), fields(owner = %owner))]
    pub async fn create_payment_order(
        &self,
        owner: &CartOwner,
        shipping: &ShippingSnapshot,
    ) -> Result<PaymentOrderResponse, ServiceError> {
        shipping.validate()?;

        let cart = find_cart(&*self.db, owner)
            .await?
            .ok_or(ServiceError::EmptyCart)?;
        let view = build_view(cart.id, load_lines(&*self.db, cart.id).await?)?;
        if view.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let amount = self.pricing.to_minor_units(view.subtotal)?;
        let request = CreateGatewayOrder {
            amount,
            currency: self.currency.clone(),
            receipt: format!("rcpt_{}", Utc::now().timestamp_millis()),
            notes: order_notes(&cart, owner, shipping),
        };

        let order = self.gateway.create_order(request).await?;

        record_intent(&*self.db, &order.id, owner, &view, order.amount, &order.currency, shipping)
            .await
            .map_err(|e| {
                error!(
                    "Gateway order {} created but its intent was not recorded: {}",
                    order.id, e
                );
                ServiceError::from(e)
            })?;

        counter!("storefront.payment.orders_created", 1);
        self.event_sender.send_or_log(Event::PaymentOrderCreated {
            cart_id: cart.id,
            gateway_order_id: order.id.clone(),
            amount_minor: order.amount,
        });
        info!(
            "Payment order {} created for cart {} ({} {})",
            order.id, cart.id, order.amount, order.currency
        );

        Ok(PaymentOrderResponse {
            gateway_order_id: order.id,
            amount: order.amount,
            currency: order.currency,
            key_id: self.gateway.key_id().to_string(),
        })
    }
}

fn order_notes(
    cart: &CartModel,
    owner: &CartOwner,
    shipping: &ShippingSnapshot,
) -> BTreeMap<String, String> {
    let mut notes = shipping.to_notes();
    notes.insert(NOTE_CART_ID.to_string(), cart.id.to_string());
    notes.insert(NOTE_OWNER.to_string(), owner.to_reference());
    notes
}

async fn record_intent<C: ConnectionTrait>(
    conn: &C,
    gateway_order_id: &str,
    owner: &CartOwner,
    view: &CartView,
    amount_minor: i64,
    currency: &str,
    shipping: &ShippingSnapshot,
) -> Result<payment_intent::Model, DbErr> {
    let lines: Vec<IntentLine> = view
        .items
        .iter()
        .map(|line| IntentLine {
            product_id: line.product_id,
            product_name: line.product_name.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
        })
        .collect();
    let to_json = |value: serde_json::Result<serde_json::Value>| {
        value.map_err(|e| DbErr::Custom(format!("intent serialization failed: {}", e)))
    };

    let now = Utc::now();
    payment_intent::ActiveModel {
        id: Set(Uuid::new_v4()),
        gateway_order_id: Set(gateway_order_id.to_string()),
        owner_ref: Set(owner.to_reference()),
        cart_id: Set(view.cart_id),
        amount_minor: Set(amount_minor),
        currency: Set(currency.to_string()),
        lines: Set(to_json(serde_json::to_value(&lines))?),
        shipping: Set(to_json(serde_json::to_value(shipping))?),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await
}

/// Intent recorded for a gateway order.
pub(crate) async fn find_intent<C: ConnectionTrait>(
    conn: &C,
    gateway_order_id: &str,
) -> Result<Option<payment_intent::Model>, DbErr> {
    payment_intent::Entity::find()
        .filter(payment_intent::Column::GatewayOrderId.eq(gateway_order_id))
        .one(conn)
        .await
}

/// Hands the intents of a merged guest cart to the cart that absorbed it,
/// so payments started as a guest still settle after sign-in.
pub(crate) async fn repoint_intents<C: ConnectionTrait>(
    conn: &C,
    from_cart: Uuid,
    to_cart: Uuid,
    to_owner: &CartOwner,
) -> Result<u64, DbErr> {
    let result = payment_intent::Entity::update_many()
        .col_expr(payment_intent::Column::CartId, Expr::value(to_cart))
        .col_expr(
            payment_intent::Column::OwnerRef,
            Expr::value(to_owner.to_reference()),
        )
        .col_expr(payment_intent::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(payment_intent::Column::CartId.eq(from_cart))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// Cart id recorded in gateway notes, if well formed.
pub fn cart_id_from_notes(notes: &BTreeMap<String, String>) -> Option<Uuid> {
    notes.get(NOTE_CART_ID).and_then(|v| Uuid::parse_str(v).ok())
}
