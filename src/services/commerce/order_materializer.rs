use crate::{
    db::is_unique_violation,
    entities::{
        commerce::{cart_item, CartItem},
        order::{self, OrderStatus, PaymentStatus},
        order_item, payment,
        payment_intent::IntentLine,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::commerce::{
        cart_service::touch_cart,
        payment_orders::find_intent,
        pricing_service::PricingService,
        shipping::ShippingSnapshot,
    },
    session::CartOwner,
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Which trigger reported the payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConfirmationSource {
    ClientCallback,
    Webhook,
}

/// A confirmed payment to turn into an order. Owner, lines and amount come
/// from the payment intent recorded for `gateway_order_id`.
#[derive(Debug, Clone)]
pub struct MaterializeRequest {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub shipping: ShippingSnapshot,
    pub method: Option<String>,
    /// Amount the gateway says it captured, minor units
    pub captured_amount_minor: Option<i64>,
    pub raw_entity: Option<Value>,
    pub source: ConfirmationSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MaterializeOutcome {
    Created(order::Model),
    /// Another trigger already committed an order for this payment.
    AlreadyMaterialized { order_id: Uuid },
    /// No intent recorded for the gateway order and no order for the payment.
    NothingToMaterialize,
}

/// Writes the order, its lines and the payment audit row, and takes the paid
/// lines out of the cart, in one transaction.
///
/// Exactly-once is enforced by the unique index on
/// `orders.gateway_payment_id`: a concurrent loser gets a unique violation,
/// rolls back and reports the winner's order instead.
#[derive(Clone)]
pub struct OrderMaterializer {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    pricing: PricingService,
}

impl OrderMaterializer {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        pricing: PricingService,
    ) -> Self {
        Self {
            db,
            event_sender,
            pricing,
        }
    }

    /// Materializes the order for a captured payment.
    ///
    /// # Errors
    ///
    /// * `ServiceError::OrderMaterializationFailed` - the transaction failed
    ///   and was rolled back; the cart is untouched and a retry is safe
    #[instrument(skip(self, request), fields(
        gateway_payment_id = %request.gateway_payment_id,
        source = %request.source,
    ))]
    pub async fn materialize(
        &self,
        request: &MaterializeRequest,
    ) -> Result<MaterializeOutcome, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| self.failed(e.into()))?;

        let written = self.write_order(&txn, request).await;
        let written = match written {
            Ok(Some(order)) => txn.commit().await.map(|_| Some(order)).map_err(Into::into),
            Ok(None) => {
                rollback(txn).await;
                Ok(None)
            }
            Err(err) => {
                rollback(txn).await;
                Err(err)
            }
        };

        match written {
            Ok(Some(order)) => {
                counter!("storefront.reconcile.materialized", 1);
                self.event_sender.send_or_log(Event::OrderMaterialized {
                    order_id: order.id,
                    gateway_payment_id: request.gateway_payment_id.clone(),
                    total: order.total_amount,
                });
                info!(
                    "Materialized order {} for gateway order {} via {}",
                    order.id, request.gateway_order_id, request.source
                );
                Ok(MaterializeOutcome::Created(order))
            }
            Ok(None) => match self.existing_order(&request.gateway_payment_id).await? {
                Some(order_id) => Ok(MaterializeOutcome::AlreadyMaterialized { order_id }),
                None => Ok(MaterializeOutcome::NothingToMaterialize),
            },
            Err(ServiceError::DatabaseError(err)) if is_unique_violation(&err) => {
                match self.existing_order(&request.gateway_payment_id).await? {
                    Some(order_id) => {
                        info!(
                            "Lost materialization race for payment {}; order {} already exists",
                            request.gateway_payment_id, order_id
                        );
                        Ok(MaterializeOutcome::AlreadyMaterialized { order_id })
                    }
                    None => Err(self.failed(ServiceError::DatabaseError(err))),
                }
            }
            Err(err) => Err(self.failed(err)),
        }
    }

    /// Order already holding `gateway_payment_id`, if any.
    pub async fn existing_order(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<Uuid>, ServiceError> {
        Ok(order::Entity::find()
            .filter(order::Column::GatewayPaymentId.eq(gateway_payment_id))
            .one(&*self.db)
            .await?
            .map(|o| o.id))
    }

    fn failed(&self, err: ServiceError) -> ServiceError {
        counter!("storefront.reconcile.failures", 1);
        error!("Order materialization failed: {}", err);
        ServiceError::OrderMaterializationFailed(err.to_string())
    }

    async fn write_order(
        &self,
        txn: &DatabaseTransaction,
        request: &MaterializeRequest,
    ) -> Result<Option<order::Model>, ServiceError> {
        let already = order::Entity::find()
            .filter(order::Column::GatewayPaymentId.eq(request.gateway_payment_id.as_str()))
            .one(txn)
            .await?;
        if already.is_some() {
            return Ok(None);
        }
        let Some(intent) = find_intent(txn, &request.gateway_order_id).await? else {
            return Ok(None);
        };
        let owner = CartOwner::from_reference(&intent.owner_ref).ok_or_else(|| {
            ServiceError::InternalError(format!(
                "payment intent {} has an unreadable owner",
                intent.id
            ))
        })?;
        let lines = intent.lines()?;
        let subtotal = PricingService::subtotal(lines.iter().map(|l| (l.unit_price, l.quantity)))?;

        let expected_minor = intent.amount_minor;
        let amount_mismatch = request
            .captured_amount_minor
            .is_some_and(|captured| captured != expected_minor);
        if amount_mismatch {
            warn!(
                "Captured amount {:?} differs from charged amount {} for payment {}",
                request.captured_amount_minor, expected_minor, request.gateway_payment_id
            );
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(owner.user_id()),
            guest_session: Set(owner.session_token().map(str::to_string)),
            status: Set(OrderStatus::Processing),
            payment_status: Set(PaymentStatus::Paid),
            subtotal: Set(subtotal),
            total_amount: Set(subtotal),
            currency: Set(intent.currency.clone()),
            shipping_address: Set(serde_json::to_value(&request.shipping)?),
            contact_email: Set(request.shipping.email.clone()),
            contact_phone: Set(request.shipping.phone.clone()),
            gateway_order_id: Set(request.gateway_order_id.clone()),
            gateway_payment_id: Set(Some(request.gateway_payment_id.clone())),
            metadata: Set(Some(json!({
                "source": request.source,
                "cart_id": intent.cart_id,
                "expected_amount_minor": expected_minor,
                "captured_amount_minor": request.captured_amount_minor,
                "amount_mismatch": amount_mismatch,
            }))),
            created_at: Set(now),
            updated_at: Set(now),
        };
        // Unique index on gateway_payment_id rejects the second writer here.
        let order = order.insert(txn).await?;

        for line in &lines {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                product_name: Set(line.product_name.clone()),
                quantity: Set(line.quantity),
                price: Set(line.unit_price),
                created_at: Set(now),
            }
            .insert(txn)
            .await?;
        }

        let captured_major = request
            .captured_amount_minor
            .map(|minor| self.pricing.from_minor_units(minor))
            .unwrap_or(subtotal);
        payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            gateway_payment_id: Set(request.gateway_payment_id.clone()),
            gateway_order_id: Set(request.gateway_order_id.clone()),
            amount: Set(captured_major),
            currency: Set(intent.currency.clone()),
            status: Set(payment::STATUS_CAPTURED.to_string()),
            method: Set(request.method.clone()),
            metadata: Set(request.raw_entity.clone()),
            created_at: Set(now),
        }
        .insert(txn)
        .await?;

        release_paid_lines(txn, intent.cart_id, &lines).await?;

        Ok(Some(order))
    }
}

/// Removes what was paid for from the cart. Lines added after the payment
/// order keep their extra quantity.
async fn release_paid_lines(
    txn: &DatabaseTransaction,
    cart_id: Uuid,
    paid: &[IntentLine],
) -> Result<(), ServiceError> {
    if !touch_cart(txn, cart_id).await? {
        return Ok(());
    }
    for line in paid {
        let Some(item) = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .filter(cart_item::Column::ProductId.eq(line.product_id))
            .one(txn)
            .await?
        else {
            continue;
        };
        if item.quantity <= line.quantity {
            CartItem::delete_by_id(item.id).exec(txn).await?;
        } else {
            let remaining = item.quantity - line.quantity;
            let mut active: cart_item::ActiveModel = item.into();
            active.quantity = Set(remaining);
            active.updated_at = Set(Utc::now());
            active.update(txn).await?;
        }
    }
    Ok(())
}

async fn rollback(txn: DatabaseTransaction) {
    if let Err(err) = txn.rollback().await {
        warn!("Rollback failed: {}", err);
    }
}
