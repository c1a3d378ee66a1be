use crate::{
    entities::order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus, PaymentStatus},
    entities::order_item::{self, Entity as OrderItemEntity, Model as OrderItemModel},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    /// Unit price at purchase time
    #[schema(value_type = String)]
    pub price: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    #[schema(value_type = String)]
    pub subtotal: Decimal,
    #[schema(value_type = String)]
    pub total_amount: Decimal,
    pub currency: String,
    #[schema(value_type = Object)]
    pub shipping_address: serde_json::Value,
    pub contact_email: String,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Populated on single-order reads only
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<OrderItemResponse>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Read side of materialized orders plus forward-only status moves.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Lists a buyer's orders, newest first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let paginator = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await.map_err(|e| {
            error!(error = %e, "Failed to count orders");
            ServiceError::DatabaseError(e)
        })?;
        let orders = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(|e| {
                error!(error = %e, page = page, per_page = per_page, "Failed to fetch orders page");
                ServiceError::DatabaseError(e)
            })?;

        Ok(OrderListResponse {
            orders: orders.into_iter().map(|o| to_response(o, vec![])).collect(),
            total,
            page,
            per_page,
        })
    }

    /// Fetches one order with its lines. Orders of other buyers are reported
    /// as not found.
    #[instrument(skip(self), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn get_for_user(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderResponse, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .filter(order::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        Ok(to_response(order, items))
    }

    /// Moves an order forward through its lifecycle.
    ///
    /// # Errors
    ///
    /// * `ServiceError::NotFound` - unknown order
    /// * `ServiceError::InvalidOperation` - backwards or out-of-terminal move
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn advance_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                warn!(order_id = %order_id, "Order not found for status update");
                ServiceError::NotFound(format!("Order {} not found", order_id))
            })?;

        let old_status = order.status;
        if !old_status.can_transition_to(new_status) {
            return Err(ServiceError::InvalidOperation(format!(
                "Cannot move order from {} to {}",
                old_status, new_status
            )));
        }

        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        info!(order_id = %order_id, old_status = %old_status, new_status = %new_status, "Order status updated");
        self.event_sender.send_or_log(Event::OrderStatusChanged {
            order_id,
            old_status,
            new_status,
        });

        Ok(updated)
    }
}

fn to_response(order: OrderModel, items: Vec<OrderItemModel>) -> OrderResponse {
    OrderResponse {
        id: order.id,
        status: order.status,
        payment_status: order.payment_status,
        subtotal: order.subtotal,
        total_amount: order.total_amount,
        currency: order.currency,
        shipping_address: order.shipping_address,
        contact_email: order.contact_email,
        gateway_order_id: order.gateway_order_id,
        gateway_payment_id: order.gateway_payment_id,
        created_at: order.created_at,
        items: items
            .into_iter()
            .map(|i| OrderItemResponse {
                product_id: i.product_id,
                product_name: i.product_name,
                quantity: i.quantity,
                price: i.price,
            })
            .collect(),
    }
}
