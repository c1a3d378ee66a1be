use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a gateway order was created for: the cart lines, amount and owner
/// at the moment the buyer was charged. Confirmations build the order from
/// this record, never from the live cart.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_intents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub gateway_order_id: String,
    /// `CartOwner` reference; re-pointed to the user when a guest cart is merged
    pub owner_ref: String,
    pub cart_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    /// `Vec<IntentLine>`
    #[sea_orm(column_type = "Json")]
    pub lines: Json,
    /// `ShippingSnapshot`
    #[sea_orm(column_type = "Json")]
    pub shipping: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One cart line as priced when the gateway order was created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl Model {
    pub fn lines(&self) -> Result<Vec<IntentLine>, serde_json::Error> {
        serde_json::from_value(self.lines.clone())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
