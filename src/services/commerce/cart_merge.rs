use crate::{
    entities::commerce::{cart_item, Cart, CartItem},
    errors::ServiceError,
    events::{Event, EventSender},
    services::commerce::{
        cart_service::{ensure_cart, lock_cart, upsert_line},
        payment_orders::repoint_intents,
    },
    session::CartOwner,
};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Result of folding a guest cart into a user cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct MergeOutcome {
    /// Guest lines folded in; 0 when there was no guest cart
    pub merged_lines: usize,
    pub user_cart_id: Option<Uuid>,
}

/// Moves an anonymous session's cart into the signed-in user's cart.
#[derive(Clone)]
pub struct CartMergeService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartMergeService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Merges the guest cart for `guest_token` into `user_id`'s cart.
    ///
    /// Quantities for products present in both carts are summed through the
    /// same insert-or-increment used by add-to-cart. The guest cart row is
    /// locked before its lines are read; a guest add either commits first and
    /// is merged, or waits, finds the cart gone and lands in a fresh cart.
    /// Payment intents started from the guest cart move to the user cart.
    /// The guest cart and its lines are deleted in the same transaction;
    /// either everything moves or nothing does.
    #[instrument(skip(self, guest_token))]
    pub async fn merge_guest_cart(
        &self,
        guest_token: &str,
        user_id: Uuid,
    ) -> Result<MergeOutcome, ServiceError> {
        let guest = CartOwner::AnonymousSession {
            token: guest_token.to_string(),
        };
        let user = CartOwner::User { id: user_id };

        let txn = self.db.begin().await?;

        let Some(guest_cart) = lock_cart(&txn, &guest).await? else {
            txn.rollback().await?;
            return Ok(MergeOutcome {
                merged_lines: 0,
                user_cart_id: None,
            });
        };

        let guest_lines = CartItem::find()
            .filter(cart_item::Column::CartId.eq(guest_cart.id))
            .all(&txn)
            .await?;

        let (user_cart, _) = ensure_cart(&txn, &user).await?;

        for line in &guest_lines {
            upsert_line(&txn, user_cart.id, line.product_id, line.quantity).await?;
        }

        let moved_intents = repoint_intents(&txn, guest_cart.id, user_cart.id, &user).await?;

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(guest_cart.id))
            .exec(&txn)
            .await?;
        Cart::delete_by_id(guest_cart.id).exec(&txn).await?;

        txn.commit().await?;

        let merged_lines = guest_lines.len();
        self.event_sender.send_or_log(Event::CartMerged {
            guest_cart_id: guest_cart.id,
            user_cart_id: user_cart.id,
            lines_merged: merged_lines,
        });
        info!(
            "Merged guest cart {} into user cart {} ({} lines, {} payment intents)",
            guest_cart.id, user_cart.id, merged_lines, moved_intents
        );

        Ok(MergeOutcome {
            merged_lines,
            user_cart_id: Some(user_cart.id),
        })
    }
}
