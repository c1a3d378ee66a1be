use crate::{
    db::is_unique_violation,
    entities::commerce::{cart, cart_item, Cart, CartItem, CartModel, Product, ProductModel},
    entities::product,
    errors::ServiceError,
    events::{Event, EventSender},
    services::commerce::pricing_service::PricingService,
    session::CartOwner,
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Attempts for the cart write before giving up.
const UPSERT_ATTEMPTS: u32 = 3;

/// One cart line joined to its product.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartLine {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub product_slug: String,
    pub image_url: Option<String>,
    pub quantity: i32,
    #[schema(value_type = String)]
    pub price: Decimal,
    #[schema(value_type = Option<String>)]
    pub discounted_price: Option<Decimal>,
    /// Price actually charged per unit
    #[schema(value_type = String)]
    pub unit_price: Decimal,
    #[schema(value_type = String)]
    pub line_total: Decimal,
}

/// Cart with lines and subtotal, as rendered to the buyer.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartView {
    pub cart_id: Uuid,
    pub items: Vec<CartLine>,
    pub item_count: i32,
    #[schema(value_type = String)]
    pub subtotal: Decimal,
}

impl CartView {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Shopping cart service.
///
/// Every operation is scoped to a [`CartOwner`]. Reads never create
/// anything: [`CartService::get_cart`] returns `None` for an owner with no
/// cart. The cart row is created lazily by the first [`CartService::add_item`].
///
/// Concurrency is handled by the store, not in process:
/// - cart creation is an insert that does nothing on owner conflict, followed
///   by a select, so racing first writes converge on one cart
/// - adding a product is a single insert-or-increment keyed on the
///   `(cart_id, product_id)` unique index
/// - every add first updates the cart row, which serializes it against a
///   merge holding that row locked
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    /// Creates a new `CartService` instance.
    ///
    /// # Arguments
    ///
    /// * `db` - Database connection pool
    /// * `event_sender` - Event sender for publishing cart events
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Retrieves the owner's cart with lines joined to products.
    ///
    /// Pure read: an owner without a cart gets `Ok(None)` and nothing is
    /// written.
    ///
    /// # Errors
    ///
    /// * `ServiceError::DatabaseError` - store failure
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn get_cart(&self, owner: &CartOwner) -> Result<Option<CartView>, ServiceError> {
        let Some(cart) = find_cart(&*self.db, owner).await? else {
            return Ok(None);
        };
        let lines = load_lines(&*self.db, cart.id).await?;
        Ok(Some(build_view(cart.id, lines)?))
    }

    /// Adds `quantity` units of a product to the owner's cart.
    ///
    /// Creates the cart on first use. If the product already has a line the
    /// quantity is incremented, otherwise a line is inserted; both happen in
    /// one upsert statement so concurrent adds never produce duplicate lines
    /// or lost increments.
    ///
    /// # Arguments
    ///
    /// * `owner` - Cart owner
    /// * `product_id` - Product to add; must exist and be active
    /// * `quantity` - Units to add, at least 1
    ///
    /// # Errors
    ///
    /// * `ServiceError::ValidationError` - `quantity < 1`
    /// * `ServiceError::NotFound` - unknown or inactive product
    /// * `ServiceError::CartUnavailable` - cart creation failed or the upsert
    ///   kept conflicting
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let line = cart_service.add_item(&owner, product_id, 2).await?;
    /// assert!(line.quantity >= 2);
    /// ```
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn add_item(
        &self,
        owner: &CartOwner,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<cart_item::Model, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }

        let product = Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let mut attempt = 0;
        let cart = loop {
            attempt += 1;
            let retry_reason = match self.try_add(owner, product.id, quantity).await {
                Ok(Some((cart, created))) => {
                    if created {
                        self.event_sender.send_or_log(Event::CartCreated(cart.id));
                        info!("Created cart: {}", cart.id);
                    }
                    break cart;
                }
                Ok(None) => "cart was merged away".to_string(),
                Err(err) if is_unique_violation(&err) => err.to_string(),
                Err(err) => {
                    warn!("Cart write failed for {}: {}", owner, err);
                    return Err(ServiceError::CartUnavailable(format!(
                        "could not update cart: {}",
                        err
                    )));
                }
            };
            if attempt >= UPSERT_ATTEMPTS {
                return Err(ServiceError::CartUnavailable(format!(
                    "cart write kept conflicting after {} attempts",
                    UPSERT_ATTEMPTS
                )));
            }
            warn!(
                "Cart write conflicted (attempt {}/{}): {}, retrying",
                attempt, UPSERT_ATTEMPTS, retry_reason
            );
        };

        let line = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product.id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::CartUnavailable("cart line vanished after upsert".to_string())
            })?;

        counter!("storefront.cart.item_upserts", 1);
        self.event_sender.send_or_log(Event::CartItemAdded {
            cart_id: cart.id,
            product_id: product.id,
            quantity,
        });

        info!(
            "Added item to cart {}: product {} x{} (line now {})",
            cart.id, product.id, quantity, line.quantity
        );
        Ok(line)
    }

    /// Sets a line's quantity. Anything below 1 removes the line.
    ///
    /// Returns the updated line, or `None` when it was removed.
    ///
    /// # Errors
    ///
    /// * `ServiceError::NotFound` - the item is not in the owner's cart
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn set_quantity(
        &self,
        owner: &CartOwner,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<Option<cart_item::Model>, ServiceError> {
        if quantity < 1 {
            self.remove_item(owner, item_id).await?;
            return Ok(None);
        }

        let item = self.owned_item(owner, item_id).await?;
        let cart_id = item.cart_id;

        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        self.event_sender.send_or_log(Event::CartItemUpdated {
            cart_id,
            item_id,
            quantity,
        });
        Ok(Some(updated))
    }

    /// Deletes a line from the owner's cart.
    ///
    /// # Errors
    ///
    /// * `ServiceError::NotFound` - the item is not in the owner's cart
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn remove_item(&self, owner: &CartOwner, item_id: Uuid) -> Result<(), ServiceError> {
        let item = self.owned_item(owner, item_id).await?;
        CartItem::delete_by_id(item.id).exec(&*self.db).await?;

        self.event_sender.send_or_log(Event::CartItemRemoved {
            cart_id: item.cart_id,
            item_id,
        });
        info!("Removed item {} from cart {}", item_id, item.cart_id);
        Ok(())
    }

    /// Ensure cart, touch it, upsert the line; one transaction. `None` when
    /// the cart disappeared between lookup and touch.
    async fn try_add(
        &self,
        owner: &CartOwner,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<Option<(CartModel, bool)>, DbErr> {
        let txn = self.db.begin().await?;
        let (cart, created) = ensure_cart(&txn, owner).await?;
        if !touch_cart(&txn, cart.id).await? {
            txn.rollback().await?;
            return Ok(None);
        }
        upsert_line(&txn, cart.id, product_id, quantity).await?;
        txn.commit().await?;
        Ok(Some((cart, created)))
    }

    async fn owned_item(
        &self,
        owner: &CartOwner,
        item_id: Uuid,
    ) -> Result<cart_item::Model, ServiceError> {
        let not_found = || ServiceError::NotFound(format!("Cart item {} not found", item_id));

        let cart = find_cart(&*self.db, owner).await?.ok_or_else(not_found)?;
        CartItem::find_by_id(item_id)
            .filter(cart_item::Column::CartId.eq(cart.id))
            .one(&*self.db)
            .await?
            .ok_or_else(not_found)
    }
}

fn owner_filter(owner: &CartOwner) -> sea_orm::Condition {
    match owner {
        CartOwner::User { id } => {
            sea_orm::Condition::all().add(cart::Column::UserId.eq(*id))
        }
        CartOwner::AnonymousSession { token } => {
            sea_orm::Condition::all().add(cart::Column::SessionToken.eq(token.as_str()))
        }
    }
}

/// Looks up the owner's cart without side effects.
pub(crate) async fn find_cart<C: ConnectionTrait>(
    conn: &C,
    owner: &CartOwner,
) -> Result<Option<CartModel>, DbErr> {
    Cart::find().filter(owner_filter(owner)).one(conn).await
}

/// Owner's cart with its row locked until the transaction ends.
pub(crate) async fn lock_cart<C: ConnectionTrait>(
    conn: &C,
    owner: &CartOwner,
) -> Result<Option<CartModel>, DbErr> {
    Cart::find()
        .filter(owner_filter(owner))
        .lock_exclusive()
        .one(conn)
        .await
}

/// Bumps `updated_at`, taking the row lock. False when the cart is gone.
pub(crate) async fn touch_cart<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> Result<bool, DbErr> {
    let result = Cart::update_many()
        .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(cart::Column::Id.eq(cart_id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Insert-if-absent on the owner's unique column, then select. The flag is
/// true when this call created the row.
pub(crate) async fn ensure_cart<C: ConnectionTrait>(
    conn: &C,
    owner: &CartOwner,
) -> Result<(CartModel, bool), DbErr> {
    if let Some(existing) = find_cart(conn, owner).await? {
        return Ok((existing, false));
    }

    let now = Utc::now();
    let conflict_column = match owner {
        CartOwner::User { .. } => cart::Column::UserId,
        CartOwner::AnonymousSession { .. } => cart::Column::SessionToken,
    };
    let candidate = cart::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(owner.user_id()),
        session_token: Set(owner.session_token().map(str::to_string)),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let inserted = Cart::insert(candidate)
        .on_conflict(OnConflict::column(conflict_column).do_nothing().to_owned())
        .exec_without_returning(conn)
        .await?;

    let cart = find_cart(conn, owner)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound("cart missing after insert".to_string()))?;
    Ok((cart, inserted > 0))
}

/// `INSERT ... ON CONFLICT (cart_id, product_id) DO UPDATE SET quantity =
/// cart_items.quantity + $qty`.
pub(crate) async fn upsert_line<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    product_id: Uuid,
    quantity: i32,
) -> Result<(), DbErr> {
    let now = Utc::now();
    let line = cart_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        cart_id: Set(cart_id),
        product_id: Set(product_id),
        quantity: Set(quantity),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let on_conflict = OnConflict::columns([cart_item::Column::CartId, cart_item::Column::ProductId])
        .value(
            cart_item::Column::Quantity,
            Expr::col((cart_item::Entity, cart_item::Column::Quantity)).add(quantity),
        )
        .update_column(cart_item::Column::UpdatedAt)
        .to_owned();

    CartItem::insert(line)
        .on_conflict(on_conflict)
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

/// Cart lines joined to products, oldest first.
pub(crate) async fn load_lines<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> Result<Vec<(cart_item::Model, ProductModel)>, DbErr> {
    let rows = CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .order_by_asc(cart_item::Column::CreatedAt)
        .find_also_related(product::Entity)
        .all(conn)
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(item, product)| match product {
            Some(product) => Some((item, product)),
            None => {
                warn!("Cart item {} references a missing product", item.id);
                None
            }
        })
        .collect())
}

pub(crate) fn build_view(
    cart_id: Uuid,
    lines: Vec<(cart_item::Model, ProductModel)>,
) -> Result<CartView, ServiceError> {
    let mut items = Vec::with_capacity(lines.len());
    for (item, product) in lines {
        let unit_price = product.effective_price();
        items.push(CartLine {
            item_id: item.id,
            product_id: product.id,
            product_name: product.name,
            product_slug: product.slug,
            image_url: product.image_url,
            quantity: item.quantity,
            price: product.price,
            discounted_price: product.discounted_price,
            unit_price,
            line_total: PricingService::line_total(unit_price, item.quantity)?,
        });
    }

    let subtotal = PricingService::subtotal(items.iter().map(|l| (l.unit_price, l.quantity)))?;
    let item_count = items.iter().map(|l| l.quantity).sum();

    Ok(CartView {
        cart_id,
        items,
        item_count,
        subtotal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product(price: Decimal, discounted: Option<Decimal>) -> ProductModel {
        let now = Utc::now();
        ProductModel {
            id: Uuid::new_v4(),
            name: "Widget".into(),
            slug: format!("widget-{}", Uuid::new_v4()),
            price,
            discounted_price: discounted,
            image_url: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn line(cart_id: Uuid, product: &ProductModel, quantity: i32) -> cart_item::Model {
        let now = Utc::now();
        cart_item::Model {
            id: Uuid::new_v4(),
            cart_id,
            product_id: product.id,
            quantity,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn view_uses_discounted_price_and_sums_lines() {
        let cart_id = Uuid::new_v4();
        let a = product(dec!(499), None);
        let b = product(dec!(300), Some(dec!(250)));

        let view = build_view(
            cart_id,
            vec![(line(cart_id, &a, 2), a.clone()), (line(cart_id, &b, 1), b.clone())],
        )
        .unwrap();

        assert_eq!(view.item_count, 3);
        assert_eq!(view.subtotal, dec!(1248));
        assert_eq!(view.items[0].line_total, dec!(998));
        assert_eq!(view.items[1].unit_price, dec!(250));
        assert_eq!(view.items[1].price, dec!(300));
    }

    #[test]
    fn empty_view() {
        let view = build_view(Uuid::new_v4(), vec![]).unwrap();
        assert!(view.is_empty());
        assert_eq!(view.subtotal, Decimal::ZERO);
        assert_eq!(view.item_count, 0);
    }
}
