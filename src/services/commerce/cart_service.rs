use crate::{
    entities::commerce::{cart, cart_item, product, Cart, CartItem, CartModel, Product},
    errors::ServiceError,
    services::commerce::pricing_service,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Largest quantity a single cart line may hold
pub const MAX_LINE_QUANTITY: i32 = 999;

/// Shopping cart service, one cart per authenticated user.
///
/// The cart row is created lazily on the first add. Its `total_items` and
/// `total_price` are recomputed from the items inside the same transaction
/// as every mutation. Mutations for one user are serialized through an
/// in-process async mutex keyed by user id, so concurrent requests from the
/// same account cannot interleave their read-modify-write of the totals.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            locks: Arc::new(DashMap::new()),
        }
    }

    fn user_lock(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Adds a product to the user's cart.
    ///
    /// An existing line for the same product, size and color has its
    /// quantity increased instead of a second line being created.
    ///
    /// # Errors
    ///
    /// * `InvalidInput` - quantity outside 1..=999, or the merged line would exceed 999
    /// * `NotFound` - the product does not exist
    /// * `InactiveProduct` - the product is not currently sold
    /// * `InsufficientStock` - the line quantity exceeds the product's stock
    #[instrument(skip(self, input), fields(product_id = %input.product_id, quantity = input.quantity))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        input: AddCartItemInput,
    ) -> Result<CartView, ServiceError> {
        validate_quantity(input.quantity)?;

        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let txn = self.db.begin().await?;
        let cart = add_item_in(&txn, user_id, &input).await?;
        txn.commit().await?;

        info!(cart_id = %cart.id, "Added item to cart");
        self.view(cart).await
    }

    /// Overwrites a line's quantity; zero or less removes the line.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity > MAX_LINE_QUANTITY {
            return Err(ServiceError::InvalidInput(format!(
                "quantity must be between 1 and {}",
                MAX_LINE_QUANTITY
            )));
        }

        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let txn = self.db.begin().await?;
        let cart = find_cart(&txn, user_id).await?;
        let item = find_item(&txn, &cart, item_id).await?;

        if quantity <= 0 {
            item.delete(&txn).await?;
        } else {
            let product = Product::find_by_id(item.product_id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", item.product_id))
                })?;
            ensure_stock(&product, quantity)?;

            let mut active: cart_item::ActiveModel = item.into();
            active.quantity = Set(quantity);
            active.added_at = Set(Utc::now());
            active.update(&txn).await?;
        }

        let cart = recalculate_cart_totals(&txn, cart).await?;
        txn.commit().await?;

        self.view(cart).await
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: Uuid, item_id: Uuid) -> Result<CartView, ServiceError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let txn = self.db.begin().await?;
        let cart = find_cart(&txn, user_id).await?;
        let item = find_item(&txn, &cart, item_id).await?;
        item.delete(&txn).await?;

        let cart = recalculate_cart_totals(&txn, cart).await?;
        txn.commit().await?;

        self.view(cart).await
    }

    /// Empties the cart but keeps the cart row.
    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let txn = self.db.begin().await?;
        let cart = find_cart(&txn, user_id).await?;
        let cart = clear_cart_in(&txn, cart).await?;
        txn.commit().await?;

        info!(cart_id = %cart.id, "Cleared cart");
        self.view(cart).await
    }

    /// The user's cart, or an empty cart shape when none exists yet.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?;

        match cart {
            Some(cart) => self.view(cart).await,
            None => Ok(CartView::empty(user_id)),
        }
    }

    #[instrument(skip(self))]
    pub async fn summarize(&self, user_id: Uuid) -> Result<CartSummary, ServiceError> {
        let cart = self.get_cart(user_id).await?;
        Ok(CartSummary::from_view(&cart))
    }

    /// Folds a guest cart into the user's cart after login.
    ///
    /// Entries for missing or inactive products, or that fail validation,
    /// are skipped and reported back. A request repeating the `merge_id` of
    /// the last applied merge is answered without touching the cart.
    #[instrument(skip(self, input), fields(items = input.items.len(), merge_id = ?input.merge_id))]
    pub async fn merge(
        &self,
        user_id: Uuid,
        input: MergeCartInput,
    ) -> Result<MergeOutcome, ServiceError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let txn = self.db.begin().await?;

        let existing = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&txn)
            .await?;

        if let (Some(cart), Some(merge_id)) = (&existing, &input.merge_id) {
            if cart.last_merge_id.as_deref() == Some(merge_id.as_str()) {
                let cart = cart.clone();
                txn.rollback().await?;
                info!(merge_id = %merge_id, "Merge already applied");
                return Ok(MergeOutcome {
                    cart: self.view(cart).await?,
                    merged: 0,
                    skipped: Vec::new(),
                    already_applied: true,
                });
            }
        }

        let mut merged = 0;
        let mut skipped = Vec::new();
        let mut cart = existing;

        for guest in &input.items {
            let add = AddCartItemInput {
                product_id: guest.product_id,
                quantity: guest.quantity,
                price: guest.price,
                size: guest.size.clone(),
                color: guest.color.clone(),
                notes: guest.notes.clone(),
            };

            let attempt = match validate_quantity(add.quantity) {
                Ok(()) => add_item_in(&txn, user_id, &add).await,
                Err(e) => Err(e),
            };

            match attempt {
                Ok(updated) => {
                    merged += 1;
                    cart = Some(updated);
                }
                Err(ServiceError::DatabaseError(e)) => return Err(ServiceError::DatabaseError(e)),
                Err(e) => {
                    warn!(product_id = %guest.product_id, error = %e, "Skipping guest cart item");
                    skipped.push(SkippedCartItem {
                        product_id: guest.product_id,
                        reason: e.reason_code().to_string(),
                    });
                }
            }
        }

        let cart = match (cart, input.merge_id) {
            (Some(current), Some(merge_id)) => {
                let mut active: cart::ActiveModel = current.into();
                active.last_merge_id = Set(Some(merge_id));
                active.updated_at = Set(Utc::now());
                Some(active.update(&txn).await?)
            }
            (cart, _) => cart,
        };

        txn.commit().await?;

        info!(merged, skipped = skipped.len(), "Merged guest cart");
        let view = match cart {
            Some(cart) => self.view(cart).await?,
            None => CartView::empty(user_id),
        };

        Ok(MergeOutcome {
            cart: view,
            merged,
            skipped,
            already_applied: false,
        })
    }

    async fn view(&self, cart: CartModel) -> Result<CartView, ServiceError> {
        let items = cart
            .find_related(CartItem)
            .order_by_asc(cart_item::Column::AddedAt)
            .all(&*self.db)
            .await?;

        let product_ids: Vec<Uuid> = items.iter().map(|item| item.product_id).collect();
        let products: HashMap<Uuid, product::Model> = if product_ids.is_empty() {
            HashMap::new()
        } else {
            Product::find()
                .filter(product::Column::Id.is_in(product_ids))
                .all(&*self.db)
                .await?
                .into_iter()
                .map(|p| (p.id, p))
                .collect()
        };

        let items = items
            .into_iter()
            .map(|item| {
                let product = products.get(&item.product_id);
                CartItemView {
                    id: item.id,
                    product_id: item.product_id,
                    product_name: product.map(|p| p.name.clone()),
                    image: product.and_then(|p| p.primary_image()),
                    available: product.map(|p| p.is_active).unwrap_or(false),
                    quantity: item.quantity,
                    price: item.price,
                    line_total: item.line_total(),
                    size: item.size,
                    color: item.color,
                    notes: item.notes,
                    added_at: item.added_at,
                }
            })
            .collect();

        Ok(CartView {
            id: Some(cart.id),
            user_id: cart.user_id,
            items,
            total_items: cart.total_items,
            total_price: cart.total_price,
            updated_at: Some(cart.updated_at),
        })
    }
}

fn validate_quantity(quantity: i32) -> Result<(), ServiceError> {
    if !(1..=MAX_LINE_QUANTITY).contains(&quantity) {
        return Err(ServiceError::InvalidInput(format!(
            "quantity must be between 1 and {}",
            MAX_LINE_QUANTITY
        )));
    }
    Ok(())
}

fn ensure_stock(product: &product::Model, quantity: i32) -> Result<(), ServiceError> {
    if quantity > product.stock {
        return Err(ServiceError::InsufficientStock(format!(
            "{} has {} in stock, {} requested",
            product.name, product.stock, quantity
        )));
    }
    Ok(())
}

async fn find_cart<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> Result<CartModel, ServiceError> {
    Cart::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))
}

async fn find_item<C: ConnectionTrait>(
    conn: &C,
    cart: &CartModel,
    item_id: Uuid,
) -> Result<cart_item::Model, ServiceError> {
    CartItem::find_by_id(item_id)
        .filter(cart_item::Column::CartId.eq(cart.id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", item_id)))
}

/// Validates and applies one add inside an open transaction.
///
/// Every check runs before the first write, so a rejected add leaves the
/// transaction untouched.
async fn add_item_in<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    input: &AddCartItemInput,
) -> Result<CartModel, ServiceError> {
    if let Some(price) = input.price {
        if price.is_sign_negative() {
            return Err(ServiceError::InvalidInput(
                "price must not be negative".to_string(),
            ));
        }
    }

    let product = Product::find_by_id(input.product_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", input.product_id)))?;

    if !product.is_active {
        return Err(ServiceError::InactiveProduct(product.name));
    }

    let existing_cart = Cart::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?;

    let existing_item = match &existing_cart {
        Some(cart) => cart
            .find_related(CartItem)
            .all(conn)
            .await?
            .into_iter()
            .find(|item| {
                item.matches_variant(
                    input.product_id,
                    input.size.as_deref(),
                    input.color.as_deref(),
                )
            }),
        None => None,
    };

    let line_quantity = existing_item
        .as_ref()
        .map(|item| item.quantity)
        .unwrap_or(0)
        + input.quantity;
    if line_quantity > MAX_LINE_QUANTITY {
        return Err(ServiceError::InvalidInput(format!(
            "a cart line cannot hold more than {} units",
            MAX_LINE_QUANTITY
        )));
    }
    ensure_stock(&product, line_quantity)?;

    let now = Utc::now();
    let cart = match existing_cart {
        Some(cart) => cart,
        None => {
            cart::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(user_id),
                total_items: Set(0),
                total_price: Set(Decimal::ZERO),
                last_merge_id: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(conn)
            .await?
        }
    };

    match existing_item {
        Some(item) => {
            let notes = input.notes.clone().or_else(|| item.notes.clone());
            let mut active: cart_item::ActiveModel = item.into();
            active.quantity = Set(line_quantity);
            active.notes = Set(notes);
            active.added_at = Set(now);
            active.update(conn).await?;
        }
        None => {
            cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(product.id),
                quantity: Set(input.quantity),
                price: Set(input.price.unwrap_or(product.price)),
                size: Set(input.size.clone()),
                color: Set(input.color.clone()),
                notes: Set(input.notes.clone()),
                added_at: Set(now),
            }
            .insert(conn)
            .await?;
        }
    }

    recalculate_cart_totals(conn, cart).await
}

/// Deletes every line of the cart and zeroes its totals.
pub(crate) async fn clear_cart_in<C: ConnectionTrait>(
    conn: &C,
    cart: CartModel,
) -> Result<CartModel, ServiceError> {
    CartItem::delete_many()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .exec(conn)
        .await?;
    recalculate_cart_totals(conn, cart).await
}

/// Rewrites the cached totals from the cart's current items.
async fn recalculate_cart_totals<C: ConnectionTrait>(
    conn: &C,
    cart: CartModel,
) -> Result<CartModel, ServiceError> {
    let items = CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .all(conn)
        .await?;

    let (total_items, total_price) = cart_totals(&items);

    let mut active: cart::ActiveModel = cart.into();
    active.total_items = Set(total_items);
    active.total_price = Set(total_price);
    active.updated_at = Set(Utc::now());

    Ok(active.update(conn).await?)
}

fn cart_totals(items: &[cart_item::Model]) -> (i32, Decimal) {
    items.iter().fold((0, Decimal::ZERO), |(count, price), item| {
        (count + item.quantity, price + item.line_total())
    })
}

/// Input for adding a product to the cart
#[derive(Debug, Clone, Deserialize)]
pub struct AddCartItemInput {
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: Option<Decimal>,
    pub size: Option<String>,
    pub color: Option<String>,
    pub notes: Option<String>,
}

/// One entry of a pre-login cart kept by the browser
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct GuestCartItem {
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: Option<Decimal>,
    pub size: Option<String>,
    pub color: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeCartInput {
    pub items: Vec<GuestCartItem>,
    pub merge_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartItemView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: Option<String>,
    pub image: Option<String>,
    pub available: bool,
    pub quantity: i32,
    pub price: Decimal,
    pub line_total: Decimal,
    pub size: Option<String>,
    pub color: Option<String>,
    pub notes: Option<String>,
    pub added_at: DateTime<Utc>,
}

/// Cart as returned to the client
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartView {
    pub id: Option<Uuid>,
    pub user_id: Uuid,
    pub items: Vec<CartItemView>,
    pub total_items: i32,
    pub total_price: Decimal,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CartView {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            id: None,
            user_id,
            items: Vec::new(),
            total_items: 0,
            total_price: Decimal::ZERO,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartSummary {
    pub total_items: i32,
    pub total_price: Decimal,
    pub item_count: usize,
    pub is_empty: bool,
    pub shipping_cost: Decimal,
    pub free_shipping_threshold: Decimal,
    pub free_shipping_remaining: Decimal,
}

impl CartSummary {
    pub fn from_view(cart: &CartView) -> Self {
        let is_empty = cart.items.is_empty();
        let shipping_cost = if is_empty {
            Decimal::ZERO
        } else {
            pricing_service::shipping_cost(cart.total_price)
        };

        Self {
            total_items: cart.total_items,
            total_price: cart.total_price,
            item_count: cart.items.len(),
            is_empty,
            shipping_cost,
            free_shipping_threshold: pricing_service::FREE_SHIPPING_THRESHOLD,
            free_shipping_remaining: pricing_service::free_shipping_remaining(cart.total_price),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SkippedCartItem {
    pub product_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MergeOutcome {
    pub cart: CartView,
    pub merged: usize,
    pub skipped: Vec<SkippedCartItem>,
    pub already_applied: bool,
}
