use crate::{
    config::AppConfig,
    entities::{
        commerce::{cart, product, Cart, Product},
        order::{self, Entity as OrderEntity, Model as OrderModel},
        order_item::{self, Entity as OrderItemEntity},
        order_status_history::{self, Entity as OrderStatusHistoryEntity},
        OrderStatus, PaymentMethod, PaymentStatus,
    },
    errors::ServiceError,
    services::{
        commerce::{cart_service::clear_cart_in, pricing_service::OrderTotals},
        duplicates::{self, LineKey},
        payments::PaymentVerifier,
    },
};
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use dashmap::DashMap;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, Func},
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    DbErr, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select, Set, SqlErr,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::{Validate, ValidationError};

pub const DEFAULT_COUNTRY: &str = "South Korea";
const ORDER_NUMBER_ATTEMPTS: usize = 5;
pub(crate) const USER_TRANSACTION_INDEX: &str = "idx_orders_user_transaction";

fn default_country() -> String {
    DEFAULT_COUNTRY.to_string()
}

fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    let digits = phone.chars().filter(char::is_ascii_digit).count();
    let allowed = phone
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | ' '));
    if !allowed || !(9..=15).contains(&digits) {
        return Err(ValidationError::new("invalid_phone"));
    }
    Ok(())
}

/// Who is asking; resolved from the bearer token by the handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub user_id: Uuid,
    pub is_admin: bool,
}

impl Requester {
    pub fn can_access(&self, order: &OrderModel) -> bool {
        self.is_admin || order.user_id == self.user_id
    }

    pub(crate) fn ensure_access(&self, order: &OrderModel) -> Result<(), ServiceError> {
        if self.can_access(order) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "You do not have access to this order".to_string(),
            ))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
pub struct Address {
    #[validate(length(min = 1, max = 50))]
    pub name: String,
    #[validate(custom = "validate_phone")]
    pub phone: String,
    #[validate(length(min = 1, max = 200))]
    pub street: String,
    #[validate(length(max = 200))]
    pub detail: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub city: String,
    pub state: Option<String>,
    #[validate(length(min = 3, max = 10))]
    pub postal_code: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[validate(length(max = 200))]
    pub instructions: Option<String>,
}

/// Billing details; omitted fields or `same_as_shipping` copy the shipping address.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct BillingAddressInput {
    #[serde(default)]
    pub same_as_shipping: bool,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub street: Option<String>,
    pub detail: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

impl BillingAddressInput {
    fn is_blank(&self) -> bool {
        self.name.is_none()
            && self.phone.is_none()
            && self.street.is_none()
            && self.city.is_none()
            && self.postal_code.is_none()
    }

    pub fn resolve(self, shipping: &Address) -> Result<Address, ServiceError> {
        if self.same_as_shipping || self.is_blank() {
            return Ok(shipping.clone());
        }

        fn required(field: Option<String>, name: &str) -> Result<String, ServiceError> {
            field.ok_or_else(|| ServiceError::InvalidInput(format!("billing {} is required", name)))
        }

        let address = Address {
            name: required(self.name, "name")?,
            phone: required(self.phone, "phone")?,
            street: required(self.street, "street")?,
            detail: self.detail,
            city: required(self.city, "city")?,
            state: self.state,
            postal_code: required(self.postal_code, "postal_code")?,
            country: self.country.unwrap_or_else(default_country),
            instructions: None,
        };
        address.validate()?;
        Ok(address)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderLineInput {
    #[serde(alias = "product")]
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
    pub size: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct DiscountInput {
    pub amount: Decimal,
    #[validate(length(max = 50))]
    pub code: Option<String>,
    #[validate(length(max = 200))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PaymentInput {
    pub method: PaymentMethod,
    pub status: Option<PaymentStatus>,
    #[validate(length(min = 1, max = 100))]
    pub transaction_id: Option<String>,
    #[validate]
    pub discount: Option<DiscountInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderInput {
    #[validate(length(min = 1, max = 50, message = "an order needs between 1 and 50 lines"))]
    pub items: Vec<OrderLineInput>,
    #[validate]
    pub shipping_address: Address,
    pub billing_address: Option<BillingAddressInput>,
    #[validate]
    pub payment: PaymentInput,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Value>,
}

impl CreateOrderInput {
    fn validate_all(&self) -> Result<(), ServiceError> {
        self.validate()?;
        for line in &self.items {
            line.validate()?;
        }
        if let Some(discount) = &self.payment.discount {
            if discount.amount.is_sign_negative() {
                return Err(ServiceError::InvalidInput(
                    "discount amount must not be negative".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn discount_amount(&self) -> Decimal {
        self.payment
            .discount
            .as_ref()
            .map(|d| d.amount)
            .unwrap_or(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListOrdersQuery {
    pub status: Option<OrderStatus>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
    /// `-created_at` (default), `created_at`, `total_amount` or `-total_amount`
    pub sort: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AdminOrdersQuery {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    /// Creation day, `YYYY-MM-DD`, in server local time
    pub date: Option<String>,
    /// Matches order number, customer name or email
    pub search: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderSort {
    NewestFirst,
    OldestFirst,
    TotalAscending,
    TotalDescending,
}

impl OrderSort {
    fn parse(raw: Option<&str>) -> Result<Self, ServiceError> {
        match raw.unwrap_or("-created_at") {
            "-created_at" => Ok(Self::NewestFirst),
            "created_at" => Ok(Self::OldestFirst),
            "total_amount" => Ok(Self::TotalAscending),
            "-total_amount" => Ok(Self::TotalDescending),
            other => Err(ServiceError::InvalidInput(format!(
                "unsupported sort '{}'",
                other
            ))),
        }
    }

    fn apply(self, query: Select<OrderEntity>) -> Select<OrderEntity> {
        match self {
            Self::NewestFirst => query.order_by_desc(order::Column::CreatedAt),
            Self::OldestFirst => query.order_by_asc(order::Column::CreatedAt),
            Self::TotalAscending => query.order_by_asc(order::Column::TotalAmount),
            Self::TotalDescending => query.order_by_desc(order::Column::TotalAmount),
        }
    }
}

/// Page size settings for order listings
#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    pub default: u64,
    pub admin_default: u64,
    pub max: u64,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default: 20,
            admin_default: 50,
            max: 100,
        }
    }
}

impl From<&AppConfig> for PageLimits {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            default: cfg.api_default_page_size,
            admin_default: cfg.api_admin_page_size,
            max: cfg.api_max_page_size,
        }
    }
}

impl PageLimits {
    fn resolve(&self, page: Option<u64>, limit: Option<u64>, default: u64) -> (u64, u64) {
        let page = page.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(default).clamp(1, self.max);
        (page, limit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaginationMeta {
    pub current_page: u64,
    pub per_page: u64,
    pub total_pages: u64,
    pub total_orders: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PaginationMeta {
    pub fn new(current_page: u64, per_page: u64, total_orders: u64) -> Self {
        let total_pages = total_orders.div_ceil(per_page.max(1));
        Self {
            current_page,
            per_page,
            total_pages,
            total_orders,
            has_next: current_page < total_pages,
            has_prev: current_page > 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemView {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub size: Option<String>,
    pub color: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DiscountView {
    pub amount: Decimal,
    pub code: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PricingView {
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub tax: Decimal,
    pub discount: DiscountView,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentView {
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShippingView {
    pub tracking_number: Option<String>,
    pub company: Option<String>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusHistoryView {
    pub status: OrderStatus,
    pub note: String,
    pub actor: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

/// Order as returned to clients; `status_history` is only filled in detail views
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderView {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub status_label: String,
    pub items: Vec<OrderItemView>,
    pub pricing: PricingView,
    #[schema(value_type = Object)]
    pub shipping_address: Value,
    #[schema(value_type = Object)]
    pub billing_address: Value,
    pub payment: PaymentView,
    pub shipping: ShippingView,
    pub cancel_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    #[schema(value_type = Object)]
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_history: Option<Vec<StatusHistoryView>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderView {
    pub fn build(
        order: OrderModel,
        items: Vec<order_item::Model>,
        history: Option<Vec<order_status_history::Model>>,
    ) -> Self {
        let mut items = items;
        items.sort_by_key(|item| item.position);

        Self {
            id: order.id,
            order_number: order.order_number,
            user_id: order.user_id,
            status: order.status,
            status_label: order.status.label().to_string(),
            items: items
                .into_iter()
                .map(|item| OrderItemView {
                    product_id: item.product_id,
                    name: item.name,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    line_total: item.line_total,
                    size: item.size,
                    color: item.color,
                    image: item.image,
                })
                .collect(),
            pricing: PricingView {
                subtotal: order.subtotal,
                shipping_cost: order.shipping_cost,
                tax: order.tax,
                discount: DiscountView {
                    amount: order.discount_amount,
                    code: order.discount_code,
                    description: order.discount_description,
                },
                total_amount: order.total_amount,
            },
            shipping_address: order.shipping_address,
            billing_address: order.billing_address,
            payment: PaymentView {
                method: order.payment_method,
                status: order.payment_status,
                transaction_id: order.transaction_id,
                paid_at: order.paid_at,
            },
            shipping: ShippingView {
                tracking_number: order.tracking_number,
                company: order.shipping_company,
                estimated_delivery: order.estimated_delivery,
                shipped_at: order.shipped_at,
                delivered_at: order.delivered_at,
            },
            cancel_reason: order.cancel_reason,
            cancelled_at: order.cancelled_at,
            notes: order.notes,
            metadata: order.metadata,
            status_history: history.map(|entries| {
                let mut entries = entries;
                entries.sort_by_key(|entry| entry.sequence);
                entries
                    .into_iter()
                    .map(|entry| StatusHistoryView {
                        status: entry.status,
                        note: entry.note,
                        actor: entry.actor,
                        timestamp: entry.created_at,
                    })
                    .collect()
            }),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderPage {
    pub orders: Vec<OrderView>,
    pub pagination: PaginationMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StatusStatistics {
    pub count: u64,
    pub total_amount: Decimal,
}

/// A validated order line priced at checkout time
#[derive(Debug, Clone)]
struct PricedLine {
    product_id: Uuid,
    name: String,
    quantity: i32,
    unit_price: Decimal,
    line_total: Decimal,
    size: Option<String>,
    color: Option<String>,
    image: Option<String>,
}

/// Order lifecycle service: checkout, queries and status transitions.
#[derive(Clone)]
pub struct OrderService {
    pub(crate) db: Arc<DatabaseConnection>,
    verifier: PaymentVerifier,
    limits: PageLimits,
    checkout_locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, verifier: PaymentVerifier, limits: PageLimits) -> Self {
        Self {
            db,
            verifier,
            limits,
            checkout_locks: Arc::new(DashMap::new()),
        }
    }

    fn checkout_lock(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        self.checkout_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn reject_duplicate<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
        transaction_id: &str,
        total: Decimal,
        keys: &[LineKey],
    ) -> Result<(), ServiceError> {
        if let Some(duplicate) =
            duplicates::find_duplicate(conn, user_id, transaction_id, total, keys).await?
        {
            metrics::counter!("storefront.orders.duplicate_rejected", 1);
            warn!(transaction_id, "Rejected duplicate order submission");
            return Err(duplicate.into_error(transaction_id));
        }
        Ok(())
    }

    /// Places an order for `user_id`.
    ///
    /// Every line is checked against the catalog before anything is written.
    /// Paid submissions are screened for duplicates and confirmed with the
    /// payment provider. Stock decrements, the order rows and clearing the
    /// user's cart then commit together or not at all.
    ///
    /// Checkouts by the same user run one at a time, so a double submission
    /// always sees the order committed by the first.
    #[instrument(skip(self, input), fields(lines = input.items.len()))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        input: CreateOrderInput,
    ) -> Result<OrderView, ServiceError> {
        input.validate_all()?;

        let lock = self.checkout_lock(user_id);
        let _guard = lock.lock().await;

        let lines = self.price_lines(&input.items).await?;
        let subtotal: Decimal = lines.iter().map(|line| line.line_total).sum();
        let totals = OrderTotals::compute(subtotal, input.discount_amount());
        if totals.total_amount < Decimal::ZERO {
            return Err(ServiceError::InvalidInput(
                "discount exceeds the order subtotal plus shipping".to_string(),
            ));
        }

        let payment_status = input.payment.status.unwrap_or(PaymentStatus::Pending);
        let transaction_id = input.payment.transaction_id.clone();

        let keys: Vec<LineKey> = lines.iter().map(|l| (l.product_id, l.quantity)).collect();
        let screened_transaction = transaction_id
            .as_deref()
            .filter(|_| payment_status == PaymentStatus::Paid);

        if let Some(transaction_id) = screened_transaction {
            Self::reject_duplicate(&*self.db, user_id, transaction_id, totals.total_amount, &keys)
                .await?;
            self.verifier
                .verify(transaction_id, totals.total_amount)
                .await?;
        }

        let shipping_address = input.shipping_address.clone();
        let billing_address = input
            .billing_address
            .clone()
            .unwrap_or_default()
            .resolve(&shipping_address)?;
        let shipping_json = to_json(&shipping_address)?;
        let billing_json = to_json(&billing_address)?;
        let metadata = input
            .metadata
            .clone()
            .unwrap_or_else(|| serde_json::json!({ "source": "web" }));

        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        for line in &lines {
            let result = Product::update_many()
                .col_expr(
                    product::Column::Stock,
                    Expr::col(product::Column::Stock).sub(line.quantity),
                )
                .col_expr(
                    product::Column::Sales,
                    Expr::col(product::Column::Sales).add(line.quantity),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(now))
                .filter(product::Column::Id.eq(line.product_id))
                .filter(product::Column::IsActive.eq(true))
                .filter(product::Column::Stock.gte(line.quantity))
                .exec(&txn)
                .await?;

            if result.rows_affected == 0 {
                warn!(product_id = %line.product_id, "Stock changed during checkout");
                return Err(ServiceError::InsufficientStock(format!(
                    "{} no longer has {} in stock",
                    line.name, line.quantity
                )));
            }
        }

        // another instance may have committed the same submission meanwhile
        if let Some(transaction_id) = screened_transaction {
            Self::reject_duplicate(&txn, user_id, transaction_id, totals.total_amount, &keys)
                .await?;
        }

        let order_number = unique_order_number(&txn).await?;
        let discount_input = input.payment.discount.clone();

        order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            user_id: Set(user_id),
            status: Set(OrderStatus::Pending),
            subtotal: Set(totals.subtotal),
            shipping_cost: Set(totals.shipping_cost),
            tax: Set(totals.tax),
            discount_amount: Set(totals.discount),
            discount_code: Set(discount_input.as_ref().and_then(|d| d.code.clone())),
            discount_description: Set(discount_input.and_then(|d| d.description)),
            total_amount: Set(totals.total_amount),
            shipping_address: Set(shipping_json),
            billing_address: Set(billing_json),
            payment_method: Set(input.payment.method),
            payment_status: Set(payment_status),
            transaction_id: Set(transaction_id.clone()),
            paid_at: Set((payment_status == PaymentStatus::Paid).then_some(now)),
            tracking_number: Set(None),
            shipping_company: Set(None),
            estimated_delivery: Set(None),
            shipped_at: Set(None),
            delivered_at: Set(None),
            cancelled_at: Set(None),
            cancel_reason: Set(None),
            notes: Set(input.notes.clone()),
            metadata: Set(metadata),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            if is_transaction_conflict(&e) {
                metrics::counter!("storefront.orders.duplicate_rejected", 1);
                ServiceError::DuplicateOrder(format!(
                    "transaction {} was already used for another order",
                    transaction_id.as_deref().unwrap_or_default()
                ))
            } else {
                ServiceError::DatabaseError(e)
            }
        })?;

        for (position, line) in lines.iter().enumerate() {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                name: Set(line.name.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                line_total: Set(line.line_total),
                size: Set(line.size.clone()),
                color: Set(line.color.clone()),
                image: Set(line.image.clone()),
                position: Set(position as i32),
            }
            .insert(&txn)
            .await?;
        }

        crate::services::order_status::append_history(
            &txn,
            order_id,
            OrderStatus::Pending,
            "Order created",
            Some(user_id),
        )
        .await?;

        if let Some(cart) = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&txn)
            .await?
        {
            clear_cart_in(&txn, cart).await?;
        }

        txn.commit().await?;

        metrics::counter!("storefront.orders.created", 1);
        info!(%order_id, %order_number, total = %totals.total_amount, "Order created");

        self.load_detail(order_id).await
    }

    /// Looks up and prices every line; nothing is written.
    async fn price_lines(&self, items: &[OrderLineInput]) -> Result<Vec<PricedLine>, ServiceError> {
        let ids: Vec<Uuid> = items.iter().map(|item| item.product_id).collect();
        let products: HashMap<Uuid, product::Model> = Product::find()
            .filter(product::Column::Id.is_in(ids))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut requested: HashMap<Uuid, i32> = HashMap::new();
        let mut lines = Vec::with_capacity(items.len());

        for item in items {
            let product = products.get(&item.product_id).ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", item.product_id))
            })?;

            if !product.is_active {
                return Err(ServiceError::InactiveProduct(product.name.clone()));
            }

            let wanted = requested.entry(product.id).or_insert(0);
            *wanted += item.quantity;
            if *wanted > product.stock {
                return Err(ServiceError::InsufficientStock(format!(
                    "{} has {} in stock, {} requested",
                    product.name, product.stock, wanted
                )));
            }

            let unit_price = product.effective_price();
            lines.push(PricedLine {
                product_id: product.id,
                name: product.name.clone(),
                quantity: item.quantity,
                unit_price,
                line_total: unit_price * Decimal::from(item.quantity),
                size: item.size.clone(),
                color: item.color.clone(),
                image: product.primary_image(),
            });
        }

        Ok(lines)
    }

    /// Own orders only, newest first unless asked otherwise.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        user_id: Uuid,
        query: ListOrdersQuery,
    ) -> Result<OrderPage, ServiceError> {
        let sort = OrderSort::parse(query.sort.as_deref())?;
        let (page, limit) = self
            .limits
            .resolve(query.page, query.limit, self.limits.default);

        let mut select = OrderEntity::find().filter(order::Column::UserId.eq(user_id));
        if let Some(status) = query.status {
            select = select.filter(order::Column::Status.eq(status));
        }

        self.paginate(sort.apply(select), page, limit).await
    }

    /// Every user's orders, filterable by status, payment status, creation day
    /// and a free-text search over order number and customer name or email.
    #[instrument(skip(self))]
    pub async fn admin_list_orders(&self, query: AdminOrdersQuery) -> Result<OrderPage, ServiceError> {
        let (page, limit) = self
            .limits
            .resolve(query.page, query.limit, self.limits.admin_default);

        let mut select = OrderEntity::find();
        if let Some(status) = query.status {
            select = select.filter(order::Column::Status.eq(status));
        }
        if let Some(payment_status) = query.payment_status {
            select = select.filter(order::Column::PaymentStatus.eq(payment_status));
        }
        if let Some(date) = query.date.as_deref() {
            let (start, end) = local_day_bounds(date)?;
            select = select
                .filter(order::Column::CreatedAt.gte(start))
                .filter(order::Column::CreatedAt.lte(end));
        }
        if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", search.to_lowercase());
            let user_ids: Vec<Uuid> = crate::entities::user::Entity::find()
                .filter(
                    Condition::any()
                        .add(
                            Expr::expr(Func::lower(Expr::col((
                                crate::entities::user::Entity,
                                crate::entities::user::Column::Name,
                            ))))
                            .like(pattern.clone()),
                        )
                        .add(
                            Expr::expr(Func::lower(Expr::col((
                                crate::entities::user::Entity,
                                crate::entities::user::Column::Email,
                            ))))
                            .like(pattern.clone()),
                        ),
                )
                .all(&*self.db)
                .await?
                .into_iter()
                .map(|u| u.id)
                .collect();

            let mut matches = Condition::any().add(
                Expr::expr(Func::lower(Expr::col((
                    OrderEntity,
                    order::Column::OrderNumber,
                ))))
                .like(pattern),
            );
            if !user_ids.is_empty() {
                matches = matches.add(order::Column::UserId.is_in(user_ids));
            }
            select = select.filter(matches);
        }

        self.paginate(OrderSort::NewestFirst.apply(select), page, limit)
            .await
    }

    async fn paginate(
        &self,
        select: Select<OrderEntity>,
        page: u64,
        limit: u64,
    ) -> Result<OrderPage, ServiceError> {
        let paginator = select.paginate(&*self.db, limit);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut items_by_order: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
        if !ids.is_empty() {
            for item in OrderItemEntity::find()
                .filter(order_item::Column::OrderId.is_in(ids))
                .all(&*self.db)
                .await?
            {
                items_by_order.entry(item.order_id).or_default().push(item);
            }
        }

        let orders = orders
            .into_iter()
            .map(|o| {
                let items = items_by_order.remove(&o.id).unwrap_or_default();
                OrderView::build(o, items, None)
            })
            .collect();

        Ok(OrderPage {
            orders,
            pagination: PaginationMeta::new(page, limit, total),
        })
    }

    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        requester: Requester,
    ) -> Result<OrderView, ServiceError> {
        let order = self.find_order(order_id).await?;
        requester.ensure_access(&order)?;
        self.detail(order).await
    }

    #[instrument(skip(self))]
    pub async fn get_order_by_number(
        &self,
        order_number: &str,
        requester: Requester,
    ) -> Result<OrderView, ServiceError> {
        let order = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))?;
        requester.ensure_access(&order)?;
        self.detail(order).await
    }

    /// Orders the customer may still cancel before payment settles.
    #[instrument(skip(self))]
    pub async fn cancellable_orders(&self, user_id: Uuid) -> Result<Vec<OrderView>, ServiceError> {
        let orders = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .filter(order::Column::Status.is_in([OrderStatus::Pending, OrderStatus::Confirmed]))
            .filter(
                order::Column::PaymentStatus.is_in([PaymentStatus::Pending, PaymentStatus::Failed]),
            )
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut items_by_order: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
        if !ids.is_empty() {
            for item in OrderItemEntity::find()
                .filter(order_item::Column::OrderId.is_in(ids))
                .all(&*self.db)
                .await?
            {
                items_by_order.entry(item.order_id).or_default().push(item);
            }
        }

        Ok(orders
            .into_iter()
            .map(|o| {
                let items = items_by_order.remove(&o.id).unwrap_or_default();
                OrderView::build(o, items, None)
            })
            .collect())
    }

    /// Count and summed total per status; `None` scopes to every user.
    #[instrument(skip(self))]
    pub async fn statistics(
        &self,
        scope: Option<Uuid>,
    ) -> Result<BTreeMap<String, StatusStatistics>, ServiceError> {
        let mut select = OrderEntity::find().select_only();
        if let Some(user_id) = scope {
            select = select.filter(order::Column::UserId.eq(user_id));
        }

        let rows: Vec<(OrderStatus, Decimal)> = select
            .column(order::Column::Status)
            .column(order::Column::TotalAmount)
            .into_tuple()
            .all(&*self.db)
            .await?;

        Ok(group_statistics(rows))
    }

    pub(crate) async fn find_order(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    pub(crate) async fn load_detail(&self, order_id: Uuid) -> Result<OrderView, ServiceError> {
        let order = self.find_order(order_id).await?;
        self.detail(order).await
    }

    async fn detail(&self, order: OrderModel) -> Result<OrderView, ServiceError> {
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await?;
        let history = OrderStatusHistoryEntity::find()
            .filter(order_status_history::Column::OrderId.eq(order.id))
            .order_by_asc(order_status_history::Column::Sequence)
            .all(&*self.db)
            .await?;
        Ok(OrderView::build(order, items, Some(history)))
    }
}

/// Unique violation on the per-user transaction id index.
fn is_transaction_conflict(err: &DbErr) -> bool {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(message)) => {
            message.contains("transaction_id") || message.contains(USER_TRANSACTION_INDEX)
        }
        _ => false,
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, ServiceError> {
    serde_json::to_value(value)
        .map_err(|e| ServiceError::InternalError(format!("failed to encode address: {}", e)))
}

fn group_statistics(rows: Vec<(OrderStatus, Decimal)>) -> BTreeMap<String, StatusStatistics> {
    let mut stats: BTreeMap<String, StatusStatistics> = BTreeMap::new();
    for (status, total) in rows {
        let entry = stats.entry(status.as_str().to_string()).or_default();
        entry.count += 1;
        entry.total_amount += total;
    }
    stats
}

/// `[00:00:00, 23:59:59.999]` of a local calendar day, as UTC instants.
fn local_day_bounds(date: &str) -> Result<(DateTime<Utc>, DateTime<Utc>), ServiceError> {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| ServiceError::InvalidInput(format!("date '{}' is not YYYY-MM-DD", date)))?;

    let start = day
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| Local.from_local_datetime(&naive).earliest());
    let end = day
        .and_hms_milli_opt(23, 59, 59, 999)
        .and_then(|naive| Local.from_local_datetime(&naive).latest());

    match (start, end) {
        (Some(start), Some(end)) => Ok((start.with_timezone(&Utc), end.with_timezone(&Utc))),
        _ => Err(ServiceError::InvalidInput(format!(
            "date '{}' has no local midnight",
            date
        ))),
    }
}

/// Millisecond timestamp plus three random digits, retried on collision.
async fn unique_order_number<C: ConnectionTrait>(conn: &C) -> Result<String, ServiceError> {
    for _ in 0..ORDER_NUMBER_ATTEMPTS {
        let candidate = format!(
            "{}{:03}",
            Utc::now().timestamp_millis(),
            rand::thread_rng().gen_range(0..1000)
        );
        let taken = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(candidate.as_str()))
            .count(conn)
            .await?;
        if taken == 0 {
            return Ok(candidate);
        }
    }
    Err(ServiceError::InternalError(
        "could not allocate a unique order number".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn address() -> Address {
        Address {
            name: "Kim Minji".to_string(),
            phone: "010-1234-5678".to_string(),
            street: "123 Teheran-ro".to_string(),
            detail: Some("Apt 1001".to_string()),
            city: "Seoul".to_string(),
            state: None,
            postal_code: "06236".to_string(),
            country: DEFAULT_COUNTRY.to_string(),
            instructions: None,
        }
    }

    #[test]
    fn billing_defaults_to_shipping() {
        let shipping = address();
        assert_eq!(
            BillingAddressInput::default().resolve(&shipping).unwrap(),
            shipping
        );

        let flagged = BillingAddressInput {
            same_as_shipping: true,
            name: Some("Someone Else".to_string()),
            ..Default::default()
        };
        assert_eq!(flagged.resolve(&shipping).unwrap(), shipping);
    }

    #[test]
    fn partial_billing_address_is_rejected() {
        let partial = BillingAddressInput {
            name: Some("Park Jisoo".to_string()),
            ..Default::default()
        };
        assert_matches!(
            partial.resolve(&address()),
            Err(ServiceError::InvalidInput(msg)) if msg.contains("phone")
        );
    }

    #[test]
    fn phone_numbers_are_checked() {
        assert!(validate_phone("010-1234-5678").is_ok());
        assert!(validate_phone("+82 10 1234 5678").is_ok());
        assert!(validate_phone("call me").is_err());
        assert!(validate_phone("123").is_err());
    }

    #[test]
    fn unknown_sort_is_invalid_input() {
        assert_eq!(OrderSort::parse(None).unwrap(), OrderSort::NewestFirst);
        assert_eq!(
            OrderSort::parse(Some("-total_amount")).unwrap(),
            OrderSort::TotalDescending
        );
        assert_matches!(
            OrderSort::parse(Some("name")),
            Err(ServiceError::InvalidInput(_))
        );
    }

    #[test]
    fn pagination_meta_flags() {
        let meta = PaginationMeta::new(2, 20, 45);
        assert_eq!(meta.total_pages, 3);
        assert!(meta.has_next);
        assert!(meta.has_prev);

        let empty = PaginationMeta::new(1, 20, 0);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next);
        assert!(!empty.has_prev);
    }

    #[test]
    fn page_limits_clamp_to_max() {
        let limits = PageLimits::default();
        assert_eq!(limits.resolve(None, None, limits.default), (1, 20));
        assert_eq!(limits.resolve(Some(0), Some(500), limits.default), (1, 100));
        assert_eq!(limits.resolve(Some(3), None, limits.admin_default), (3, 50));
    }

    #[test]
    fn statistics_group_by_status() {
        let stats = group_statistics(vec![
            (OrderStatus::Pending, dec!(13000)),
            (OrderStatus::Pending, dec!(60000)),
            (OrderStatus::Cancelled, dec!(8000)),
        ]);
        assert_eq!(stats["pending"].count, 2);
        assert_eq!(stats["pending"].total_amount, dec!(73000));
        assert_eq!(stats["cancelled"].count, 1);
        assert!(!stats.contains_key("shipped"));
    }

    #[test]
    fn malformed_day_is_invalid_input() {
        assert_matches!(local_day_bounds("14/10/2026"), Err(ServiceError::InvalidInput(_)));
        let (start, end) = local_day_bounds("2026-10-14").unwrap();
        assert!(end > start);
        assert_eq!((end - start).num_hours(), 23);
    }

    #[test]
    fn negative_discount_is_rejected() {
        let input = CreateOrderInput {
            items: vec![OrderLineInput {
                product_id: Uuid::new_v4(),
                quantity: 1,
                size: None,
                color: None,
            }],
            shipping_address: address(),
            billing_address: None,
            payment: PaymentInput {
                method: PaymentMethod::Card,
                status: None,
                transaction_id: None,
                discount: Some(DiscountInput {
                    amount: dec!(-1000),
                    code: None,
                    description: None,
                }),
            },
            notes: None,
            metadata: None,
        };
        assert_matches!(input.validate_all(), Err(ServiceError::InvalidInput(_)));
    }
}
