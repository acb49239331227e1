use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, TransactionTrait,
};
use serde::Deserialize;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        commerce::{product, Product},
        order::{self, ActiveModel as OrderActiveModel, Entity as OrderEntity},
        order_item::{self, Entity as OrderItemEntity},
        order_status_history, OrderStatus, PaymentStatus,
    },
    errors::ServiceError,
    services::orders::{OrderService, OrderView, Requester},
};

pub const DEFAULT_CANCEL_REASON: &str = "customer request";

fn cannot_cancel(status: OrderStatus) -> ServiceError {
    ServiceError::InvalidStateTransition(format!(
        "an order that is {} cannot be cancelled",
        status
    ))
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct CancelOrderInput {
    #[validate(length(max = 200))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateStatusInput {
    pub status: OrderStatus,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateShippingInput {
    #[validate(length(min = 1, max = 100))]
    pub tracking_number: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub company: Option<String>,
    pub estimated_delivery: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdatePaymentInput {
    pub status: PaymentStatus,
    #[validate(length(min = 1, max = 100))]
    pub transaction_id: Option<String>,
}

/// Appends one history entry; the sequence is the number of earlier entries.
pub(crate) async fn append_history<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    status: OrderStatus,
    note: &str,
    actor: Option<Uuid>,
) -> Result<(), ServiceError> {
    let sequence = order_status_history::Entity::find()
        .filter(order_status_history::Column::OrderId.eq(order_id))
        .count(conn)
        .await?;

    order_status_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        status: Set(status),
        note: Set(note.to_string()),
        actor: Set(actor),
        sequence: Set(sequence as i32),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;

    Ok(())
}

impl OrderService {
    /// Cancels an order and returns its stock to the catalog.
    ///
    /// Orders that have shipped or reached a terminal state are left untouched.
    #[instrument(skip(self, input), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        input: CancelOrderInput,
        requester: Requester,
    ) -> Result<OrderView, ServiceError> {
        input.validate()?;
        let reason = input
            .reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());

        let order = self.find_order(order_id).await?;
        requester.ensure_access(&order)?;
        if !order.status.can_cancel() {
            warn!(status = %order.status, "Refusing to cancel order");
            return Err(cannot_cancel(order.status));
        }

        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        // a concurrent cancel of the same order matches no row here
        let now = Utc::now();
        let flipped = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Cancelled))
            .col_expr(order::Column::CancelReason, Expr::value(Some(reason.clone())))
            .col_expr(order::Column::CancelledAt, Expr::value(Some(now)))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.is_in(OrderStatus::CANCELLABLE))
            .exec(&txn)
            .await?;

        if flipped.rows_affected == 0 {
            warn!("Order changed state before it could be cancelled");
            let current = OrderEntity::find_by_id(order_id)
                .one(&txn)
                .await?
                .map(|o| o.status)
                .unwrap_or(OrderStatus::Cancelled);
            return Err(cannot_cancel(current));
        }

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;

        for item in &items {
            Product::update_many()
                .col_expr(
                    product::Column::Stock,
                    Expr::col(product::Column::Stock).add(item.quantity),
                )
                .col_expr(
                    product::Column::Sales,
                    Expr::col(product::Column::Sales).sub(item.quantity),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(now))
                .filter(product::Column::Id.eq(item.product_id))
                .exec(&txn)
                .await?;
        }

        append_history(
            &txn,
            order_id,
            OrderStatus::Cancelled,
            &format!("Cancelled: {}", reason),
            Some(requester.user_id),
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!("Failed to commit cancellation for order {}: {}", order_id, e);
            ServiceError::DatabaseError(e)
        })?;

        metrics::counter!("storefront.orders.cancelled", 1);
        info!(restored_lines = items.len(), "Order cancelled");

        self.load_detail(order_id).await
    }

    /// Admin override; any status may be set from any status.
    #[instrument(skip(self, input), fields(order_id = %order_id, new_status = %input.status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        input: UpdateStatusInput,
        actor: Uuid,
    ) -> Result<OrderView, ServiceError> {
        input.validate()?;
        let note = input
            .note
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Status changed to {}", input.status.label()));

        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let old_status = order.status;

        let now = Utc::now();
        let mut active: OrderActiveModel = order.into();
        active.status = Set(input.status);
        if input.status == OrderStatus::Delivered {
            active.delivered_at = Set(Some(now));
        }
        active.updated_at = Set(now);
        active.update(&txn).await?;

        append_history(&txn, order_id, input.status, &note, Some(actor)).await?;

        txn.commit().await?;

        info!(%old_status, "Order status updated");
        self.load_detail(order_id).await
    }

    #[instrument(skip(self, input), fields(order_id = %order_id))]
    pub async fn update_shipping(
        &self,
        order_id: Uuid,
        input: UpdateShippingInput,
    ) -> Result<OrderView, ServiceError> {
        input.validate()?;
        let order = self.find_order(order_id).await?;

        let mut active: OrderActiveModel = order.into();
        if let Some(tracking_number) = input.tracking_number {
            active.tracking_number = Set(Some(tracking_number));
        }
        if let Some(company) = input.company {
            active.shipping_company = Set(Some(company));
        }
        if let Some(estimated_delivery) = input.estimated_delivery {
            active.estimated_delivery = Set(Some(estimated_delivery));
        }
        let now = Utc::now();
        active.shipped_at = Set(Some(now));
        active.updated_at = Set(now);
        active.update(&*self.db).await?;

        info!("Shipping details recorded");
        self.load_detail(order_id).await
    }

    #[instrument(skip(self, input), fields(order_id = %order_id, payment_status = %input.status))]
    pub async fn update_payment_status(
        &self,
        order_id: Uuid,
        input: UpdatePaymentInput,
        requester: Requester,
    ) -> Result<OrderView, ServiceError> {
        input.validate()?;
        let order = self.find_order(order_id).await?;
        requester.ensure_access(&order)?;

        let now = Utc::now();
        let mut active: OrderActiveModel = order.into();
        active.payment_status = Set(input.status);
        if let Some(transaction_id) = input.transaction_id {
            active.transaction_id = Set(Some(transaction_id));
        }
        if input.status == PaymentStatus::Paid {
            active.paid_at = Set(Some(now));
        }
        active.updated_at = Set(now);
        active.update(&*self.db).await?;

        info!("Payment status updated");
        self.load_detail(order_id).await
    }
}
