//! Double-submission guard for paid checkouts.
//!
//! A submission is a duplicate of an earlier order by the same user when it
//! reuses that order's transaction id, or when the earlier order was placed
//! less than [`DUPLICATE_WINDOW_SECS`] ago for the same total and the same
//! ordered list of (product, quantity) lines.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use std::collections::HashMap;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{order, order_item},
    errors::ServiceError,
};

pub const DUPLICATE_WINDOW_SECS: i64 = 60;

/// Recent orders considered for the content comparison
const RECENT_ORDER_SCAN: u64 = 20;

/// A (product, quantity) line in submission order
pub type LineKey = (Uuid, i32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateMatch {
    TransactionReused { order_number: String },
    RecentIdenticalOrder { order_number: String },
}

impl DuplicateMatch {
    pub fn into_error(self, transaction_id: &str) -> ServiceError {
        match self {
            DuplicateMatch::TransactionReused { order_number } => {
                ServiceError::DuplicateOrder(format!(
                    "transaction {} was already used for order {}",
                    transaction_id, order_number
                ))
            }
            DuplicateMatch::RecentIdenticalOrder { order_number } => {
                ServiceError::DuplicateOrder(format!(
                    "an identical order {} was placed less than {} seconds ago",
                    order_number, DUPLICATE_WINDOW_SECS
                ))
            }
        }
    }
}

/// Whether a placed order has the same total and lines as the submission.
pub fn is_same_submission(
    placed_total: Decimal,
    placed_lines: &[LineKey],
    total: Decimal,
    lines: &[LineKey],
) -> bool {
    placed_total == total && placed_lines == lines
}

fn within_window(created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - created_at < Duration::seconds(DUPLICATE_WINDOW_SECS)
}

#[instrument(skip(conn, lines))]
pub async fn find_duplicate<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    transaction_id: &str,
    total: Decimal,
    lines: &[LineKey],
) -> Result<Option<DuplicateMatch>, ServiceError> {
    let reused = order::Entity::find()
        .filter(order::Column::UserId.eq(user_id))
        .filter(order::Column::TransactionId.eq(transaction_id))
        .one(conn)
        .await?;

    if let Some(existing) = reused {
        info!(order_number = %existing.order_number, "Transaction id already recorded");
        return Ok(Some(DuplicateMatch::TransactionReused {
            order_number: existing.order_number,
        }));
    }

    let now = Utc::now();
    let recent: Vec<order::Model> = order::Entity::find()
        .filter(order::Column::UserId.eq(user_id))
        .order_by_desc(order::Column::CreatedAt)
        .limit(RECENT_ORDER_SCAN)
        .all(conn)
        .await?
        .into_iter()
        .filter(|o| within_window(o.created_at, now) && o.total_amount == total)
        .collect();

    if recent.is_empty() {
        return Ok(None);
    }

    let ids: Vec<Uuid> = recent.iter().map(|o| o.id).collect();
    let mut lines_by_order: HashMap<Uuid, Vec<(i32, LineKey)>> = HashMap::new();
    for item in order_item::Entity::find()
        .filter(order_item::Column::OrderId.is_in(ids))
        .all(conn)
        .await?
    {
        lines_by_order
            .entry(item.order_id)
            .or_default()
            .push((item.position, (item.product_id, item.quantity)));
    }

    for placed in recent {
        let mut placed_lines = lines_by_order.remove(&placed.id).unwrap_or_default();
        placed_lines.sort_by_key(|(position, _)| *position);
        let placed_lines: Vec<LineKey> = placed_lines.into_iter().map(|(_, key)| key).collect();

        if is_same_submission(placed.total_amount, &placed_lines, total, lines) {
            info!(order_number = %placed.order_number, "Identical order placed moments ago");
            return Ok(Some(DuplicateMatch::RecentIdenticalOrder {
                order_number: placed.order_number,
            }));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn line_order_matters() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(is_same_submission(
            dec!(13000),
            &[(a, 1), (b, 2)],
            dec!(13000),
            &[(a, 1), (b, 2)]
        ));
        assert!(!is_same_submission(
            dec!(13000),
            &[(a, 1), (b, 2)],
            dec!(13000),
            &[(b, 2), (a, 1)]
        ));
    }

    #[test]
    fn different_total_or_quantity_is_not_a_duplicate() {
        let a = Uuid::new_v4();
        assert!(!is_same_submission(dec!(13000), &[(a, 1)], dec!(16000), &[(a, 1)]));
        assert!(!is_same_submission(dec!(13000), &[(a, 1)], dec!(13000), &[(a, 2)]));
    }

    #[test]
    fn window_is_sixty_seconds() {
        let now = Utc::now();
        assert!(within_window(now - Duration::seconds(59), now));
        assert!(!within_window(now - Duration::seconds(61), now));
    }
}
