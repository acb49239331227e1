//! Storefront pricing rules shared by the cart and checkout.
//!
//! All amounts are in the store's single currency unit (KRW).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use utoipa::ToSchema;

/// Subtotal at or above which shipping is free
pub const FREE_SHIPPING_THRESHOLD: Decimal = dec!(50000);

/// Shipping charged below the free-shipping threshold
pub const FLAT_SHIPPING_RATE: Decimal = dec!(3000);

/// Shipping charged for a given merchandise subtotal.
pub fn shipping_cost(subtotal: Decimal) -> Decimal {
    if subtotal >= FREE_SHIPPING_THRESHOLD {
        Decimal::ZERO
    } else {
        FLAT_SHIPPING_RATE
    }
}

/// How much more the customer has to add to qualify for free shipping.
pub fn free_shipping_remaining(subtotal: Decimal) -> Decimal {
    (FREE_SHIPPING_THRESHOLD - subtotal).max(Decimal::ZERO)
}

/// `price × (1 − discount/100)`, rounded to 2 decimal places.
///
/// Discounts outside 1..=100 leave the price untouched or clamp to free.
pub fn discounted_unit_price(price: Decimal, discount_percent: i32) -> Decimal {
    if discount_percent <= 0 {
        return price;
    }
    let discount = Decimal::from(discount_percent.min(100));
    (price * (Decimal::ONE_HUNDRED - discount) / Decimal::ONE_HUNDRED).round_dp(2)
}

/// Pricing breakdown recorded on an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total_amount: Decimal,
}

impl OrderTotals {
    /// Derives shipping and the total from a subtotal and an order-level discount.
    pub fn compute(subtotal: Decimal, discount: Decimal) -> Self {
        let shipping_cost = shipping_cost(subtotal);
        Self {
            subtotal,
            shipping_cost,
            tax: Decimal::ZERO,
            discount,
            total_amount: subtotal + shipping_cost - discount,
        }
    }
}
