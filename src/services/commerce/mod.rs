pub mod cart_service;
pub mod pricing_service;

pub use cart_service::{CartService, CartSummary, CartView, MergeOutcome};
pub use pricing_service::OrderTotals;
