pub mod commerce;
pub mod common;
pub mod orders;

use crate::{
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    services::{
        commerce::CartService,
        orders::{OrderService, PageLimits},
        payments::PaymentVerifier,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub orders: Arc<OrderService>,
}

impl AppServices {
    /// Builds the services with a payment verifier derived from configuration.
    pub fn new(db_pool: Arc<DbPool>, config: &AppConfig) -> Result<Self, ServiceError> {
        let verifier = PaymentVerifier::from_config(config)?;
        Ok(Self::with_verifier(db_pool, config, verifier))
    }

    pub fn with_verifier(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        verifier: PaymentVerifier,
    ) -> Self {
        Self {
            cart: Arc::new(CartService::new(db_pool.clone())),
            orders: Arc::new(OrderService::new(
                db_pool,
                verifier,
                PageLimits::from(config),
            )),
        }
    }
}
