use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog product as seen by the cart and order flows.
///
/// Catalog CRUD lives outside this service; the cart and order services
/// only read prices and move `stock`/`sales` counters.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    #[sea_orm(nullable)]
    pub sku: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub price: Decimal,
    /// Percent off the list price, 0..=100
    pub discount: i32,
    pub stock: i32,
    pub sales: i32,
    /// `[{"size": "M", "stock": 3}]`
    #[sea_orm(column_type = "Json", nullable)]
    pub sizes: Option<Json>,
    /// `[{"name": "black", "hex": "#000000", "stock": 3}]`
    #[sea_orm(column_type = "Json", nullable)]
    pub colors: Option<Json>,
    /// Public image URLs from the asset host
    #[sea_orm(column_type = "Json", nullable)]
    pub images: Option<Json>,
    #[sea_orm(nullable)]
    pub category: Option<String>,
    #[sea_orm(nullable)]
    pub brand: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cart_item::Entity")]
    CartItems,
}

impl Related<super::cart_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Selling price after the product-level percentage discount.
    pub fn effective_price(&self) -> Decimal {
        crate::services::commerce::pricing_service::discounted_unit_price(self.price, self.discount)
    }

    /// First image URL, if the catalog recorded any.
    pub fn primary_image(&self) -> Option<String> {
        self.images
            .as_ref()
            .and_then(|images| images.as_array())
            .and_then(|images| images.first())
            .and_then(|first| first.as_str())
            .map(str::to_string)
    }
}
