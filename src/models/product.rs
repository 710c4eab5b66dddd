//! Product model and related types
//!
//! A product row owns the current stock level. The quantity column is only
//! ever mutated through the conditional update in the product service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Product record in the database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub quantity: i64,
    pub threshold: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Whether current stock sits below the configured low-stock threshold
    pub fn low_stock(&self) -> bool {
        self.quantity < self.threshold
    }
}

/// Request body for creating a product
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductRequest {
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub threshold: i64,
}

/// Request body for updating a product's descriptive fields.
///
/// Quantity is deliberately absent: stock only changes through the adjust
/// endpoint so every change lands in the movement ledger.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub price: Option<f64>,
    pub threshold: Option<i64>,
}

/// Request body for adjusting stock by a signed delta
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustQuantityRequest {
    pub delta: i64,
}

/// Product representation on the wire, with the derived low-stock flag
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductResponse {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub quantity: i64,
    pub threshold: i64,
    pub low_stock: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Product> for ProductResponse {
    fn from(p: Product) -> Self {
        let low_stock = p.low_stock();
        Self {
            id: p.id,
            name: p.name,
            price: p.price,
            quantity: p.quantity,
            threshold: p.threshold,
            low_stock,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

/// Response for paginated product listing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductListResponse {
    pub products: Vec<ProductResponse>,
    pub total_count: i64,
}
