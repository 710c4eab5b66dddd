//! Product Service
//!
//! Owns the products table and the atomic quantity adjustment. The
//! conditional UPDATE in `adjust_quantity` is the only code path that
//! mutates stock; anything that reads quantity and writes it back
//! separately would reopen the underflow race.

use sqlx::PgPool;
use thiserror::Error;

use crate::models::{CreateProductRequest, Product, UpdateProductRequest};

/// Errors that can occur during product operations
#[derive(Debug, Error)]
pub enum ProductError {
    #[error("Product not found: {0}")]
    NotFound(i64),

    #[error("Duplicate product name: {0}")]
    DuplicateName(String),

    /// The conditional update matched no row for an existing product, i.e.
    /// the adjustment would have driven quantity below zero.
    #[error("Adjustment of {delta} would make quantity of product {product_id} negative")]
    InvalidQuantityChange { product_id: i64, delta: i64 },

    #[error("Invalid product: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

const PRODUCT_COLUMNS: &str = "id, name, price, quantity, threshold, created_at, updated_at";

/// Service for managing products and their stock levels
#[derive(Debug, Clone)]
pub struct ProductService {
    pool: PgPool,
}

impl ProductService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn validate_name(name: &str) -> Result<(), ProductError> {
        if name.trim().is_empty() {
            return Err(ProductError::Validation("name must not be empty".into()));
        }
        Ok(())
    }

    fn validate_price(price: f64) -> Result<(), ProductError> {
        if !price.is_finite() || price <= 0.0 {
            return Err(ProductError::Validation("price must be positive".into()));
        }
        Ok(())
    }

    /// Create a product
    pub async fn create(&self, req: CreateProductRequest) -> Result<Product, ProductError> {
        Self::validate_name(&req.name)?;
        Self::validate_price(req.price)?;
        if req.quantity < 0 {
            return Err(ProductError::Validation(
                "quantity must not be negative".into(),
            ));
        }
        if req.threshold < 0 {
            return Err(ProductError::Validation(
                "threshold must not be negative".into(),
            ));
        }

        let sql = format!(
            r#"
            INSERT INTO products (name, price, quantity, threshold)
            VALUES ($1, $2, $3, $4)
            RETURNING {PRODUCT_COLUMNS}
            "#
        );

        sqlx::query_as::<_, Product>(&sql)
            .bind(req.name.trim())
            .bind(req.price)
            .bind(req.quantity)
            .bind(req.threshold)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    ProductError::DuplicateName(req.name.trim().to_string())
                }
                _ => ProductError::Database(e),
            })
    }

    /// Get a product by id
    pub async fn get(&self, product_id: i64) -> Result<Product, ProductError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");

        sqlx::query_as::<_, Product>(&sql)
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(ProductError::NotFound(product_id))
    }

    /// List products with a total count
    pub async fn list(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Product>, i64), ProductError> {
        let total_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;

        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY id LIMIT $1 OFFSET $2"
        );
        let products = sqlx::query_as::<_, Product>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok((products, total_count))
    }

    /// Update a product's descriptive fields
    pub async fn update(
        &self,
        product_id: i64,
        req: UpdateProductRequest,
    ) -> Result<Product, ProductError> {
        if let Some(ref name) = req.name {
            Self::validate_name(name)?;
        }
        if let Some(price) = req.price {
            Self::validate_price(price)?;
        }
        if let Some(threshold) = req.threshold {
            if threshold < 0 {
                return Err(ProductError::Validation(
                    "threshold must not be negative".into(),
                ));
            }
        }

        let sql = format!(
            r#"
            UPDATE products
            SET name = COALESCE($2, name),
                price = COALESCE($3, price),
                threshold = COALESCE($4, threshold),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {PRODUCT_COLUMNS}
            "#
        );

        sqlx::query_as::<_, Product>(&sql)
            .bind(product_id)
            .bind(req.name.as_deref().map(str::trim))
            .bind(req.price)
            .bind(req.threshold)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    ProductError::DuplicateName(req.name.unwrap_or_default())
                }
                _ => ProductError::Database(e),
            })?
            .ok_or(ProductError::NotFound(product_id))
    }

    /// Delete a product
    pub async fn delete(&self, product_id: i64) -> Result<(), ProductError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(product_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ProductError::NotFound(product_id));
        }
        Ok(())
    }

    /// Adjust stock by a signed delta as one atomic statement.
    ///
    /// The predicate `quantity + delta >= 0` is evaluated against the
    /// persisted row inside the UPDATE itself, so under concurrent
    /// adjustments exactly the subset of deltas that keeps quantity
    /// non-negative in some serial order succeeds. Zero rows affected is
    /// ambiguous between underflow and a missing product; the follow-up
    /// existence probe only picks the error kind and plays no part in
    /// correctness.
    pub async fn adjust_quantity(
        &self,
        product_id: i64,
        delta: i64,
    ) -> Result<Product, ProductError> {
        let sql = format!(
            r#"
            UPDATE products
            SET quantity = quantity + $2, updated_at = NOW()
            WHERE id = $1 AND quantity + $2 >= 0
            RETURNING {PRODUCT_COLUMNS}
            "#
        );

        let updated = sqlx::query_as::<_, Product>(&sql)
            .bind(product_id)
            .bind(delta)
            .fetch_optional(&self.pool)
            .await?;

        match updated {
            Some(product) => Ok(product),
            None => {
                let exists: Option<i64> =
                    sqlx::query_scalar("SELECT id FROM products WHERE id = $1")
                        .bind(product_id)
                        .fetch_optional(&self.pool)
                        .await?;

                if exists.is_some() {
                    Err(ProductError::InvalidQuantityChange { product_id, delta })
                } else {
                    Err(ProductError::NotFound(product_id))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CreateProductRequest;

    /// Helper to create a test database pool - returns None if no database
    /// is configured, in which case the test is skipped.
    async fn try_create_test_pool() -> Option<PgPool> {
        let _ = dotenvy::dotenv();

        let database_url = std::env::var("DATABASE_URL").ok()?;

        sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .ok()
    }

    async fn create_test_product(service: &ProductService, quantity: i64) -> Product {
        service
            .create(CreateProductRequest {
                name: format!("test-product-{}", uuid::Uuid::new_v4()),
                price: 9.99,
                quantity,
                threshold: 0,
            })
            .await
            .expect("failed to create test product")
    }

    #[tokio::test]
    async fn test_adjust_increases_and_decreases() {
        let Some(pool) = try_create_test_pool().await else {
            return;
        };
        let service = ProductService::new(pool);
        let product = create_test_product(&service, 10).await;

        let up = service.adjust_quantity(product.id, 5).await.unwrap();
        assert_eq!(up.quantity, 15);

        let down = service.adjust_quantity(product.id, -15).await.unwrap();
        assert_eq!(down.quantity, 0);

        let _ = service.delete(product.id).await;
    }

    #[tokio::test]
    async fn test_adjust_never_goes_negative() {
        let Some(pool) = try_create_test_pool().await else {
            return;
        };
        let service = ProductService::new(pool);
        let product = create_test_product(&service, 3).await;

        let err = service.adjust_quantity(product.id, -4).await.unwrap_err();
        assert!(matches!(err, ProductError::InvalidQuantityChange { .. }));

        // Failed adjustment must not have touched the row
        let unchanged = service.get(product.id).await.unwrap();
        assert_eq!(unchanged.quantity, 3);

        let _ = service.delete(product.id).await;
    }

    #[tokio::test]
    async fn test_adjust_missing_product_is_not_found() {
        let Some(pool) = try_create_test_pool().await else {
            return;
        };
        let service = ProductService::new(pool);

        let err = service.adjust_quantity(i64::MAX, -1).await.unwrap_err();
        assert!(matches!(err, ProductError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_underflow_race_admits_exactly_one() {
        let Some(pool) = try_create_test_pool().await else {
            return;
        };
        let service = ProductService::new(pool);
        let product = create_test_product(&service, 10).await;

        let a = service.clone();
        let b = service.clone();
        let id = product.id;
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.adjust_quantity(id, -6).await }),
            tokio::spawn(async move { b.adjust_quantity(id, -6).await }),
        );
        let results = [ra.unwrap(), rb.unwrap()];

        let successes = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(ProductError::InvalidQuantityChange { .. })))
            .count();
        assert_eq!(successes, 1, "exactly one -6 must win on quantity 10");
        assert_eq!(conflicts, 1);

        let final_state = service.get(product.id).await.unwrap();
        assert_eq!(final_state.quantity, 4);

        let _ = service.delete(product.id).await;
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let Some(pool) = try_create_test_pool().await else {
            return;
        };
        let service = ProductService::new(pool);
        let product = create_test_product(&service, 1).await;

        let err = service
            .create(CreateProductRequest {
                name: product.name.clone(),
                price: 1.0,
                quantity: 0,
                threshold: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProductError::DuplicateName(_)));

        let _ = service.delete(product.id).await;
    }

    #[test]
    fn test_validation_rejects_bad_input() {
        assert!(ProductService::validate_name("  ").is_err());
        assert!(ProductService::validate_price(0.0).is_err());
        assert!(ProductService::validate_price(-1.0).is_err());
        assert!(ProductService::validate_price(f64::NAN).is_err());
        assert!(ProductService::validate_price(9.99).is_ok());
    }
}
