//! Product handlers
//!
//! HTTP handlers for product CRUD and the stock adjustment endpoint. The
//! adjust handler is the composition point for one logical adjustment:
//! atomic quantity change, then best-effort ledger append, then an optional
//! detached low-stock alert.

use std::sync::Arc;

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::error;

use crate::error::AppError;
use crate::handlers::ApiResponse;
use crate::models::{
    AdjustQuantityRequest, CreateProductRequest, ProductListResponse, ProductResponse,
    UpdateProductRequest,
};
use crate::services::product::ProductError;
use crate::services::{MovementService, ProductService};
use crate::AppState;

/// Query parameters for product listing
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

/// POST /products
pub async fn create_product(
    state: web::Data<AppState>,
    body: web::Json<CreateProductRequest>,
) -> Result<HttpResponse, AppError> {
    let service = ProductService::new(state.db.clone());

    let product = service
        .create(body.into_inner())
        .await
        .map_err(map_product_error)?;

    Ok(HttpResponse::Created().json(ApiResponse::new(ProductResponse::from(product))))
}

/// GET /products
pub async fn list_products(
    state: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, AppError> {
    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(100);
    if offset < 0 || limit < 0 {
        return Err(AppError::Validation(
            "offset and limit must not be negative".into(),
        ));
    }

    let service = ProductService::new(state.db.clone());
    let (products, total_count) = service.list(offset, limit.min(1000)).await.map_err(map_product_error)?;

    Ok(HttpResponse::Ok().json(ApiResponse::new(ProductListResponse {
        products: products.into_iter().map(ProductResponse::from).collect(),
        total_count,
    })))
}

/// GET /products/{id}
pub async fn get_product(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let service = ProductService::new(state.db.clone());

    let product = service
        .get(path.into_inner())
        .await
        .map_err(map_product_error)?;

    Ok(HttpResponse::Ok().json(ApiResponse::new(ProductResponse::from(product))))
}

/// PUT /products/{id}
pub async fn update_product(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<UpdateProductRequest>,
) -> Result<HttpResponse, AppError> {
    let service = ProductService::new(state.db.clone());

    let product = service
        .update(path.into_inner(), body.into_inner())
        .await
        .map_err(map_product_error)?;

    Ok(HttpResponse::Ok().json(ApiResponse::new(ProductResponse::from(product))))
}

/// DELETE /products/{id}
pub async fn delete_product(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let service = ProductService::new(state.db.clone());

    service
        .delete(path.into_inner())
        .await
        .map_err(map_product_error)?;

    Ok(HttpResponse::NoContent().finish())
}

/// POST /products/{id}/adjust
///
/// Applies one signed delta to the product's stock. The quantity change is
/// the atomic step; the movement append happens after it commits and its
/// failure is logged, never surfaced, because the stock mutation must not
/// be rolled back for an audit-trail failure.
pub async fn adjust_product(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<AdjustQuantityRequest>,
) -> Result<HttpResponse, AppError> {
    let product_id = path.into_inner();
    let delta = body.into_inner().delta;

    let products = ProductService::new(state.db.clone());
    let product = products
        .adjust_quantity(product_id, delta)
        .await
        .map_err(map_product_error)?;

    let movements = MovementService::new(state.db.clone());
    if let Err(e) = movements.log(product_id, delta).await {
        error!("Failed to record movement for product {product_id} (delta {delta}): {e}");
    }

    if product.low_stock() {
        let notifier = Arc::clone(&state.notifier);
        let subject = format!("Low stock: {}", product.name);
        let body = format!(
            "Product {} ({}) is at {} units, below its threshold of {}.",
            product.name, product.id, product.quantity, product.threshold
        );
        // Detached so a slow sink cannot delay the response, and so the
        // request finishing (or aborting) cannot cancel the alert.
        tokio::spawn(async move {
            notifier.notify(&subject, &body).await;
        });
    }

    Ok(HttpResponse::Ok().json(ApiResponse::new(ProductResponse::from(product))))
}

/// Map product errors to application errors
fn map_product_error(e: ProductError) -> AppError {
    match e {
        ProductError::NotFound(id) => AppError::NotFound(format!("Product not found: {id}")),
        ProductError::DuplicateName(name) => {
            AppError::Conflict(format!("Product name already exists: {name}"))
        }
        ProductError::InvalidQuantityChange { product_id, delta } => AppError::InvalidQuantityChange(
            format!("adjustment of {delta} would make quantity of product {product_id} negative"),
        ),
        ProductError::Validation(msg) => AppError::Validation(msg),
        ProductError::Database(e) => AppError::Database(e),
    }
}

/// Configure product routes
pub fn configure_product_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/products")
            .route("", web::post().to(create_product))
            .route("", web::get().to(list_products))
            .route("/{id}", web::get().to(get_product))
            .route("/{id}", web::put().to(update_product))
            .route("/{id}", web::delete().to(delete_product))
            .route("/{id}/adjust", web::post().to(adjust_product)),
    );
}
