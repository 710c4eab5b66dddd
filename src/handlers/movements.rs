//! Movement handlers
//!
//! Read-only HTTP surface over the movement ledger: paginated retrieval and
//! CSV/JSON export. Timestamp query parameters are RFC 3339; a space in the
//! offset position is treated as a `+` that was eaten by query decoding.

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::handlers::ApiResponse;
use crate::models::{MovementExportQuery, MovementFilter, MovementListResponse, MovementQuery};
use crate::services::movement::MovementError;
use crate::services::product::ProductError;
use crate::services::{movements_to_csv, MovementService, ProductService};
use crate::AppState;

/// Parse an RFC 3339 timestamp from a query parameter.
///
/// `+` in a query string is percent-decoded to a space, so
/// `2024-01-01T00:00:00 00:00` is really `...+00:00`. Restore it before
/// parsing rather than making callers percent-encode the offset.
fn parse_timestamp(raw: &str, param: &str) -> Result<DateTime<Utc>, AppError> {
    let normalized = raw.replace(' ', "+");
    DateTime::parse_from_rfc3339(&normalized)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| {
            AppError::Validation(format!(
                "invalid {param} timestamp: '{raw}' is not RFC 3339"
            ))
        })
}

fn build_filter(query: &MovementQuery) -> Result<MovementFilter, AppError> {
    if let Some(offset) = query.offset {
        if offset < 0 {
            return Err(AppError::Validation("offset must not be negative".into()));
        }
    }
    if let Some(limit) = query.limit {
        if limit < 0 {
            return Err(AppError::Validation("limit must not be negative".into()));
        }
    }

    Ok(MovementFilter {
        since: query
            .since
            .as_deref()
            .map(|raw| parse_timestamp(raw, "since"))
            .transpose()?,
        until: query
            .until
            .as_deref()
            .map(|raw| parse_timestamp(raw, "until"))
            .transpose()?,
        offset: query.offset,
        limit: query.limit,
    })
}

/// Unknown products get a 404 rather than an empty ledger
async fn ensure_product_exists(state: &AppState, product_id: i64) -> Result<(), AppError> {
    ProductService::new(state.db.clone())
        .get(product_id)
        .await
        .map(|_| ())
        .map_err(|e| match e {
            ProductError::NotFound(id) => AppError::NotFound(format!("Product not found: {id}")),
            ProductError::Database(e) => AppError::Database(e),
            other => AppError::Internal(other.to_string()),
        })
}

/// GET /products/{id}/movements
pub async fn list_movements(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    query: web::Query<MovementQuery>,
) -> Result<HttpResponse, AppError> {
    let product_id = path.into_inner();
    let filter = build_filter(&query)?;

    ensure_product_exists(&state, product_id).await?;

    let service = MovementService::new(state.db.clone());
    let (movements, total_count) = service
        .get_by_product_id(product_id, &filter)
        .await
        .map_err(map_movement_error)?;

    Ok(HttpResponse::Ok().json(ApiResponse::new(MovementListResponse {
        movements,
        total_count,
    })))
}

/// GET /products/{id}/movements/export
pub async fn export_movements(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    query: web::Query<MovementExportQuery>,
) -> Result<HttpResponse, AppError> {
    let product_id = path.into_inner();

    let format = query.format.to_lowercase();
    if format != "csv" && format != "json" {
        return Err(AppError::Validation(format!(
            "unsupported export format: '{}'",
            query.format
        )));
    }

    let since = query
        .since
        .as_deref()
        .map(|raw| parse_timestamp(raw, "since"))
        .transpose()?;
    let until = query
        .until
        .as_deref()
        .map(|raw| parse_timestamp(raw, "until"))
        .transpose()?;

    ensure_product_exists(&state, product_id).await?;

    let service = MovementService::new(state.db.clone());
    let movements = service
        .export(product_id, since, until)
        .await
        .map_err(map_movement_error)?;

    let response = if format == "csv" {
        HttpResponse::Ok()
            .content_type("text/csv; charset=utf-8")
            .insert_header((
                "Content-Disposition",
                format!("attachment; filename=\"movements-{product_id}.csv\""),
            ))
            .body(movements_to_csv(&movements))
    } else {
        HttpResponse::Ok().json(movements)
    };

    Ok(response)
}

/// Map movement errors to application errors
fn map_movement_error(e: MovementError) -> AppError {
    match e {
        MovementError::Database(e) => AppError::Database(e),
    }
}

/// Configure movement routes.
///
/// This scope shares the `/products` prefix with the product scope, so it
/// must be registered first: scope matching is first-match on the prefix and
/// does not backtrack.
pub fn configure_movement_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/products/{id}/movements")
            .route("", web::get().to(list_movements))
            .route("/export", web::get().to(export_movements)),
    );
}
