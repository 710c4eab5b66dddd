//! Movement Ledger
//!
//! Append-only log of stock deltas. One row is written per successful
//! adjustment; rows are never updated or deleted. Retrieval is
//! most-recent-first with inclusive time bounds and offset/limit paging.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;

use crate::models::{Movement, MovementFilter};

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum MovementError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Default page size when the caller does not pass a limit
const DEFAULT_LIMIT: i64 = 100;
/// Hard cap on a single page
const MAX_LIMIT: i64 = 1000;

const MOVEMENT_COLUMNS: &str = "id, product_id, delta, created_at, updated_at";

/// Service for the append-only movement ledger
#[derive(Debug, Clone)]
pub struct MovementService {
    pool: PgPool,
}

impl MovementService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one movement with a server-assigned timestamp
    pub async fn log(&self, product_id: i64, delta: i64) -> Result<Movement, MovementError> {
        let sql = format!(
            r#"
            INSERT INTO movements (product_id, delta)
            VALUES ($1, $2)
            RETURNING {MOVEMENT_COLUMNS}
            "#
        );

        let movement = sqlx::query_as::<_, Movement>(&sql)
            .bind(product_id)
            .bind(delta)
            .fetch_one(&self.pool)
            .await?;

        Ok(movement)
    }

    /// Retrieve a product's movements, newest first, with the total count
    /// of rows matching the filter (independent of pagination).
    ///
    /// Time bounds are inclusive at both ends; `since > until` yields an
    /// empty page. `limit` of zero is a count-only query. An offset past the
    /// total yields an empty page with the correct count, never null.
    pub async fn get_by_product_id(
        &self,
        product_id: i64,
        filter: &MovementFilter,
    ) -> Result<(Vec<Movement>, i64), MovementError> {
        let limit = filter.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let offset = filter.offset.unwrap_or(0);

        let mut conditions = vec!["product_id = $1".to_string()];
        let mut param_idx = 2;

        if filter.since.is_some() {
            conditions.push(format!("created_at >= ${param_idx}"));
            param_idx += 1;
        }
        if filter.until.is_some() {
            conditions.push(format!("created_at <= ${param_idx}"));
            param_idx += 1;
        }

        let where_clause = format!("WHERE {}", conditions.join(" AND "));

        let count_sql = format!("SELECT COUNT(*) FROM movements {where_clause}");
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql).bind(product_id);
        if let Some(since) = filter.since {
            count_query = count_query.bind(since);
        }
        if let Some(until) = filter.until {
            count_query = count_query.bind(until);
        }
        let total_count = count_query.fetch_one(&self.pool).await?;

        if limit == 0 {
            return Ok((Vec::new(), total_count));
        }

        // The id tiebreaker keeps the order total, so paging over a quiet
        // ledger never skips or duplicates rows.
        let select_sql = format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM movements
            {where_clause}
            ORDER BY created_at DESC, id DESC
            LIMIT ${param_idx} OFFSET ${next_param}
            "#,
            next_param = param_idx + 1
        );

        let mut select_query = sqlx::query_as::<_, Movement>(&select_sql).bind(product_id);
        if let Some(since) = filter.since {
            select_query = select_query.bind(since);
        }
        if let Some(until) = filter.until {
            select_query = select_query.bind(until);
        }
        let movements = select_query
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok((movements, total_count))
    }

    /// Retrieve all of a product's movements in a time range, unpaginated,
    /// for export.
    pub async fn export(
        &self,
        product_id: i64,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Movement>, MovementError> {
        let mut conditions = vec!["product_id = $1".to_string()];

        if since.is_some() {
            conditions.push(format!("created_at >= ${}", conditions.len() + 1));
        }
        if until.is_some() {
            conditions.push(format!("created_at <= ${}", conditions.len() + 1));
        }

        let sql = format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM movements
            WHERE {}
            ORDER BY created_at DESC, id DESC
            "#,
            conditions.join(" AND ")
        );

        let mut query = sqlx::query_as::<_, Movement>(&sql).bind(product_id);
        if let Some(since) = since {
            query = query.bind(since);
        }
        if let Some(until) = until {
            query = query.bind(until);
        }

        Ok(query.fetch_all(&self.pool).await?)
    }
}

/// Render movements as CSV with RFC 3339 timestamps
pub fn movements_to_csv(movements: &[Movement]) -> String {
    let mut out = String::from("id,product_id,delta,created_at\n");
    for m in movements {
        out.push_str(&format!(
            "{},{},{},{}\n",
            m.id,
            m.product_id,
            m.delta,
            m.created_at.to_rfc3339()
        ));
    }
    out
}
