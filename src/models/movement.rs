//! Movement model and related types
//!
//! A movement is the immutable audit record of one stock adjustment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Movement record in the database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Movement {
    pub id: i64,
    pub product_id: i64,
    pub delta: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Time-range and pagination filter for movement retrieval.
///
/// Both time bounds are inclusive. `since > until` degenerates to an empty
/// result rather than an error. `limit` of zero is a valid count-only query.
#[derive(Debug, Clone, Default)]
pub struct MovementFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

/// Raw query parameters for the movements endpoints, validated in handlers
#[derive(Debug, Clone, Deserialize)]
pub struct MovementQuery {
    pub since: Option<String>,
    pub until: Option<String>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

/// Raw query parameters for the export endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct MovementExportQuery {
    #[serde(default = "default_export_format")]
    pub format: String,
    pub since: Option<String>,
    pub until: Option<String>,
}

fn default_export_format() -> String {
    "json".to_string()
}

/// Response for paginated movement retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementListResponse {
    pub movements: Vec<Movement>,
    pub total_count: i64,
}
