use mediator::Request;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::features::shared::pagination::{PaginationMetadata, PaginationParams};
use crate::models::{CustomerRecord, CUSTOMER_COLUMNS};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListCustomersQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

impl ListCustomersQuery {
    fn pagination(&self) -> PaginationParams {
        PaginationParams {
            page: self.page,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListCustomersResponse {
    pub items: Vec<CustomerRecord>,
    pub pagination: PaginationMetadata,
}

#[derive(Debug, thiserror::Error)]
pub enum ListCustomersError {
    #[error("{0}")]
    InvalidPagination(&'static str),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Request<Result<ListCustomersResponse, ListCustomersError>> for ListCustomersQuery {}

#[tracing::instrument(skip(pool))]
pub async fn handle(
    pool: PgPool,
    query: ListCustomersQuery,
) -> Result<ListCustomersResponse, ListCustomersError> {
    let pagination = query.pagination();
    pagination
        .validate()
        .map_err(ListCustomersError::InvalidPagination)?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM customers")
        .fetch_one(&pool)
        .await?;

    let sql = format!(
        "SELECT {CUSTOMER_COLUMNS} FROM customers \
         ORDER BY updated_at DESC, id DESC LIMIT $1 OFFSET $2"
    );
    let items = sqlx::query_as::<_, CustomerRecord>(&sql)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&pool)
        .await?;

    Ok(ListCustomersResponse {
        pagination: PaginationMetadata::from_params(&pagination, total),
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_deserializes_page_and_limit() {
        let query: ListCustomersQuery = serde_json::from_str(r#"{"page":2,"limit":50}"#).unwrap();
        assert_eq!(query.pagination().page(), 2);
        assert_eq!(query.pagination().limit(), 50);
    }

    #[test]
    fn test_query_defaults_when_empty() {
        let query: ListCustomersQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.pagination().page(), 1);
        assert_eq!(query.pagination().limit(), 20);
    }
}
