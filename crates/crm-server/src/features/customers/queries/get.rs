use mediator::Request;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::models::{CustomerRecord, CUSTOMER_COLUMNS};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetCustomerQuery {
    pub customer_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GetCustomerError {
    #[error("Customer '{0}' not found")]
    NotFound(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Request<Result<CustomerRecord, GetCustomerError>> for GetCustomerQuery {}

pub async fn handle(pool: PgPool, query: GetCustomerQuery) -> Result<CustomerRecord, GetCustomerError> {
    let sql = format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE customer_id = $1");
    sqlx::query_as::<_, CustomerRecord>(&sql)
        .bind(&query.customer_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(GetCustomerError::NotFound(query.customer_id))
}
