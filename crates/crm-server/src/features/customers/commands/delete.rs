use mediator::Request;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteCustomerCommand {
    pub customer_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DeleteCustomerError {
    #[error("Customer '{0}' not found")]
    NotFound(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Request<Result<(), DeleteCustomerError>> for DeleteCustomerCommand {}

#[tracing::instrument(skip(pool))]
pub async fn handle(pool: PgPool, command: DeleteCustomerCommand) -> Result<(), DeleteCustomerError> {
    let result = sqlx::query("DELETE FROM customers WHERE customer_id = $1")
        .bind(&command.customer_id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DeleteCustomerError::NotFound(command.customer_id));
    }
    Ok(())
}
