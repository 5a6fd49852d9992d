use chrono::NaiveDate;
use mediator::Request;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::models::{CustomerRecord, CUSTOMER_COLUMNS};

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCustomerCommand {
    #[serde(skip)]
    pub customer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about_customer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_date: Option<NaiveDate>,
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateCustomerError {
    #[error("Customer '{0}' not found")]
    NotFound(String),
    #[error("A customer with email '{0}' already exists")]
    DuplicateEmail(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Request<Result<CustomerRecord, UpdateCustomerError>> for UpdateCustomerCommand {}

#[tracing::instrument(skip(pool, command), fields(customer_id = %command.customer_id))]
pub async fn handle(
    pool: PgPool,
    mut command: UpdateCustomerCommand,
) -> Result<CustomerRecord, UpdateCustomerError> {
    command.email = command
        .email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty());

    if let Some(ref email) = command.email {
        let taken: Option<String> = sqlx::query_scalar(
            "SELECT customer_id FROM customers WHERE email = $1 AND customer_id <> $2 LIMIT 1",
        )
        .bind(email)
        .bind(&command.customer_id)
        .fetch_optional(&pool)
        .await?;
        if taken.is_some() {
            return Err(UpdateCustomerError::DuplicateEmail(email.clone()));
        }
    }

    let sql = format!(
        "UPDATE customers \
         SET first_name = COALESCE($2, first_name), \
             last_name = COALESCE($3, last_name), \
             email = COALESCE($4, email), \
             company = COALESCE($5, company), \
             city = COALESCE($6, city), \
             country = COALESCE($7, country), \
             phone1 = COALESCE($8, phone1), \
             phone2 = COALESCE($9, phone2), \
             website = COALESCE($10, website), \
             about_customer = COALESCE($11, about_customer), \
             subscription_date = COALESCE($12, subscription_date), \
             updated_at = NOW() \
         WHERE customer_id = $1 \
         RETURNING {CUSTOMER_COLUMNS}"
    );
    let record = sqlx::query_as::<_, CustomerRecord>(&sql)
        .bind(&command.customer_id)
        .bind(&command.first_name)
        .bind(&command.last_name)
        .bind(&command.email)
        .bind(&command.company)
        .bind(&command.city)
        .bind(&command.country)
        .bind(&command.phone1)
        .bind(&command.phone2)
        .bind(&command.website)
        .bind(&command.about_customer)
        .bind(command.subscription_date)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| UpdateCustomerError::NotFound(command.customer_id.clone()))?;

    Ok(record)
}
