use chrono::NaiveDate;
use mediator::Request;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::models::{CustomerRecord, CUSTOMER_COLUMNS};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCustomerCommand {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
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
pub enum CreateCustomerError {
    #[error("Either customerId or email is required")]
    IdentifierRequired,
    #[error("Customer '{0}' already exists")]
    DuplicateCustomerId(String),
    #[error("A customer with email '{0}' already exists")]
    DuplicateEmail(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Request<Result<CustomerRecord, CreateCustomerError>> for CreateCustomerCommand {}

impl CreateCustomerCommand {
    /// Normalize the way the import mapper does: trim everything, drop
    /// empties, lower-case the email, fall back to email as identifier.
    pub fn normalize(mut self) -> Result<NormalizedCustomer, CreateCustomerError> {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }

        self.email = clean(self.email).map(|e| e.to_lowercase());
        let customer_id = clean(self.customer_id)
            .or_else(|| self.email.clone())
            .ok_or(CreateCustomerError::IdentifierRequired)?;

        Ok(NormalizedCustomer {
            customer_id,
            first_name: clean(self.first_name),
            last_name: clean(self.last_name),
            email: self.email,
            company: clean(self.company),
            city: clean(self.city),
            country: clean(self.country),
            phone1: clean(self.phone1),
            phone2: clean(self.phone2),
            website: clean(self.website),
            about_customer: clean(self.about_customer),
            subscription_date: self.subscription_date,
        })
    }
}

/// Validated create payload.
#[derive(Debug, Clone)]
pub struct NormalizedCustomer {
    pub customer_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub phone1: Option<String>,
    pub phone2: Option<String>,
    pub website: Option<String>,
    pub about_customer: Option<String>,
    pub subscription_date: Option<NaiveDate>,
}

#[tracing::instrument(skip(pool, command))]
pub async fn handle(
    pool: PgPool,
    command: CreateCustomerCommand,
) -> Result<CustomerRecord, CreateCustomerError> {
    let customer = command.normalize()?;

    if let Some(ref email) = customer.email {
        let taken: Option<String> =
            sqlx::query_scalar("SELECT customer_id FROM customers WHERE email = $1 LIMIT 1")
                .bind(email)
                .fetch_optional(&pool)
                .await?;
        if taken.is_some() {
            return Err(CreateCustomerError::DuplicateEmail(email.clone()));
        }
    }

    let sql = format!(
        "INSERT INTO customers (customer_id, first_name, last_name, email, company, city, \
         country, phone1, phone2, website, about_customer, subscription_date) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         RETURNING {CUSTOMER_COLUMNS}"
    );
    let record = sqlx::query_as::<_, CustomerRecord>(&sql)
        .bind(&customer.customer_id)
        .bind(&customer.first_name)
        .bind(&customer.last_name)
        .bind(&customer.email)
        .bind(&customer.company)
        .bind(&customer.city)
        .bind(&customer.country)
        .bind(&customer.phone1)
        .bind(&customer.phone2)
        .bind(&customer.website)
        .bind(&customer.about_customer)
        .bind(customer.subscription_date)
        .fetch_one(&pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.is_unique_violation() {
                    return CreateCustomerError::DuplicateCustomerId(customer.customer_id.clone());
                }
            }
            CreateCustomerError::Database(e)
        })?;

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_command() -> CreateCustomerCommand {
        serde_json::from_str("{}").unwrap()
    }

    #[test]
    fn test_normalize_requires_an_identifier() {
        let err = empty_command().normalize().unwrap_err();
        assert!(matches!(err, CreateCustomerError::IdentifierRequired));
    }

    #[test]
    fn test_normalize_lowercases_email_and_uses_it_as_id() {
        let mut command = empty_command();
        command.email = Some("  Alice@Example.COM ".to_string());
        let customer = command.normalize().unwrap();
        assert_eq!(customer.customer_id, "alice@example.com");
        assert_eq!(customer.email.as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn test_normalize_drops_blank_fields() {
        let mut command = empty_command();
        command.customer_id = Some("C001".to_string());
        command.city = Some("   ".to_string());
        let customer = command.normalize().unwrap();
        assert!(customer.city.is_none());
    }

    #[test]
    fn test_command_deserializes_camel_case() {
        let command: CreateCustomerCommand =
            serde_json::from_str(r#"{"customerId":"C001","firstName":"Alice"}"#).unwrap();
        assert_eq!(command.customer_id.as_deref(), Some("C001"));
        assert_eq!(command.first_name.as_deref(), Some("Alice"));
    }
}
