//! Shared persistence-facing models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A customer row as stored (maps to `customers`).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRecord {
    pub id: i64,
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
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column list matching [`CustomerRecord`]'s field order.
pub const CUSTOMER_COLUMNS: &str = "id, customer_id, first_name, last_name, email, company, \
     city, country, phone1, phone2, website, about_customer, subscription_date, \
     created_at, updated_at";
