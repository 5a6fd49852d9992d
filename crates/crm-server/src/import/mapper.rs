//! Record mapper: normalizes a parsed CSV row into a Customer tuple and
//! computes its stable fingerprint.
//!
//! Header lookup is case-insensitive against an ordered alias list per
//! field, so "Customer Id", "customer_id" and "CUSTOMERID" all resolve the
//! same column. A row without a usable identifier maps to `None` and is
//! skipped by the worker without counting as processed.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Target customer tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
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

const CUSTOMER_ID_ALIASES: &[&str] = &["customer id", "customer_id", "customerid", "id"];
const FIRST_NAME_ALIASES: &[&str] = &["firstname", "first_name", "first name"];
const LAST_NAME_ALIASES: &[&str] = &["lastname", "last_name", "last name", "surname"];
const FULL_NAME_ALIASES: &[&str] = &["fullname", "full_name", "full name", "name"];
const EMAIL_ALIASES: &[&str] = &["email", "e-mail", "email address", "email_address"];
const COMPANY_ALIASES: &[&str] = &["company", "company name", "company_name"];
const CITY_ALIASES: &[&str] = &["city", "town"];
const COUNTRY_ALIASES: &[&str] = &["country"];
const PHONE1_ALIASES: &[&str] = &["phone 1", "phone1", "phone_1", "phone"];
const PHONE2_ALIASES: &[&str] = &["phone 2", "phone2", "phone_2"];
const WEBSITE_ALIASES: &[&str] = &["website", "web site", "url"];
const ABOUT_ALIASES: &[&str] = &["about customer", "about_customer", "aboutcustomer", "about"];
const SUBSCRIPTION_DATE_ALIASES: &[&str] = &[
    "subscription date",
    "subscription_date",
    "subscriptiondate",
    "subscribed",
];

/// Date formats accepted for subscriptionDate, tried in order.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d-%m-%Y", "%d.%m.%Y"];

/// Look up the first matching alias in a lowercase-keyed row, returning a
/// trimmed, non-empty value.
fn lookup(row: &HashMap<String, String>, aliases: &[&str]) -> Option<String> {
    for alias in aliases {
        if let Some(value) = row.get(*alias) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// Parse a date permissively; unparseable values are dropped.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.date_naive())
}

/// Map a parsed header->value record to a Customer.
///
/// Returns `None` when the row carries neither a customer id nor an email;
/// such rows are skipped, not failed. When only an email is present it
/// becomes the identifier verbatim (normalized), so two rows sharing an
/// email but carrying different customer ids stay distinct rows.
pub fn map_record(record: &HashMap<String, String>) -> Option<Customer> {
    let row: HashMap<String, String> = record
        .iter()
        .map(|(k, v)| (k.trim().to_lowercase(), v.clone()))
        .collect();

    let mut first_name = lookup(&row, FIRST_NAME_ALIASES);
    let mut last_name = lookup(&row, LAST_NAME_ALIASES);

    // A bare full name splits on whitespace: first token, then the rest.
    if first_name.is_none() {
        if let Some(full) = lookup(&row, FULL_NAME_ALIASES) {
            let mut parts = full.split_whitespace();
            first_name = parts.next().map(|s| s.to_string());
            let rest = parts.collect::<Vec<_>>().join(" ");
            if last_name.is_none() && !rest.is_empty() {
                last_name = Some(rest);
            }
        }
    }

    let email = lookup(&row, EMAIL_ALIASES).map(|e| e.to_lowercase());

    let customer_id = match lookup(&row, CUSTOMER_ID_ALIASES) {
        Some(id) => id,
        None => email.clone()?,
    };

    let subscription_date = lookup(&row, SUBSCRIPTION_DATE_ALIASES)
        .as_deref()
        .and_then(parse_date);

    Some(Customer {
        customer_id,
        first_name,
        last_name,
        email,
        company: lookup(&row, COMPANY_ALIASES),
        city: lookup(&row, CITY_ALIASES),
        country: lookup(&row, COUNTRY_ALIASES),
        phone1: lookup(&row, PHONE1_ALIASES),
        phone2: lookup(&row, PHONE2_ALIASES),
        website: lookup(&row, WEBSITE_ALIASES),
        about_customer: lookup(&row, ABOUT_ALIASES),
        subscription_date,
    })
}

/// SHA-256 fingerprint over the customer fields in fixed order, joined by a
/// single pipe. Deterministic and independent of header case or map order.
pub fn source_hash(customer: &Customer) -> String {
    let date = customer
        .subscription_date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();

    let fields: [&str; 12] = [
        &customer.customer_id,
        customer.first_name.as_deref().unwrap_or(""),
        customer.last_name.as_deref().unwrap_or(""),
        customer.company.as_deref().unwrap_or(""),
        customer.city.as_deref().unwrap_or(""),
        customer.country.as_deref().unwrap_or(""),
        customer.phone1.as_deref().unwrap_or(""),
        customer.phone2.as_deref().unwrap_or(""),
        customer.email.as_deref().unwrap_or(""),
        &date,
        customer.website.as_deref().unwrap_or(""),
        customer.about_customer.as_deref().unwrap_or(""),
    ];

    let mut hasher = Sha256::new();
    hasher.update(fields.join("|").as_bytes());
    hex::encode(hasher.finalize())
}
