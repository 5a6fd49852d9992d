//! Batch writer: classifies a batch into inserts and updates and commits it
//! in one transaction.
//!
//! In-batch duplicates collapse last-wins before touching the database, so a
//! batch can never conflict with itself. Inserts go through one bulk
//! statement with ON CONFLICT DO NOTHING, which also absorbs rows replayed
//! by an overlapping resume window.

use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashSet;

use super::mapper::Customer;
use crate::db::{self, RetryConfig};

/// Rows per bulk INSERT statement. Each row binds 12 parameters; this stays
/// well under the Postgres limit of 65535 bind parameters.
const INSERT_CHUNK_SIZE: usize = 400;

/// One mapped row awaiting commit.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub customer: Customer,
    pub source_hash: String,
}

/// Result of committing a batch.
#[derive(Debug, Clone, Default)]
pub struct FlushOutcome {
    /// Inserts plus updates applied.
    pub affected: i64,
    /// Fingerprint of the last item after deduplication; the resume marker.
    pub last_hash: Option<String>,
}

/// Collapse duplicate customer ids, keeping the latest occurrence of each id
/// in its original relative position.
pub fn dedup_last_wins(items: Vec<BatchItem>) -> Vec<BatchItem> {
    let mut seen: HashSet<String> = HashSet::with_capacity(items.len());
    let mut kept: Vec<BatchItem> = items
        .into_iter()
        .rev()
        .filter(|item| seen.insert(item.customer.customer_id.clone()))
        .collect();
    kept.reverse();
    kept
}

/// Commits customer batches against Postgres.
#[derive(Debug, Clone)]
pub struct BatchWriter {
    pool: PgPool,
    retry: RetryConfig,
}

impl BatchWriter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            retry: RetryConfig::default(),
        }
    }

    /// Deduplicate, classify, and commit a batch. An empty batch returns
    /// without touching the database. Transient failures retry the whole
    /// transaction.
    pub async fn flush(&self, items: Vec<BatchItem>) -> Result<FlushOutcome> {
        if items.is_empty() {
            return Ok(FlushOutcome::default());
        }

        let deduped = dedup_last_wins(items);
        let last_hash = deduped.last().map(|item| item.source_hash.clone());

        let affected = db::with_retries(&self.retry, "flush_batch", || self.flush_once(&deduped))
            .await
            .context("Failed to commit customer batch")?;

        Ok(FlushOutcome {
            affected,
            last_hash,
        })
    }

    async fn flush_once(&self, items: &[BatchItem]) -> Result<i64, sqlx::Error> {
        let ids: Vec<String> = items
            .iter()
            .map(|item| item.customer.customer_id.clone())
            .collect();

        let existing: HashSet<String> =
            sqlx::query_scalar::<_, String>("SELECT customer_id FROM customers WHERE customer_id = ANY($1)")
                .bind(&ids)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .collect();

        let (updates, inserts): (Vec<&BatchItem>, Vec<&BatchItem>) = items
            .iter()
            .partition(|item| existing.contains(&item.customer.customer_id));

        let mut tx = self.pool.begin().await?;
        let mut affected: i64 = 0;

        for chunk in inserts.chunks(INSERT_CHUNK_SIZE) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO customers (customer_id, first_name, last_name, email, company, \
                 city, country, phone1, phone2, website, about_customer, subscription_date) ",
            );
            builder.push_values(chunk, |mut b, item| {
                let c = &item.customer;
                b.push_bind(&c.customer_id)
                    .push_bind(&c.first_name)
                    .push_bind(&c.last_name)
                    .push_bind(&c.email)
                    .push_bind(&c.company)
                    .push_bind(&c.city)
                    .push_bind(&c.country)
                    .push_bind(&c.phone1)
                    .push_bind(&c.phone2)
                    .push_bind(&c.website)
                    .push_bind(&c.about_customer)
                    .push_bind(c.subscription_date);
            });
            builder.push(" ON CONFLICT (customer_id) DO NOTHING");

            let result = builder.build().execute(&mut *tx).await?;
            affected += result.rows_affected() as i64;
        }

        for item in &updates {
            let c = &item.customer;
            let result = sqlx::query(
                "UPDATE customers \
                 SET first_name = $2, last_name = $3, email = $4, company = $5, city = $6, \
                     country = $7, phone1 = $8, phone2 = $9, website = $10, \
                     about_customer = $11, subscription_date = $12, updated_at = NOW() \
                 WHERE customer_id = $1",
            )
            .bind(&c.customer_id)
            .bind(&c.first_name)
            .bind(&c.last_name)
            .bind(&c.email)
            .bind(&c.company)
            .bind(&c.city)
            .bind(&c.country)
            .bind(&c.phone1)
            .bind(&c.phone2)
            .bind(&c.website)
            .bind(&c.about_customer)
            .bind(c.subscription_date)
            .execute(&mut *tx)
            .await?;
            affected += result.rows_affected() as i64;
        }

        tx.commit().await?;

        Ok(affected)
    }
}
