//! Customer CRUD feature slice.
//!
//! Point reads and writes over rows the importer owns in bulk. Concurrent
//! edits are last-write-wins at row granularity; `customer_id` uniqueness is
//! the only cross-row constraint.

pub mod commands;
pub mod queries;
pub mod routes;

pub use routes::customers_routes;
