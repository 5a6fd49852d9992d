//! Streaming customer import pipeline.
//!
//! The pipeline is a chain of narrow pieces: the [`parser`] streams rows off
//! disk from any byte offset, the [`mapper`] normalizes them into customer
//! tuples with a stable fingerprint, the [`batch`] writer commits them, the
//! [`worker`] drives one job end to end against the [`jobs`] store, the
//! [`supervisor`] guarantees a single live worker per process, and
//! [`progress`] fans live state out to observers.

pub mod batch;
pub mod jobs;
pub mod mapper;
pub mod parser;
pub mod progress;
pub mod supervisor;
pub mod worker;

use serde::Serializer;

/// Serialize a 64-bit counter as a decimal string. Wire payloads carry
/// counters as strings so consumers that parse JSON numbers into doubles
/// keep full precision.
pub(crate) fn serialize_i64_string<S: Serializer>(
    value: &i64,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}
