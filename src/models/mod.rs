//! Core data models for the object vault.
//!
//! Rows map to database tables via `sqlx::FromRow` and serialize as JSON via
//! `serde`; token payloads are what the TTL cache stores.

pub mod bucket;
pub mod client;
pub mod file;
pub mod token;
