//! Axum handlers, grouped by resource.

pub mod auth;
pub mod bucket_handlers;
pub mod client_handlers;
pub mod file_handlers;
pub mod health_handlers;
pub mod public_handlers;
