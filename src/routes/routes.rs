//! Defines routes for the object vault API.
//!
//! ## Structure
//! - **File endpoints**
//!   - `POST   /files/signed-url`: issue an upload token (Basic auth)
//!   - `POST   /files/upload?token=`: redeem an upload token (multipart `file`)
//!   - `POST   /files/download-url`: issue a download token (Basic auth)
//!   - `GET    /files/download?token=`: redeem a download token
//!   - `DELETE /files`: bulk delete by ids or folder path (Basic auth)
//!   - `GET    /files/{bucket_name}/{*file_path}`: public read
//!   - `OPTIONS /files/{bucket_name}/{*file_path}`: CORS preflight
//!
//! - **Bucket endpoints** (Basic auth)
//!   - `POST /buckets`, `GET /buckets`
//!   - `GET /buckets/{id}`, `PUT /buckets/{id}`, `POST /buckets/{id}/archive`
//!   - `GET /buckets/{id}/files?path=`: list one folder level
//!
//! - **Client endpoints** (admin Bearer token)
//!   - `POST /clients`, `GET /clients`, `GET /clients/{id}`
//!
//! The wildcard `*file_path` allows nested keys like `images/2025/logo.png`.

use crate::{
    handlers::{
        bucket_handlers::{archive_bucket, create_bucket, get_bucket, list_buckets, update_bucket},
        client_handlers::{create_client, get_client, list_clients},
        file_handlers::{
            delete_files, download_file, issue_download_url, issue_upload_url, list_bucket_files,
            upload_file,
        },
        health_handlers::{healthz, readyz},
        public_handlers::{preflight_public_file, serve_public_file},
    },
    services::storage_service::StorageService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

/// Build and return the router for the whole API.
///
/// The router carries shared state (`StorageService`) to all handlers.
/// `max_upload_bytes` caps the request body of the upload route only.
pub fn routes(max_upload_bytes: usize) -> Router<StorageService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // token issuance and redemption
        .route("/files/signed-url", post(issue_upload_url))
        .route(
            "/files/upload",
            post(upload_file).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/files/download-url", post(issue_download_url))
        .route("/files/download", get(download_file))
        .route("/files", delete(delete_files))
        // anonymous reads
        .route(
            "/files/{bucket_name}/{*file_path}",
            get(serve_public_file).options(preflight_public_file),
        )
        // buckets
        .route("/buckets", post(create_bucket).get(list_buckets))
        .route("/buckets/{id}", get(get_bucket).put(update_bucket))
        .route("/buckets/{id}/archive", post(archive_bucket))
        .route("/buckets/{id}/files", get(list_bucket_files))
        // clients
        .route("/clients", post(create_client).get(list_clients))
        .route("/clients/{id}", get(get_client))
        .layer(TraceLayer::new_for_http())
}
