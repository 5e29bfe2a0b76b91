//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the database, disk I/O and the token cache

use crate::{
    errors::{StorageError, StorageResult},
    services::storage_service::StorageService,
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::BTreeMap;

/// `GET /healthz`
///
/// Very small liveness probe; always returns 200 OK and performs no I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Runs `SELECT 1` against SQLite.
/// 2. Writes, reads back and deletes a scratch file under the storage root.
/// 3. Sets and takes a throwaway token-cache entry.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(service): State<StorageService>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    checks.insert("sqlite", CheckStatus::from(service.catalog.ping().await));
    checks.insert(
        "disk",
        CheckStatus::from(service.disk.probe().await.map_err(StorageError::from)),
    );
    checks.insert("cache", CheckStatus::from(service.check_cache().await));

    let overall_ok = checks.values().all(|check| check.ok);
    if !overall_ok {
        tracing::warn!(?checks, "readiness check failed");
    }

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize, Debug)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl From<StorageResult<()>> for CheckStatus {
    fn from(result: StorageResult<()>) -> Self {
        match result {
            Ok(()) => CheckStatus {
                ok: true,
                error: None,
            },
            Err(err) => CheckStatus {
                ok: false,
                error: Some(err.to_string()),
            },
        }
    }
}
