//! HTTP handlers for bucket management. Every route acts on the buckets of
//! the authenticated client only.

use crate::{
    errors::AppError,
    models::{
        bucket::{Bucket, CreateBucketRequest, UpdateBucketRequest},
        client::AuthenticatedClient,
    },
    services::storage_service::StorageService,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;

/// POST `/buckets`
pub async fn create_bucket(
    State(service): State<StorageService>,
    client: AuthenticatedClient,
    Json(req): Json<CreateBucketRequest>,
) -> Result<(StatusCode, Json<Bucket>), AppError> {
    let bucket = service
        .catalog
        .create_bucket(&client.client_id, &req.name, &req.cors_policy, &req.public_paths)
        .await?;
    info!(bucket_id = bucket.id, name = %bucket.name, client_id = %client.client_id, "bucket created");
    Ok((StatusCode::CREATED, Json(bucket)))
}

/// GET `/buckets`
pub async fn list_buckets(
    State(service): State<StorageService>,
    client: AuthenticatedClient,
) -> Result<Json<Vec<Bucket>>, AppError> {
    Ok(Json(service.catalog.list_buckets(&client.client_id).await?))
}

/// GET `/buckets/{id}`: archived buckets are still visible to their owner.
pub async fn get_bucket(
    State(service): State<StorageService>,
    client: AuthenticatedClient,
    Path(bucket_id): Path<i64>,
) -> Result<Json<Bucket>, AppError> {
    let bucket = service
        .catalog
        .get_bucket(bucket_id)
        .await?
        .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, "Bucket not found"))?;
    if bucket.client_id != client.client_id {
        return Err(AppError::new(
            StatusCode::FORBIDDEN,
            "Access denied: bucket does not belong to your account",
        ));
    }
    Ok(Json(bucket))
}

/// PUT `/buckets/{id}`: replace the CORS policy and/or public paths.
pub async fn update_bucket(
    State(service): State<StorageService>,
    client: AuthenticatedClient,
    Path(bucket_id): Path<i64>,
    Json(req): Json<UpdateBucketRequest>,
) -> Result<Json<Bucket>, AppError> {
    let bucket = service
        .catalog
        .update_bucket(
            bucket_id,
            &client.client_id,
            req.cors_policy.as_deref(),
            req.public_paths.as_deref(),
        )
        .await?;
    info!(bucket_id, client_id = %client.client_id, "bucket updated");
    Ok(Json(bucket))
}

/// POST `/buckets/{id}/archive`
pub async fn archive_bucket(
    State(service): State<StorageService>,
    client: AuthenticatedClient,
    Path(bucket_id): Path<i64>,
) -> Result<Json<Bucket>, AppError> {
    let bucket = service
        .catalog
        .archive_bucket(bucket_id, &client.client_id)
        .await?;
    info!(bucket_id, client_id = %client.client_id, "bucket archived");
    Ok(Json(bucket))
}
