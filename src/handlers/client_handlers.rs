//! HTTP handlers for client management, guarded by the admin token.

use crate::{
    errors::AppError,
    handlers::auth::AdminAuth,
    models::client::{Client, ClientCredentials, CreateClientRequest},
    services::storage_service::StorageService,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;

/// POST `/clients`: the secret is only ever returned here.
pub async fn create_client(
    State(service): State<StorageService>,
    _admin: AdminAuth,
    Json(req): Json<CreateClientRequest>,
) -> Result<(StatusCode, Json<ClientCredentials>), AppError> {
    let creds = service.catalog.register_client(&req.name).await?;
    info!(client_id = %creds.client.client_id, name = %creds.client.name, "client registered");
    Ok((StatusCode::CREATED, Json(creds)))
}

/// GET `/clients`
pub async fn list_clients(
    State(service): State<StorageService>,
    _admin: AdminAuth,
) -> Result<Json<Vec<Client>>, AppError> {
    Ok(Json(service.catalog.list_clients().await?))
}

/// GET `/clients/{id}`
pub async fn get_client(
    State(service): State<StorageService>,
    _admin: AdminAuth,
    Path(id): Path<i64>,
) -> Result<Json<Client>, AppError> {
    Ok(Json(service.catalog.get_client(id).await?))
}
