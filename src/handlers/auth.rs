//! Request authentication.
//!
//! - Client routes use HTTP Basic with `client_id:client_secret`.
//! - Client management uses a static Bearer token from configuration.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, StatusCode, header, request::Parts},
};
use base64::{Engine as _, engine::general_purpose};
use tracing::debug;

use crate::{
    errors::AppError, models::client::AuthenticatedClient,
    services::storage_service::StorageService,
};

impl FromRequestParts<StorageService> for AuthenticatedClient {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        service: &StorageService,
    ) -> Result<Self, Self::Rejection> {
        let (client_id, client_secret) = basic_credentials(&parts.headers)
            .ok_or_else(|| AppError::unauthorized("Missing or invalid authorization header"))?;

        match service
            .catalog
            .find_client_by_credentials(&client_id, &client_secret)
            .await?
        {
            Some(client) => Ok(client),
            None => {
                debug!(client_id = %client_id, "rejected client credentials");
                Err(AppError::unauthorized("Invalid client credentials"))
            }
        }
    }
}

/// Marker extractor for routes guarded by the admin token.
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

impl FromRequestParts<StorageService> for AdminAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        service: &StorageService,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = service.settings().admin_token.as_deref() else {
            return Err(AppError::new(
                StatusCode::FORBIDDEN,
                "Client management is disabled",
            ));
        };

        match bearer_token(&parts.headers) {
            Some(token) if token == expected => Ok(AdminAuth),
            Some(_) => Err(AppError::unauthorized("Invalid admin token")),
            None => Err(AppError::unauthorized("Missing or invalid authorization header")),
        }
    }
}

/// Decode `Authorization: Basic base64(id:secret)`.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?.trim();
    let decoded = general_purpose::STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    if id.is_empty() || secret.is_empty() {
        return None;
    }
    Some((id.to_string(), secret.to_string()))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}
