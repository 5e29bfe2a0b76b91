//! Represents an API client: the tenant that owns buckets and objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A registered client, as returned by the management API.
///
/// The secret is never part of this struct; it is only shown once, in
/// [`ClientCredentials`], when the client is created.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Client {
    /// Internal row id.
    pub id: i64,

    /// Display name; also the top-level storage directory for the client.
    pub name: String,

    /// External identifier used as the Basic auth user name.
    pub client_id: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A freshly created client together with its plaintext secret.
#[derive(Serialize, Debug)]
pub struct ClientCredentials {
    #[serde(flatten)]
    pub client: Client,
    pub client_secret: String,
}

/// Body of `POST /clients`.
#[derive(Deserialize, Debug, Default)]
pub struct CreateClientRequest {
    #[serde(default)]
    pub name: String,
}

/// The client resolved from a request's Basic credentials.
#[derive(Clone, Debug, FromRow)]
pub struct AuthenticatedClient {
    pub id: i64,
    pub client_id: String,
    pub name: String,
}
