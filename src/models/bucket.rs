//! Represents a logical bucket: a named container of objects owned by one client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};

/// A single CORS rule. Field names follow the S3 bucket CORS document.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct CorsRule {
    #[serde(rename = "AllowedHeaders", default)]
    pub allowed_headers: Vec<String>,
    #[serde(rename = "AllowedMethods", default)]
    pub allowed_methods: Vec<String>,
    #[serde(rename = "AllowedOrigins", default)]
    pub allowed_origins: Vec<String>,
    #[serde(rename = "ExposeHeaders", default)]
    pub expose_headers: Vec<String>,
}

/// A storage bucket.
///
/// The name is unique per client, not globally. Archiving is one-way: an
/// archived bucket accepts no new uploads, downloads, listings or deletions
/// and is hidden from public reads.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    pub id: i64,

    pub name: String,

    /// External id of the owning client.
    pub client_id: String,

    /// Ordered CORS rules; the first rule whose origins match wins.
    pub cors_policy: Json<Vec<CorsRule>>,

    /// Glob patterns of keys that may be read without credentials.
    pub public_paths: Json<Vec<String>>,

    pub archived: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `POST /buckets`.
#[derive(Deserialize, Debug, Default)]
pub struct CreateBucketRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cors_policy: Vec<CorsRule>,
    #[serde(default)]
    pub public_paths: Vec<String>,
}

/// Body of `PUT /buckets/{id}`. Omitted fields keep their current value.
#[derive(Deserialize, Debug, Default)]
pub struct UpdateBucketRequest {
    pub cors_policy: Option<Vec<CorsRule>>,
    pub public_paths: Option<Vec<String>>,
}
