//! Capability-token requests, payloads and responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Body of `POST /files/signed-url`.
///
/// Every field defaults so that a missing field surfaces as a validation
/// error naming it rather than as a JSON decoding failure.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct UploadTokenRequest {
    pub bucket_id: i64,
    pub key: String,
    pub file_name: String,
    pub file_size: i64,
    pub mimetype: String,
    pub owner_entity_type: String,
    pub owner_entity_id: String,
}

/// Body of `POST /files/download-url`.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct DownloadTokenRequest {
    pub file_id: String,
}

/// State captured for an upload token.
///
/// `file_path` is relative to the storage root and fixed at issuance.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UploadTokenPayload {
    pub file_id: String,
    pub file_name: String,
    /// Largest accepted body, in bytes.
    pub file_size: i64,
    pub mimetype: String,
    pub client_id: String,
    pub bucket_id: i64,
    pub key: String,
    pub file_path: PathBuf,
    pub owner_entity_type: String,
    pub owner_entity_id: String,
}

/// State captured for a download token.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DownloadTokenPayload {
    pub file_id: String,
    pub file_name: String,
    pub mimetype: String,
    pub client_id: String,
    pub bucket_id: i64,
    pub file_path: PathBuf,
}

/// Response of both token-issuing endpoints.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SignedUrl {
    pub file_id: String,
    pub signed_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Response of a completed upload.
#[derive(Serialize, Debug, Clone)]
pub struct UploadReceipt {
    pub file_id: String,
    pub file_name: String,
    /// Bytes actually written.
    pub file_size: u64,
    pub bucket_id: i64,
    pub saved_path: String,
}
