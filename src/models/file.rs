//! Represents an object (file record) stored in a bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata row for an object.
///
/// The row is written when an upload token is issued, before any bytes
/// arrive; `uploaded_at` and `etag` are filled once the upload completes.
/// Content lives at `<client name>/<bucket name>/<key>` under the storage root.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FileRecord {
    pub id: String,
    pub file_name: String,

    /// Declared size ceiling from the upload request.
    pub file_size: i64,

    pub mimetype: String,
    pub client_id: String,
    pub bucket_id: i64,

    /// Client-chosen key; `/` separates virtual folders.
    pub key: String,

    pub owner_entity_type: String,
    pub owner_entity_id: String,

    /// MD5 of the stored content.
    pub etag: Option<String>,

    pub uploaded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Values needed to insert a new file record.
#[derive(Debug, Clone)]
pub struct NewFile<'a> {
    pub id: &'a str,
    pub file_name: &'a str,
    pub file_size: i64,
    pub mimetype: &'a str,
    pub client_id: &'a str,
    pub bucket_id: i64,
    pub key: &'a str,
    pub owner_entity_type: &'a str,
    pub owner_entity_id: &'a str,
}

/// A file record joined with the names that make up its storage path.
#[derive(Clone, FromRow, Debug)]
pub struct FileLocation {
    pub id: String,
    pub file_name: String,
    pub mimetype: String,
    pub client_id: String,
    pub bucket_id: i64,
    pub key: String,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub client_name: String,
    pub bucket_name: String,
    pub bucket_archived: bool,
}

/// One entry of a folder listing.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct FileSummary {
    pub id: String,
    pub file_name: String,
    pub file_size: i64,
    pub mimetype: String,
    pub key: String,
    pub created_at: DateTime<Utc>,
}

/// Result of listing one level of a bucket.
#[derive(Serialize, Debug)]
pub struct FolderListing {
    pub bucket_id: i64,
    pub path: String,
    pub files: Vec<FileSummary>,
    pub folders: Vec<String>,
}

/// Body of `DELETE /files`: either `file_ids`, or `bucket_id` plus `path`.
#[derive(Deserialize, Debug, Default)]
pub struct DeleteFilesRequest {
    #[serde(default)]
    pub file_ids: Vec<String>,
    pub bucket_id: Option<i64>,
    pub path: Option<String>,
}

/// Outcome of a bulk delete. Every requested id lands in exactly one list.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct DeleteReport {
    pub deleted: Vec<String>,
    pub missing: Vec<String>,
    pub failed: Vec<String>,
}
