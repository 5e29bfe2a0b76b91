//! src/services/catalog.rs
//!
//! Catalog: the SQLite-backed record store for clients, buckets and file
//! rows. Every query the rest of the service needs goes through here; nothing
//! in this file touches the object payloads on disk.

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite, types::Json};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    errors::{StorageError, StorageResult},
    models::{
        bucket::{Bucket, CorsRule},
        client::{AuthenticatedClient, Client, ClientCredentials},
        file::{FileLocation, FileRecord, FileSummary, NewFile},
    },
    services::{path_resolver, token_broker::random_hex},
};

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

const BUCKET_COLUMNS: &str =
    "id, name, client_id, cors_policy, public_paths, archived, created_at, updated_at";

const FILE_COLUMNS: &str = "id, file_name, file_size, mimetype, client_id, bucket_id, key, \
     owner_entity_type, owner_entity_id, etag, uploaded_at, created_at, updated_at, deleted_at";

const LOCATION_SELECT: &str = "SELECT f.id, f.file_name, f.mimetype, f.client_id, f.bucket_id, \
     f.key, f.uploaded_at, f.deleted_at, c.name AS client_name, b.name AS bucket_name, \
     b.archived AS bucket_archived \
     FROM files f \
     JOIN clients c ON f.client_id = c.client_id \
     JOIN buckets b ON f.bucket_id = b.id";

#[derive(Clone)]
pub struct Catalog {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

/// Apply the embedded schema. Statements are idempotent.
pub async fn run_migrations(db: &SqlitePool) -> StorageResult<()> {
    let statements = MIGRATION_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

/// SHA-256 of a client secret, hex encoded. Only the hash is stored.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

impl Catalog {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Cheap connectivity probe used by the readiness endpoint.
    pub async fn ping(&self) -> StorageResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }

    // --- clients ---

    /// Create a client with freshly generated credentials.
    ///
    /// Returns Conflict if the name is already taken, since the name doubles
    /// as the client's storage directory.
    pub async fn register_client(&self, name: &str) -> StorageResult<ClientCredentials> {
        path_resolver::ensure_client_name_safe(name)?;

        let client_id = format!("client_{}", random_hex(8));
        let client_secret = random_hex(32);
        let now = Utc::now();

        let client = sqlx::query_as::<_, Client>(
            "INSERT INTO clients (name, client_id, client_secret_hash, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id, name, client_id, created_at, updated_at",
        )
        .bind(name)
        .bind(&client_id)
        .bind(hash_secret(&client_secret))
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StorageError::conflict("A client with this name already exists")
            } else {
                StorageError::Sqlx(err)
            }
        })?;

        Ok(ClientCredentials {
            client,
            client_secret,
        })
    }

    pub async fn list_clients(&self) -> StorageResult<Vec<Client>> {
        Ok(sqlx::query_as::<_, Client>(
            "SELECT id, name, client_id, created_at, updated_at
             FROM clients ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&*self.db)
        .await?)
    }

    pub async fn get_client(&self, id: i64) -> StorageResult<Client> {
        sqlx::query_as::<_, Client>(
            "SELECT id, name, client_id, created_at, updated_at FROM clients WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StorageError::not_found("Client not found"))
    }

    /// Resolve Basic credentials to a client, or None if they do not match.
    pub async fn find_client_by_credentials(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> StorageResult<Option<AuthenticatedClient>> {
        Ok(sqlx::query_as::<_, AuthenticatedClient>(
            "SELECT id, client_id, name FROM clients
             WHERE client_id = ? AND client_secret_hash = ?",
        )
        .bind(client_id)
        .bind(hash_secret(client_secret))
        .fetch_optional(&*self.db)
        .await?)
    }

    pub async fn client_name(&self, client_id: &str) -> StorageResult<Option<String>> {
        Ok(
            sqlx::query_scalar::<_, String>("SELECT name FROM clients WHERE client_id = ?")
                .bind(client_id)
                .fetch_optional(&*self.db)
                .await?,
        )
    }

    // --- buckets ---

    pub async fn create_bucket(
        &self,
        client_id: &str,
        name: &str,
        cors_policy: &[CorsRule],
        public_paths: &[String],
    ) -> StorageResult<Bucket> {
        path_resolver::ensure_bucket_name_safe(name)?;
        let now = Utc::now();

        sqlx::query_as::<_, Bucket>(&format!(
            "INSERT INTO buckets (name, client_id, cors_policy, public_paths, archived, created_at, updated_at)
             VALUES (?, ?, ?, ?, 0, ?, ?)
             RETURNING {BUCKET_COLUMNS}"
        ))
        .bind(name)
        .bind(client_id)
        .bind(Json(cors_policy))
        .bind(Json(public_paths))
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StorageError::conflict("A bucket with this name already exists for your account")
            } else {
                StorageError::Sqlx(err)
            }
        })
    }

    pub async fn list_buckets(&self, client_id: &str) -> StorageResult<Vec<Bucket>> {
        Ok(sqlx::query_as::<_, Bucket>(&format!(
            "SELECT {BUCKET_COLUMNS} FROM buckets
             WHERE client_id = ? ORDER BY created_at DESC, id DESC"
        ))
        .bind(client_id)
        .fetch_all(&*self.db)
        .await?)
    }

    pub async fn get_bucket(&self, id: i64) -> StorageResult<Option<Bucket>> {
        Ok(
            sqlx::query_as::<_, Bucket>(&format!("SELECT {BUCKET_COLUMNS} FROM buckets WHERE id = ?"))
                .bind(id)
                .fetch_optional(&*self.db)
                .await?,
        )
    }

    /// Look a bucket up by name for public access.
    ///
    /// Names are only unique per client; live buckets are preferred over
    /// archived ones and the oldest wins among equals.
    pub async fn find_bucket_by_name(&self, name: &str) -> StorageResult<Option<Bucket>> {
        Ok(sqlx::query_as::<_, Bucket>(&format!(
            "SELECT {BUCKET_COLUMNS} FROM buckets
             WHERE name = ? ORDER BY archived ASC, id ASC LIMIT 1"
        ))
        .bind(name)
        .fetch_optional(&*self.db)
        .await?)
    }

    /// Fetch a bucket the caller may act on.
    ///
    /// NotFound if absent, Authorization if another client owns it, Conflict
    /// (with `archived_message`) if it has been archived.
    pub async fn require_active_bucket(
        &self,
        bucket_id: i64,
        client_id: &str,
        archived_message: &str,
    ) -> StorageResult<Bucket> {
        let bucket = self
            .get_bucket(bucket_id)
            .await?
            .ok_or_else(|| StorageError::not_found("Bucket not found"))?;

        if bucket.client_id != client_id {
            return Err(StorageError::authorization(
                "Access denied: bucket does not belong to your account",
            ));
        }
        if bucket.archived {
            return Err(StorageError::conflict(archived_message));
        }
        Ok(bucket)
    }

    /// Replace the CORS policy and/or public paths of a live bucket.
    pub async fn update_bucket(
        &self,
        bucket_id: i64,
        client_id: &str,
        cors_policy: Option<&[CorsRule]>,
        public_paths: Option<&[String]>,
    ) -> StorageResult<Bucket> {
        let current = self
            .require_active_bucket(bucket_id, client_id, "Cannot update an archived bucket")
            .await?;

        let cors_policy = cors_policy.unwrap_or(current.cors_policy.0.as_slice());
        let public_paths = public_paths.unwrap_or(current.public_paths.0.as_slice());

        sqlx::query_as::<_, Bucket>(&format!(
            "UPDATE buckets SET cors_policy = ?, public_paths = ?, updated_at = ?
             WHERE id = ? AND client_id = ? AND archived = 0
             RETURNING {BUCKET_COLUMNS}"
        ))
        .bind(Json(cors_policy))
        .bind(Json(public_paths))
        .bind(Utc::now())
        .bind(bucket_id)
        .bind(client_id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StorageError::conflict("Cannot update an archived bucket"))
    }

    /// Archive a bucket. Archiving is permanent.
    pub async fn archive_bucket(&self, bucket_id: i64, client_id: &str) -> StorageResult<Bucket> {
        self.require_active_bucket(bucket_id, client_id, "Bucket is already archived")
            .await?;

        sqlx::query_as::<_, Bucket>(&format!(
            "UPDATE buckets SET archived = 1, updated_at = ?
             WHERE id = ? AND client_id = ? AND archived = 0
             RETURNING {BUCKET_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(bucket_id)
        .bind(client_id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StorageError::conflict("Bucket is already archived"))
    }

    // --- files ---

    pub async fn insert_file(&self, file: NewFile<'_>) -> StorageResult<FileRecord> {
        let now = Utc::now();
        Ok(sqlx::query_as::<_, FileRecord>(&format!(
            "INSERT INTO files (
                id, file_name, file_size, mimetype, client_id, bucket_id, key,
                owner_entity_type, owner_entity_id, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {FILE_COLUMNS}"
        ))
        .bind(file.id)
        .bind(file.file_name)
        .bind(file.file_size)
        .bind(file.mimetype)
        .bind(file.client_id)
        .bind(file.bucket_id)
        .bind(file.key)
        .bind(file.owner_entity_type)
        .bind(file.owner_entity_id)
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await?)
    }

    pub async fn get_file(&self, id: &str) -> StorageResult<Option<FileRecord>> {
        Ok(
            sqlx::query_as::<_, FileRecord>(&format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?"))
                .bind(id)
                .fetch_optional(&*self.db)
                .await?,
        )
    }

    /// A file row joined with its client and bucket names, deleted or not.
    pub async fn file_location(&self, id: &str) -> StorageResult<Option<FileLocation>> {
        Ok(
            sqlx::query_as::<_, FileLocation>(&format!("{LOCATION_SELECT} WHERE f.id = ?"))
                .bind(id)
                .fetch_optional(&*self.db)
                .await?,
        )
    }

    /// Live rows of a bucket whose key starts with `prefix`, in key order.
    ///
    /// An empty prefix returns every live row with a non-empty key. The
    /// comparison is a case-sensitive `substr` rather than `LIKE`, so `%`, `_`
    /// and letter case in keys are taken literally.
    pub async fn list_files_with_prefix(
        &self,
        bucket_id: i64,
        prefix: &str,
    ) -> StorageResult<Vec<FileSummary>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, file_name, file_size, mimetype, key, created_at \
             FROM files WHERE bucket_id = ",
        );
        builder.push_bind(bucket_id);
        builder.push(" AND deleted_at IS NULL");
        push_prefix_filter(&mut builder, "key", prefix);
        builder.push(" ORDER BY key ASC, created_at ASC");

        Ok(builder.build_query_as().fetch_all(&*self.db).await?)
    }

    /// Live rows owned by `client_id` among `ids`. Unknown ids are skipped.
    pub async fn locate_files_by_ids(
        &self,
        client_id: &str,
        ids: &[String],
    ) -> StorageResult<Vec<FileLocation>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(LOCATION_SELECT);
        builder.push(" WHERE f.client_id = ");
        builder.push_bind(client_id);
        builder.push(" AND f.deleted_at IS NULL AND f.id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");

        Ok(builder.build_query_as().fetch_all(&*self.db).await?)
    }

    /// Live rows owned by `client_id` anywhere under `prefix` in a bucket.
    pub async fn locate_files_with_prefix(
        &self,
        client_id: &str,
        bucket_id: i64,
        prefix: &str,
    ) -> StorageResult<Vec<FileLocation>> {
        let mut builder = QueryBuilder::<Sqlite>::new(LOCATION_SELECT);
        builder.push(" WHERE f.bucket_id = ");
        builder.push_bind(bucket_id);
        builder.push(" AND f.client_id = ");
        builder.push_bind(client_id);
        builder.push(" AND f.deleted_at IS NULL");
        push_prefix_filter(&mut builder, "f.key", prefix);
        builder.push(" ORDER BY f.key ASC");

        Ok(builder.build_query_as().fetch_all(&*self.db).await?)
    }

    /// Set the tombstone on a live row. Returns false if it was already gone.
    pub async fn mark_deleted(&self, id: &str) -> StorageResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE files SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a finished upload and tombstone older completed rows that
    /// pointed at the same key, whose content has just been overwritten.
    ///
    /// Returns how many rows were superseded.
    pub async fn complete_upload(
        &self,
        id: &str,
        bucket_id: i64,
        key: &str,
        etag: &str,
    ) -> StorageResult<u64> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        sqlx::query("UPDATE files SET etag = ?, uploaded_at = ?, updated_at = ? WHERE id = ?")
            .bind(etag)
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let superseded = sqlx::query(
            "UPDATE files SET deleted_at = ?, updated_at = ?
             WHERE bucket_id = ? AND key = ? AND id <> ?
               AND deleted_at IS NULL AND uploaded_at IS NOT NULL",
        )
        .bind(now)
        .bind(now)
        .bind(bucket_id)
        .bind(key)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(superseded)
    }
}

/// Append `AND <column> starts with <prefix>`; an empty prefix only excludes empty keys.
fn push_prefix_filter(builder: &mut QueryBuilder<'_, Sqlite>, column: &str, prefix: &str) {
    if prefix.is_empty() {
        builder.push(format!(" AND {column} <> ''"));
    } else {
        builder.push(format!(" AND substr({column}, 1, length("));
        builder.push_bind(prefix.to_string());
        builder.push(")) = ");
        builder.push_bind(prefix.to_string());
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
