//! src/services/storage_service.rs
//!
//! StorageService: the object vault as seen by the HTTP layer. It owns the
//! catalog (SQLite metadata), the disk store (object payloads beneath
//! `base_path/<client>/<bucket>/<key>`) and the token cache, and wires them
//! into the broker, lister and deletion coordinator. Orchestration that spans
//! more than one of those (upload, download, public read) lives here.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, pin_mut, stream};
use sqlx::SqlitePool;
use std::{
    fmt,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::fs::File;
use tracing::{debug, info, warn};

use crate::{
    errors::{StorageError, StorageResult},
    models::token::{DownloadTokenPayload, UploadReceipt},
    services::{
        catalog::Catalog,
        cors::{self, CorsHeaders},
        deletion::DeletionCoordinator,
        disk::DiskStore,
        namespace::NamespaceLister,
        path_resolver,
        pattern_matcher::PatternMatcher,
        token_broker::{DEFAULT_TOKEN_TTL, TokenBroker, random_hex},
        token_cache::{CacheError, TokenCache},
    },
};

/// Runtime knobs the service needs after startup.
#[derive(Clone, Debug)]
pub struct ServiceSettings {
    /// Lifetime of upload and download tokens.
    pub token_ttl: Duration,
    /// Scheme and authority used when building signed URLs.
    pub public_base_url: String,
    /// Bearer token for client management; `None` disables those routes.
    pub admin_token: Option<String>,
    /// Request body ceiling for the upload route.
    pub max_upload_bytes: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            token_ttl: DEFAULT_TOKEN_TTL,
            public_base_url: "http://localhost:8080".to_string(),
            admin_token: None,
            max_upload_bytes: 100 * 1024 * 1024,
        }
    }
}

/// An object opened for a token download.
#[derive(Debug)]
pub struct Download {
    pub payload: DownloadTokenPayload,
    pub file: File,
    pub size: u64,
}

/// An object opened for an anonymous read.
#[derive(Debug)]
pub struct PublicObject {
    pub file: File,
    pub size: u64,
    pub content_type: &'static str,
    /// CORS headers for the request's origin, if any rule allows it.
    pub cors: Option<CorsHeaders>,
}

#[derive(Clone)]
pub struct StorageService {
    pub catalog: Catalog,
    pub disk: DiskStore,
    pub tokens: TokenBroker,
    pub lister: NamespaceLister,
    pub deleter: DeletionCoordinator,
    cache: Arc<dyn TokenCache>,
    settings: Arc<ServiceSettings>,
}

impl StorageService {
    /// Create a new StorageService backed by the provided SQLite pool, using
    /// `base_path` as the root directory for object payloads.
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        cache: Arc<dyn TokenCache>,
        settings: ServiceSettings,
    ) -> Self {
        let catalog = Catalog::new(db);
        let disk = DiskStore::new(base_path);
        let tokens = TokenBroker::new(
            catalog.clone(),
            disk.clone(),
            cache.clone(),
            settings.token_ttl,
            settings.public_base_url.clone(),
        );

        Self {
            lister: NamespaceLister::new(catalog.clone()),
            deleter: DeletionCoordinator::new(catalog.clone(), disk.clone()),
            catalog,
            disk,
            tokens,
            cache,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Receive the body for an upload token.
    ///
    /// The declared size is read from the token first and the body is
    /// buffered only up to that size; a larger body is rejected before
    /// anything touches the disk and the token stays usable. Otherwise the
    /// token is consumed, the bytes are written atomically and the record is
    /// marked complete. A failure after the token is consumed requires a new
    /// token.
    pub async fn upload<S, E>(&self, token: &str, body: S) -> StorageResult<UploadReceipt>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: fmt::Display,
    {
        let pending = self.tokens.peek_upload(token).await?;
        let ceiling = u64::try_from(pending.file_size).unwrap_or(0);

        let data = collect_within(body, ceiling).await?;
        let payload = self.tokens.redeem_upload(token, data.len() as u64).await?;

        let blob = self
            .disk
            .write_stream(&payload.file_path, stream::once(async move { Ok::<_, io::Error>(data) }))
            .await?;

        let superseded = self
            .catalog
            .complete_upload(&payload.file_id, payload.bucket_id, &payload.key, &blob.etag)
            .await?;

        info!(
            file_id = %payload.file_id,
            bucket_id = payload.bucket_id,
            size = blob.size,
            etag = %blob.etag,
            superseded,
            "upload stored"
        );

        Ok(UploadReceipt {
            file_id: payload.file_id,
            file_name: payload.file_name,
            file_size: blob.size,
            bucket_id: payload.bucket_id,
            saved_path: payload.file_path.to_string_lossy().into_owned(),
        })
    }

    /// Redeem a download token and open the object it points at.
    pub async fn download(&self, token: &str) -> StorageResult<Download> {
        let payload = self.tokens.redeem_download(token).await?;

        match self.disk.open(&payload.file_path).await {
            Ok((file, size)) => {
                debug!(file_id = %payload.file_id, size, "serving download");
                Ok(Download {
                    payload,
                    file,
                    size,
                })
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(file_id = %payload.file_id, "file vanished after download token was issued");
                Err(StorageError::gone("File has been deleted"))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Open `file_path` of the bucket named `bucket_name` for an anonymous read.
    ///
    /// Archived or unknown buckets, unsafe keys and missing files are all
    /// NotFound; a key outside the bucket's public paths is Authorization.
    pub async fn public_object(
        &self,
        bucket_name: &str,
        file_path: &str,
        origin: Option<&str>,
    ) -> StorageResult<PublicObject> {
        let bucket = self
            .catalog
            .find_bucket_by_name(bucket_name)
            .await?
            .filter(|bucket| !bucket.archived)
            .ok_or_else(|| StorageError::not_found("Bucket not found"))?;

        if !PatternMatcher::matches_any(file_path, &bucket.public_paths.0) {
            debug!(bucket = %bucket_name, key = %file_path, "key is not public");
            return Err(StorageError::authorization("File is not publicly accessible"));
        }

        let Some(client_name) = self.catalog.client_name(&bucket.client_id).await? else {
            warn!(bucket_id = bucket.id, client_id = %bucket.client_id, "bucket owner missing");
            return Err(StorageError::not_found("Bucket not found"));
        };

        if path_resolver::ensure_key_safe(file_path).is_err() {
            return Err(StorageError::not_found("File not found"));
        }

        let relative = path_resolver::resolve(&client_name, &bucket.name, file_path);
        let (file, size) = match self.disk.open(&relative).await {
            Ok(opened) => opened,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::not_found("File not found"));
            }
            Err(err) => return Err(err.into()),
        };

        Ok(PublicObject {
            file,
            size,
            content_type: content_type_for(file_path),
            cors: cors::resolve(origin, &bucket.cors_policy.0),
        })
    }

    /// CORS headers for a preflight against a public bucket.
    pub async fn preflight(
        &self,
        bucket_name: &str,
        origin: Option<&str>,
    ) -> StorageResult<Option<CorsHeaders>> {
        let bucket = self
            .catalog
            .find_bucket_by_name(bucket_name)
            .await?
            .filter(|bucket| !bucket.archived)
            .ok_or_else(|| StorageError::not_found("Bucket not found"))?;
        Ok(cors::resolve(origin, &bucket.cors_policy.0))
    }

    /// Round-trip a throwaway entry through the token cache.
    pub async fn check_cache(&self) -> StorageResult<()> {
        let key = format!("readyz:{}", random_hex(8));
        self.cache
            .set(&key, "ok".to_string(), Duration::from_secs(5))
            .await?;
        match self.cache.take(&key).await? {
            Some(value) if value == "ok" => Ok(()),
            _ => Err(CacheError::Unavailable("lost a fresh entry".to_string()).into()),
        }
    }

    /// Storage root, for log lines.
    pub fn base_path(&self) -> &Path {
        self.disk.root()
    }
}

/// Buffer a body, failing as soon as it grows past `ceiling` bytes.
async fn collect_within<S, E>(body: S, ceiling: u64) -> StorageResult<Bytes>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: fmt::Display,
{
    let mut buf = BytesMut::new();
    pin_mut!(body);
    while let Some(chunk) = body.next().await {
        let chunk = chunk
            .map_err(|err| StorageError::validation(format!("Failed to read upload: {err}")))?;
        if (buf.len() + chunk.len()) as u64 > ceiling {
            return Err(StorageError::validation("File size exceeds allowed limit"));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Content type served for a public key, from its extension.
pub fn content_type_for(key: &str) -> &'static str {
    let ext = Path::new(key)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{bucket::CorsRule, token::DownloadTokenRequest};
    use crate::services::test_support::{Fixture, body, token_of, upload_request};
    use tokio::{fs, io::AsyncReadExt};

    async fn read_all(mut file: File) -> Vec<u8> {
        let mut out = Vec::new();
        file.read_to_end(&mut out).await.unwrap();
        out
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("a/b/photo.JPG"), "image/jpeg");
        assert_eq!(content_type_for("x.svg"), "image/svg+xml");
        assert_eq!(content_type_for("notes.txt"), "text/plain");
        assert_eq!(content_type_for("archive.tar.gz"), "application/octet-stream");
        assert_eq!(content_type_for("README"), "application/octet-stream");
    }

    #[tokio::test]
    async fn upload_writes_file_and_completes_record() {
        let fx = Fixture::new().await;
        let acme = fx.client("acme").await;
        let bucket = fx.bucket(&acme, "photos", &[]).await;
        let signed = fx
            .tokens()
            .issue_upload(&upload_request(bucket.id, "albums/cat.jpg", 16), &acme)
            .await
            .unwrap();

        let receipt = fx
            .service
            .upload(&token_of(&signed), body(&[b"meow ", b"meow"]))
            .await
            .unwrap();
        assert_eq!(receipt.file_id, signed.file_id);
        assert_eq!(receipt.file_size, 9);
        assert_eq!(receipt.saved_path, "acme/photos/albums/cat.jpg");

        let stored = fs::read(fx.disk().absolute(Path::new("acme/photos/albums/cat.jpg")))
            .await
            .unwrap();
        assert_eq!(stored, b"meow meow");

        let row = fx.catalog().get_file(&signed.file_id).await.unwrap().unwrap();
        assert_eq!(row.etag, Some(format!("{:x}", md5::compute(b"meow meow"))));
        assert!(row.uploaded_at.is_some());

        assert!(matches!(
            fx.service.upload(&token_of(&signed), body(&[b"again"])).await,
            Err(StorageError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn oversized_upload_writes_nothing() {
        let fx = Fixture::new().await;
        let acme = fx.client("acme").await;
        let bucket = fx.bucket(&acme, "photos", &[]).await;
        let signed = fx
            .tokens()
            .issue_upload(&upload_request(bucket.id, "big.bin", 4), &acme)
            .await
            .unwrap();
        let token = token_of(&signed);

        assert!(matches!(
            fx.service.upload(&token, body(&[b"abc", b"de"])).await,
            Err(StorageError::Validation(_))
        ));
        assert!(!fx.disk().absolute(Path::new("acme/photos/big.bin")).exists());

        // the token survives a rejected body
        let receipt = fx.service.upload(&token, body(&[b"abcd"])).await.unwrap();
        assert_eq!(receipt.file_size, 4);
    }

    #[tokio::test]
    async fn reupload_supersedes_previous_record() {
        let fx = Fixture::new().await;
        let acme = fx.client("acme").await;
        let bucket = fx.bucket(&acme, "docs", &[]).await;
        let first = fx.put_object(&acme, &bucket, "a.txt", b"one").await;
        let second = fx.put_object(&acme, &bucket, "a.txt", b"two").await;

        let old = fx.catalog().get_file(&first).await.unwrap().unwrap();
        assert!(old.deleted_at.is_some());
        let listing = fx.service.lister.list(&acme, bucket.id, "").await.unwrap();
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].id, second);
    }

    #[tokio::test]
    async fn download_streams_content_once() {
        let fx = Fixture::new().await;
        let acme = fx.client("acme").await;
        let bucket = fx.bucket(&acme, "docs", &[]).await;
        let id = fx.put_object(&acme, &bucket, "r/report.pdf", b"%PDF").await;
        let signed = fx
            .tokens()
            .issue_download(&DownloadTokenRequest { file_id: id }, &acme)
            .await
            .unwrap();
        let token = token_of(&signed);

        let download = fx.service.download(&token).await.unwrap();
        assert_eq!(download.size, 4);
        assert_eq!(download.payload.mimetype, "application/octet-stream");
        assert_eq!(read_all(download.file).await, b"%PDF");

        assert!(matches!(
            fx.service.download(&token).await,
            Err(StorageError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn download_of_vanished_file_is_gone() {
        let fx = Fixture::new().await;
        let acme = fx.client("acme").await;
        let bucket = fx.bucket(&acme, "docs", &[]).await;
        let id = fx.put_object(&acme, &bucket, "a.txt", b"x").await;
        let signed = fx
            .tokens()
            .issue_download(&DownloadTokenRequest { file_id: id }, &acme)
            .await
            .unwrap();
        fs::remove_file(fx.disk().absolute(Path::new("acme/docs/a.txt")))
            .await
            .unwrap();

        assert!(matches!(
            fx.service.download(&token_of(&signed)).await,
            Err(StorageError::Gone(_))
        ));
    }

    #[tokio::test]
    async fn public_read_rules() {
        let fx = Fixture::new().await;
        let acme = fx.client("acme").await;
        let bucket = fx.bucket(&acme, "site", &["images/*"]).await;
        fx.put_object(&acme, &bucket, "images/logo.png", b"png").await;
        fx.put_object(&acme, &bucket, "private/key.txt", b"secret").await;

        let object = fx
            .service
            .public_object("site", "images/logo.png", None)
            .await
            .unwrap();
        assert_eq!(object.content_type, "image/png");
        assert_eq!(object.size, 3);
        assert!(object.cors.is_none());
        assert_eq!(read_all(object.file).await, b"png");

        assert!(matches!(
            fx.service.public_object("site", "private/key.txt", None).await,
            Err(StorageError::Authorization(_))
        ));
        assert!(matches!(
            fx.service.public_object("site", "images/missing.png", None).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            fx.service.public_object("site", "images/..", None).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            fx.service.public_object("nope", "images/logo.png", None).await,
            Err(StorageError::NotFound(_))
        ));

        fx.catalog()
            .archive_bucket(bucket.id, &acme.client_id)
            .await
            .unwrap();
        assert!(matches!(
            fx.service.public_object("site", "images/logo.png", None).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn public_read_attaches_cors() {
        let fx = Fixture::new().await;
        let acme = fx.client("acme").await;
        let rules = vec![CorsRule {
            allowed_origins: vec!["https://*.example.com".into()],
            allowed_methods: vec!["GET".into()],
            ..Default::default()
        }];
        let bucket = fx
            .catalog()
            .create_bucket(&acme.client_id, "site", &rules, &["*".to_string()])
            .await
            .unwrap();
        fx.put_object(&acme, &bucket, "index.html", b"<html>").await;

        let object = fx
            .service
            .public_object("site", "index.html", Some("https://www.example.com"))
            .await
            .unwrap();
        let cors = object.cors.unwrap();
        assert_eq!(cors.allow_origin, "https://www.example.com");
        assert_eq!(cors.allow_methods.as_deref(), Some("GET"));

        let preflight = fx
            .service
            .preflight("site", Some("https://evil.test"))
            .await
            .unwrap();
        assert!(preflight.is_none());
    }

    #[tokio::test]
    async fn cache_check_round_trips() {
        let fx = Fixture::new().await;
        fx.service.check_cache().await.unwrap();
        assert!(fx.cache.is_empty());
    }
}
