//! src/services/token_broker.rs
//!
//! TokenBroker: issues and redeems one-time capability tokens.
//!
//! A token is 32 random bytes, hex encoded. Issuing one validates the request
//! against the catalog, fixes the object's storage path and parks a typed
//! payload in the TTL cache under `upload:<token>` or `download:<token>`.
//! Redemption hands the payload back exactly once; an unknown, expired,
//! consumed or unreadable token all look the same to the caller.

use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use serde::{Serialize, de::DeserializeOwned};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    errors::{StorageError, StorageResult},
    models::{
        client::AuthenticatedClient,
        file::NewFile,
        token::{
            DownloadTokenPayload, DownloadTokenRequest, SignedUrl, UploadTokenPayload,
            UploadTokenRequest,
        },
    },
    services::{catalog::Catalog, disk::DiskStore, path_resolver, token_cache::TokenCache},
};

/// Random bytes per token; the hex form is twice as long.
pub const TOKEN_BYTES: usize = 32;

/// Default token lifetime.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

/// Hex string built from `n_bytes` of OS randomness.
pub fn random_hex(n_bytes: usize) -> String {
    let mut buf = vec![0u8; n_bytes];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// First characters of a token, for log lines.
fn token_hint(token: &str) -> String {
    let mut hint: String = token.chars().take(8).collect();
    hint.push_str("...");
    hint
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Upload,
    Download,
}

impl TokenKind {
    fn namespace(self) -> &'static str {
        match self {
            TokenKind::Upload => "upload",
            TokenKind::Download => "download",
        }
    }

    fn cache_key(self, token: &str) -> String {
        format!("{}:{}", self.namespace(), token)
    }

    fn endpoint(self) -> &'static str {
        match self {
            TokenKind::Upload => "/files/upload",
            TokenKind::Download => "/files/download",
        }
    }

    fn invalid(self) -> StorageError {
        StorageError::authentication(format!("Invalid or expired {} token", self.namespace()))
    }
}

#[derive(Clone)]
pub struct TokenBroker {
    catalog: Catalog,
    disk: DiskStore,
    cache: Arc<dyn TokenCache>,
    ttl: Duration,
    public_base_url: String,
}

impl TokenBroker {
    pub fn new(
        catalog: Catalog,
        disk: DiskStore,
        cache: Arc<dyn TokenCache>,
        ttl: Duration,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            disk,
            cache,
            ttl,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Issue an upload token.
    ///
    /// Fields are checked in a fixed order so the error always names the
    /// first offending one. The file row is written before the token is
    /// cached; nothing is cached if any check fails.
    pub async fn issue_upload(
        &self,
        req: &UploadTokenRequest,
        client: &AuthenticatedClient,
    ) -> StorageResult<SignedUrl> {
        validate_upload_request(req)?;

        let bucket = self
            .catalog
            .require_active_bucket(
                req.bucket_id,
                &client.client_id,
                "Cannot upload to an archived bucket",
            )
            .await?;

        let file_id = Uuid::new_v4().to_string();
        let file_path = path_resolver::resolve(&client.name, &bucket.name, &req.key);

        self.catalog
            .insert_file(NewFile {
                id: &file_id,
                file_name: &req.file_name,
                file_size: req.file_size,
                mimetype: &req.mimetype,
                client_id: &client.client_id,
                bucket_id: bucket.id,
                key: &req.key,
                owner_entity_type: &req.owner_entity_type,
                owner_entity_id: &req.owner_entity_id,
            })
            .await?;

        let payload = UploadTokenPayload {
            file_id: file_id.clone(),
            file_name: req.file_name.clone(),
            file_size: req.file_size,
            mimetype: req.mimetype.clone(),
            client_id: client.client_id.clone(),
            bucket_id: bucket.id,
            key: req.key.clone(),
            file_path,
            owner_entity_type: req.owner_entity_type.clone(),
            owner_entity_id: req.owner_entity_id.clone(),
        };

        let signed = self.issue(TokenKind::Upload, &file_id, &payload).await?;
        info!(
            file_id = %file_id,
            client_id = %client.client_id,
            bucket_id = bucket.id,
            key = %req.key,
            "upload token issued"
        );
        Ok(signed)
    }

    /// Issue a download token for an existing, live object owned by `client`.
    pub async fn issue_download(
        &self,
        req: &DownloadTokenRequest,
        client: &AuthenticatedClient,
    ) -> StorageResult<SignedUrl> {
        if req.file_id.trim().is_empty() {
            return Err(StorageError::validation("file_id is required"));
        }

        let location = self
            .catalog
            .file_location(&req.file_id)
            .await?
            .ok_or_else(|| StorageError::not_found("File not found"))?;

        if location.deleted_at.is_some() {
            return Err(StorageError::gone("File has been deleted"));
        }
        if location.client_id != client.client_id {
            warn!(
                file_id = %location.id,
                requesting_client = %client.client_id,
                "download token refused: file belongs to another client"
            );
            return Err(StorageError::authorization("Access denied"));
        }
        if location.bucket_archived {
            return Err(StorageError::conflict(
                "Cannot download from an archived bucket",
            ));
        }

        let file_path =
            path_resolver::resolve(&location.client_name, &location.bucket_name, &location.key);
        if !self.disk.file_exists(&file_path).await? {
            warn!(file_id = %location.id, path = %file_path.display(), "file missing on disk");
            return Err(StorageError::gone("File has been deleted"));
        }

        let payload = DownloadTokenPayload {
            file_id: location.id.clone(),
            file_name: location.file_name,
            mimetype: location.mimetype,
            client_id: client.client_id.clone(),
            bucket_id: location.bucket_id,
            file_path,
        };

        let signed = self
            .issue(TokenKind::Download, &location.id, &payload)
            .await?;
        info!(
            file_id = %location.id,
            client_id = %client.client_id,
            bucket_id = location.bucket_id,
            "download token issued"
        );
        Ok(signed)
    }

    /// Read an upload payload without consuming the token.
    ///
    /// Used to learn the size ceiling before the body is read.
    pub async fn peek_upload(&self, token: &str) -> StorageResult<UploadTokenPayload> {
        self.load(TokenKind::Upload, token, false).await
    }

    /// Redeem an upload token for a body of `received` bytes.
    ///
    /// A body above the declared ceiling is rejected and the token stays
    /// valid, so a correctly sized retry can still use it. Otherwise the
    /// token is consumed atomically: of two concurrent redemptions only one
    /// gets the payload.
    pub async fn redeem_upload(
        &self,
        token: &str,
        received: u64,
    ) -> StorageResult<UploadTokenPayload> {
        let payload: UploadTokenPayload = self.load(TokenKind::Upload, token, false).await?;

        let ceiling = u64::try_from(payload.file_size).unwrap_or(0);
        if received > ceiling {
            info!(
                file_id = %payload.file_id,
                received,
                ceiling,
                "upload rejected: body exceeds declared size"
            );
            return Err(StorageError::validation("File size exceeds allowed limit"));
        }

        self.load(TokenKind::Upload, token, true).await
    }

    /// Redeem a download token. The token is consumed on success.
    pub async fn redeem_download(&self, token: &str) -> StorageResult<DownloadTokenPayload> {
        self.load(TokenKind::Download, token, true).await
    }

    async fn issue<T: Serialize>(
        &self,
        kind: TokenKind,
        file_id: &str,
        payload: &T,
    ) -> StorageResult<SignedUrl> {
        let token = random_hex(TOKEN_BYTES);
        let encoded = serde_json::to_string(payload)?;

        self.cache
            .set(&kind.cache_key(&token), encoded, self.ttl)
            .await?;

        let expires_at = chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Ok(SignedUrl {
            file_id: file_id.to_string(),
            signed_url: format!("{}{}?token={}", self.public_base_url, kind.endpoint(), token),
            expires_at,
        })
    }

    async fn load<T: DeserializeOwned>(
        &self,
        kind: TokenKind,
        token: &str,
        consume: bool,
    ) -> StorageResult<T> {
        if token.is_empty() {
            return Err(kind.invalid());
        }
        let key = kind.cache_key(token);
        let raw = if consume {
            self.cache.take(&key).await?
        } else {
            self.cache.get(&key).await?
        };

        let Some(raw) = raw else {
            debug!(token = %token_hint(token), kind = kind.namespace(), "token miss");
            return Err(kind.invalid());
        };

        match serde_json::from_str::<T>(&raw) {
            Ok(payload) => Ok(payload),
            Err(err) => {
                warn!(
                    token = %token_hint(token),
                    error = %err,
                    "discarding unreadable token payload"
                );
                if !consume {
                    self.cache.delete(&key).await?;
                }
                Err(kind.invalid())
            }
        }
    }
}

fn validate_upload_request(req: &UploadTokenRequest) -> StorageResult<()> {
    if req.bucket_id <= 0 {
        return Err(StorageError::validation(
            "bucket_id is required and must be a positive integer",
        ));
    }
    path_resolver::ensure_key_safe(&req.key)?;
    if req.file_name.trim().is_empty() {
        return Err(StorageError::validation("file_name is required"));
    }
    if req.file_size <= 0 {
        return Err(StorageError::validation("file_size must be greater than 0"));
    }
    if req.mimetype.trim().is_empty() {
        return Err(StorageError::validation("mimetype is required"));
    }
    if req.owner_entity_type.trim().is_empty() {
        return Err(StorageError::validation("owner_entity_type is required"));
    }
    if req.owner_entity_id.trim().is_empty() {
        return Err(StorageError::validation("owner_entity_id is required"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{Fixture, token_of, upload_request};
    use std::path::PathBuf;
    use tokio::fs;

    fn message(err: StorageError) -> String {
        match err {
            StorageError::Validation(msg) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn random_hex_has_expected_shape() {
        let token = random_hex(TOKEN_BYTES);
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, random_hex(TOKEN_BYTES));
    }

    #[test]
    fn validation_order_names_first_bad_field() {
        let empty = UploadTokenRequest::default();
        assert!(message(validate_upload_request(&empty).unwrap_err()).contains("bucket_id"));

        let mut req = UploadTokenRequest {
            bucket_id: 1,
            ..Default::default()
        };
        assert_eq!(message(validate_upload_request(&req).unwrap_err()), "key is required");

        req.key = "docs/a.pdf".into();
        assert!(message(validate_upload_request(&req).unwrap_err()).contains("file_name"));
        req.file_name = "a.pdf".into();
        assert!(message(validate_upload_request(&req).unwrap_err()).contains("file_size"));
        req.file_size = 10;
        assert!(message(validate_upload_request(&req).unwrap_err()).contains("mimetype"));
        req.mimetype = "application/pdf".into();
        assert!(message(validate_upload_request(&req).unwrap_err()).contains("owner_entity_type"));
        req.owner_entity_type = "user".into();
        assert!(message(validate_upload_request(&req).unwrap_err()).contains("owner_entity_id"));
        req.owner_entity_id = "42".into();
        assert!(validate_upload_request(&req).is_ok());

        req.key = "../../etc/passwd".into();
        assert!(message(validate_upload_request(&req).unwrap_err()).starts_with("key is invalid"));
    }

    #[tokio::test]
    async fn upload_token_carries_resolved_path() {
        let fx = Fixture::new().await;
        let acme = fx.client("acme").await;
        let bucket = fx.bucket(&acme, "photos", &[]).await;

        let signed = fx
            .tokens()
            .issue_upload(&upload_request(bucket.id, "invoices/2024/r.pdf", 100), &acme)
            .await
            .unwrap();
        assert!(signed.signed_url.starts_with("http://localhost:8080/files/upload?token="));
        assert!(signed.expires_at > Utc::now());

        let token = token_of(&signed);
        assert_eq!(token.len(), 64);

        let payload = fx.tokens().redeem_upload(&token, 100).await.unwrap();
        assert_eq!(payload.file_id, signed.file_id);
        assert_eq!(payload.file_path, PathBuf::from("acme/photos/invoices/2024/r.pdf"));
        assert_eq!(payload.bucket_id, bucket.id);

        let row = fx.catalog().get_file(&signed.file_id).await.unwrap().unwrap();
        assert_eq!(row.key, "invoices/2024/r.pdf");
        assert_eq!(row.file_size, 100);
        assert!(row.uploaded_at.is_none());
    }

    #[tokio::test]
    async fn redeemed_token_cannot_be_reused() {
        let fx = Fixture::new().await;
        let acme = fx.client("acme").await;
        let bucket = fx.bucket(&acme, "photos", &[]).await;
        let signed = fx
            .tokens()
            .issue_upload(&upload_request(bucket.id, "a.jpg", 10), &acme)
            .await
            .unwrap();
        let token = token_of(&signed);

        fx.tokens().redeem_upload(&token, 10).await.unwrap();
        assert!(matches!(
            fx.tokens().redeem_upload(&token, 10).await,
            Err(StorageError::Authentication(_))
        ));
        assert!(fx.cache.is_empty());
    }

    #[tokio::test]
    async fn oversized_redemption_keeps_token() {
        let fx = Fixture::new().await;
        let acme = fx.client("acme").await;
        let bucket = fx.bucket(&acme, "photos", &[]).await;
        let signed = fx
            .tokens()
            .issue_upload(&upload_request(bucket.id, "a.jpg", 10), &acme)
            .await
            .unwrap();
        let token = token_of(&signed);

        assert!(matches!(
            fx.tokens().redeem_upload(&token, 11).await,
            Err(StorageError::Validation(_))
        ));
        assert!(fx.tokens().redeem_upload(&token, 9).await.is_ok());
    }

    #[tokio::test]
    async fn archived_bucket_conflicts_before_cache_write() {
        let fx = Fixture::new().await;
        let acme = fx.client("acme").await;
        let bucket = fx.bucket(&acme, "photos", &[]).await;
        fx.catalog()
            .archive_bucket(bucket.id, &acme.client_id)
            .await
            .unwrap();

        let res = fx
            .tokens()
            .issue_upload(&upload_request(bucket.id, "a.jpg", 10), &acme)
            .await;
        assert!(matches!(res, Err(StorageError::Conflict(_))));
        assert!(fx.cache.is_empty());
        assert!(
            fx.catalog()
                .list_files_with_prefix(bucket.id, "")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn bucket_checks() {
        let fx = Fixture::new().await;
        let acme = fx.client("acme").await;
        let intruder = fx.client("intruder").await;
        let bucket = fx.bucket(&acme, "photos", &[]).await;

        assert!(matches!(
            fx.tokens()
                .issue_upload(&upload_request(bucket.id + 100, "a.jpg", 10), &acme)
                .await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            fx.tokens()
                .issue_upload(&upload_request(bucket.id, "a.jpg", 10), &intruder)
                .await,
            Err(StorageError::Authorization(_))
        ));
        assert!(fx.cache.is_empty());
    }

    #[tokio::test]
    async fn unknown_and_garbled_tokens_are_authentication_errors() {
        let fx = Fixture::new().await;
        assert!(matches!(
            fx.tokens().redeem_download("deadbeef").await,
            Err(StorageError::Authentication(_))
        ));
        assert!(matches!(
            fx.tokens().redeem_upload("", 1).await,
            Err(StorageError::Authentication(_))
        ));

        fx.cache
            .set("download:garbled", "{not json".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(matches!(
            fx.tokens().redeem_download("garbled").await,
            Err(StorageError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn upload_token_is_not_a_download_token() {
        let fx = Fixture::new().await;
        let acme = fx.client("acme").await;
        let bucket = fx.bucket(&acme, "photos", &[]).await;
        let signed = fx
            .tokens()
            .issue_upload(&upload_request(bucket.id, "a.jpg", 10), &acme)
            .await
            .unwrap();
        assert!(matches!(
            fx.tokens().redeem_download(&token_of(&signed)).await,
            Err(StorageError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn expired_tokens_are_rejected() {
        let fx = Fixture::with_ttl(Duration::from_millis(20)).await;
        let acme = fx.client("acme").await;
        let bucket = fx.bucket(&acme, "photos", &[]).await;
        let signed = fx
            .tokens()
            .issue_upload(&upload_request(bucket.id, "a.jpg", 10), &acme)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(
            fx.tokens().redeem_upload(&token_of(&signed), 10).await,
            Err(StorageError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn download_token_lifecycle() {
        let fx = Fixture::new().await;
        let acme = fx.client("acme").await;
        let bucket = fx.bucket(&acme, "photos", &[]).await;
        let file_id = fx.put_object(&acme, &bucket, "albums/cat.jpg", b"meow").await;

        let signed = fx
            .tokens()
            .issue_download(&DownloadTokenRequest { file_id: file_id.clone() }, &acme)
            .await
            .unwrap();
        assert!(signed.signed_url.contains("/files/download?token="));

        let token = token_of(&signed);
        let payload = fx.tokens().redeem_download(&token).await.unwrap();
        assert_eq!(payload.file_path, PathBuf::from("acme/photos/albums/cat.jpg"));
        assert_eq!(payload.file_name, "cat.jpg");
        assert!(matches!(
            fx.tokens().redeem_download(&token).await,
            Err(StorageError::Authentication(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_redemptions_have_one_winner() {
        let fx = Fixture::new().await;
        let acme = fx.client("acme").await;
        let bucket = fx.bucket(&acme, "photos", &[]).await;
        let file_id = fx.put_object(&acme, &bucket, "cat.jpg", b"meow").await;

        let signed = fx
            .tokens()
            .issue_download(&DownloadTokenRequest { file_id }, &acme)
            .await
            .unwrap();
        let token = token_of(&signed);

        let (first, second) = tokio::join!(
            fx.tokens().redeem_download(&token),
            fx.tokens().redeem_download(&token)
        );
        let wins = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        assert!(
            [first, second]
                .into_iter()
                .any(|r| matches!(r, Err(StorageError::Authentication(_))))
        );

        let signed = fx
            .tokens()
            .issue_upload(&upload_request(bucket.id, "dog.jpg", 4), &acme)
            .await
            .unwrap();
        let token = token_of(&signed);
        let (first, second) = tokio::join!(
            fx.tokens().redeem_upload(&token, 4),
            fx.tokens().redeem_upload(&token, 4)
        );
        assert_eq!(usize::from(first.is_ok()) + usize::from(second.is_ok()), 1);
    }

    #[tokio::test]
    async fn download_issue_checks() {
        let fx = Fixture::new().await;
        let acme = fx.client("acme").await;
        let intruder = fx.client("intruder").await;
        let bucket = fx.bucket(&acme, "photos", &[]).await;
        let file_id = fx.put_object(&acme, &bucket, "cat.jpg", b"meow").await;
        let req = DownloadTokenRequest { file_id: file_id.clone() };

        assert!(matches!(
            fx.tokens()
                .issue_download(&DownloadTokenRequest::default(), &acme)
                .await,
            Err(StorageError::Validation(_))
        ));
        assert!(matches!(
            fx.tokens()
                .issue_download(&DownloadTokenRequest { file_id: "missing".into() }, &acme)
                .await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            fx.tokens().issue_download(&req, &intruder).await,
            Err(StorageError::Authorization(_))
        ));

        // metadata without content counts as deleted
        fs::remove_file(fx.disk().absolute(&PathBuf::from("acme/photos/cat.jpg")))
            .await
            .unwrap();
        assert!(matches!(
            fx.tokens().issue_download(&req, &acme).await,
            Err(StorageError::Gone(_))
        ));

        fx.catalog().mark_deleted(&file_id).await.unwrap();
        assert!(matches!(
            fx.tokens().issue_download(&req, &acme).await,
            Err(StorageError::Gone(_))
        ));
    }
}
