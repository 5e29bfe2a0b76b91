//! HTTP handlers for file tokens, transfers, listing and deletion.
//! Bodies are streamed from disk on download; uploads are handed to
//! `StorageService` as the multipart field stream.

use crate::{
    errors::AppError,
    models::{
        client::AuthenticatedClient,
        file::{DeleteFilesRequest, DeleteReport, FolderListing},
        token::{DownloadTokenRequest, SignedUrl, UploadReceipt, UploadTokenRequest},
    },
    services::storage_service::{Download, StorageService},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State, multipart::MultipartError},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::info;

/// `?token=` on the transfer endpoints.
#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    pub token: String,
}

/// `?path=` on the listing endpoint.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub path: String,
}

/// POST `/files/signed-url`: issue an upload token.
pub async fn issue_upload_url(
    State(service): State<StorageService>,
    client: AuthenticatedClient,
    Json(req): Json<UploadTokenRequest>,
) -> Result<(StatusCode, Json<SignedUrl>), AppError> {
    let signed = service.tokens.issue_upload(&req, &client).await?;
    Ok((StatusCode::CREATED, Json(signed)))
}

/// POST `/files/upload?token=`: receive the multipart field `file`.
pub async fn upload_file(
    State(service): State<StorageService>,
    Query(query): Query<TokenQuery>,
    mut multipart: Multipart,
) -> Result<Json<UploadReceipt>, AppError> {
    if query.token.is_empty() {
        return Err(AppError::bad_request("Missing upload token"));
    }

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some("file") {
            let receipt = service.upload(&query.token, field).await?;
            return Ok(Json(receipt));
        }
    }

    Err(AppError::bad_request("Missing file in upload"))
}

/// POST `/files/download-url`: issue a download token.
pub async fn issue_download_url(
    State(service): State<StorageService>,
    client: AuthenticatedClient,
    Json(req): Json<DownloadTokenRequest>,
) -> Result<(StatusCode, Json<SignedUrl>), AppError> {
    let signed = service.tokens.issue_download(&req, &client).await?;
    Ok((StatusCode::CREATED, Json(signed)))
}

/// GET `/files/download?token=`: stream the file as an attachment.
pub async fn download_file(
    State(service): State<StorageService>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, AppError> {
    if query.token.is_empty() {
        return Err(AppError::bad_request("Missing download token"));
    }

    let Download {
        payload,
        file,
        size,
    } = service.download(&query.token).await?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    set_download_headers(response.headers_mut(), &payload.mimetype, &payload.file_name, size);

    info!(file_id = %payload.file_id, size, "download started");
    Ok(response)
}

/// DELETE `/files`: bulk delete by ids or by folder path.
pub async fn delete_files(
    State(service): State<StorageService>,
    client: AuthenticatedClient,
    Json(req): Json<DeleteFilesRequest>,
) -> Result<Json<DeleteReport>, AppError> {
    let report = service.deleter.delete(&client, &req).await?;
    Ok(Json(report))
}

/// GET `/buckets/{id}/files?path=`: one level of a bucket.
pub async fn list_bucket_files(
    State(service): State<StorageService>,
    client: AuthenticatedClient,
    Path(bucket_id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> Result<Json<FolderListing>, AppError> {
    let listing = service.lister.list(&client, bucket_id, &query.path).await?;
    Ok(Json(listing))
}

fn multipart_error(err: MultipartError) -> AppError {
    AppError::new(err.status(), err.body_text())
}

fn set_download_headers(headers: &mut HeaderMap, mimetype: &str, file_name: &str, size: u64) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mimetype)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));

    let disposition = format!("attachment; filename=\"{}\"", sanitize_filename(file_name));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
}

/// Keep a file name safe inside a quoted header parameter.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_control() || !c.is_ascii() => '_',
            c => c,
        })
        .collect()
}
