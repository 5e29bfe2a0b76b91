//! Anonymous reads of objects under a bucket's public paths.

use crate::{
    errors::AppError,
    services::storage_service::{PublicObject, StorageService},
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use tokio_util::io::ReaderStream;
use tracing::debug;

const PUBLIC_CACHE_CONTROL: &str = "public, max-age=3600";

/// GET `/files/{bucket_name}/{*file_path}`
pub async fn serve_public_file(
    State(service): State<StorageService>,
    Path((bucket_name, file_path)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let origin = request_origin(&headers);
    let PublicObject {
        file,
        size,
        content_type,
        cors,
    } = service
        .public_object(&bucket_name, &file_path, origin)
        .await?;

    debug!(bucket = %bucket_name, key = %file_path, content_type, size, "serving public file");

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let out = response.headers_mut();
    out.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    out.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    out.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(PUBLIC_CACHE_CONTROL),
    );
    if let Some(cors) = cors {
        cors.apply(out);
    }
    Ok(response)
}

/// OPTIONS `/files/{bucket_name}/{*file_path}`: CORS preflight.
pub async fn preflight_public_file(
    State(service): State<StorageService>,
    Path((bucket_name, _file_path)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let cors = service
        .preflight(&bucket_name, request_origin(&headers))
        .await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    if let Some(cors) = cors {
        cors.apply(response.headers_mut());
    }
    Ok(response)
}

fn request_origin(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::ORIGIN).and_then(|v| v.to_str().ok())
}
