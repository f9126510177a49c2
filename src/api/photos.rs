//! Photo library endpoints
//!
//! Uploads and photo previews are base64 bodies decoded as they arrive; the
//! rest is JSON.

use std::io::Write;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use utoipa::ToSchema;

use super::{
    content_length, read_json, run_blocking, AppState, Status, StatusKind, PATCH_BODY_LIMIT,
    READ_BUFFER_SIZE,
};
use crate::base64_stream::{decoded_capacity, DecodeError, StreamDecoder};
use crate::error::AppError;
use crate::photos::{LibraryError, PhotoEntry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PhotoItem {
    pub filename: String,
    pub hidden: bool,
}

impl From<PhotoEntry> for PhotoItem {
    fn from(entry: PhotoEntry) -> Self {
        Self {
            filename: entry.filename,
            hidden: entry.hidden,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PhotoList {
    pub data: Vec<PhotoItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    pub filename: String,
    pub status: StatusKind,
}

/// List photos in storage order
#[utoipa::path(
    get,
    path = "/api/v1/photos",
    tag = "Photos",
    responses(
        (status = 200, description = "All photos, hidden ones included", body = PhotoList),
        (status = 500, description = "Storage unreadable", body = Status)
    )
)]
pub async fn list_photos(State(state): State<AppState>) -> Result<Json<PhotoList>, AppError> {
    let _gate = state.gate.lock().await;
    let data = state.library.list()?.map(PhotoItem::from).collect();
    Ok(Json(PhotoList { data }))
}

/// Hide or show photos
///
/// Entries are applied in order and not rolled back; the response reports
/// the most severe failure.
#[utoipa::path(
    patch,
    path = "/api/v1/photos",
    tag = "Photos",
    request_body = PhotoList,
    responses(
        (status = 200, description = "All entries applied", body = Status),
        (status = 400, description = "Body too long or invalid JSON", body = Status),
        (status = 404, description = "A photo was not found", body = Status),
        (status = 500, description = "A rename failed", body = Status)
    )
)]
pub async fn patch_photos(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<Status>, AppError> {
    let request: PhotoList = read_json(&headers, body, PATCH_BODY_LIMIT).await?;

    let _gate = state.gate.lock().await;

    let mut failure: Option<AppError> = None;
    for item in &request.data {
        if let Err(e) = state.library.set_hidden(&item.filename, item.hidden) {
            let e = AppError::from(e);
            tracing::warn!("Failed to set {} hidden={}: {}", item.filename, item.hidden, e);
            let worse = failure
                .as_ref()
                .map_or(true, |f| e.status().as_u16() > f.status().as_u16());
            if worse {
                failure = Some(e);
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(Json(Status::ok())),
    }
}

/// Raw bitmap bytes
#[utoipa::path(
    get,
    path = "/api/v1/photos/{name}",
    tag = "Photos",
    params(
        ("name" = String, Path, description = "Photo file name, without the hidden marker")
    ),
    responses(
        (status = 200, description = "Bitmap", content_type = "image/bmp"),
        (status = 400, description = "Invalid name", body = Status),
        (status = 404, description = "Photo not found", body = Status)
    )
)]
pub async fn get_photo(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let _gate = state.gate.lock().await;
    let library = state.library.clone();
    let (bytes, hidden) = run_blocking(move || library.read(&name)).await?;

    let mut response = (StatusCode::OK, [(header::CONTENT_TYPE, "image/bmp")], bytes).into_response();
    if !hidden {
        response.headers_mut().insert(
            header::CACHE_CONTROL,
            header::HeaderValue::from_static("public, max-age=31536000, immutable"),
        );
    }
    Ok(response)
}

/// Delete a photo in either visibility state
#[utoipa::path(
    delete,
    path = "/api/v1/photos/{name}",
    tag = "Photos",
    params(
        ("name" = String, Path, description = "Photo file name, without the hidden marker")
    ),
    responses(
        (status = 200, description = "Deleted", body = Status),
        (status = 400, description = "Invalid name", body = Status),
        (status = 404, description = "Photo not found", body = Status)
    )
)]
pub async fn delete_photo(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Status>, AppError> {
    let _gate = state.gate.lock().await;
    state.library.delete(&name)?;
    Ok(Json(Status::ok()))
}

/// Upload a base64 encoded bitmap
///
/// The photo is named after the upload time in epoch seconds.
#[utoipa::path(
    post,
    path = "/api/v1/photos",
    tag = "Photos",
    request_body(content = String, content_type = "text/plain", description = "Base64 encoded BMP"),
    responses(
        (status = 200, description = "Stored", body = UploadResponse),
        (status = 400, description = "Missing or bad length, or malformed base64", body = Status),
        (status = 500, description = "Write failed", body = Status)
    )
)]
pub async fn upload_photo(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<UploadResponse>, AppError> {
    let len = declared_length(&headers, state.config.max_upload_bytes)?;

    let _gate = state.gate.lock().await;
    let library = state.library.clone();
    let now = state.clock.now_secs();
    let (filename, file) = run_blocking(move || library.create(now)).await?;
    let mut file = tokio::fs::File::from_std(file);

    // Each network frame is decoded in memory, then handed to the file
    let mut decoder = StreamDecoder::new(len, Vec::with_capacity(decoded_capacity(READ_BUFFER_SIZE)))?;
    let mut stream = body.into_data_stream();
    while let Some(frame) = stream.next().await {
        let frame = frame.map_err(|e| AppError::Receive(e.to_string()))?;
        push_frame(&mut decoder, &frame)?;
        file.write_all(decoder.sink_mut()).await.map_err(LibraryError::from)?;
        decoder.sink_mut().clear();
    }
    let written = decoder.written();
    let tail = decoder.finish()?;

    file.write_all(&tail).await.map_err(LibraryError::from)?;
    file.flush().await.map_err(LibraryError::from)?;
    file.sync_all().await.map_err(LibraryError::from)?;

    tracing::info!("Uploaded {} ({} bytes)", filename, written);
    Ok(Json(UploadResponse {
        filename,
        status: StatusKind::Ok,
    }))
}

/// Render a base64 encoded bitmap without storing it
#[utoipa::path(
    post,
    path = "/api/v1/photos/preview",
    tag = "Photos",
    request_body(content = String, content_type = "text/plain", description = "Base64 encoded BMP"),
    responses(
        (status = 200, description = "Preview rendered", body = Status),
        (status = 400, description = "Missing or bad length, malformed base64 or bitmap", body = Status),
        (status = 500, description = "Render failed", body = Status)
    )
)]
pub async fn preview_photo(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<Status>, AppError> {
    let len = declared_length(&headers, state.config.max_upload_bytes)?;

    let mut decoder = StreamDecoder::new(len, Vec::with_capacity(decoded_capacity(len)))?;
    feed(body, &mut decoder).await?;
    let bytes = decoder.finish()?;

    let _gate = state.gate.lock().await;
    let settings = state.settings.display()?;
    let screen = state.screen.clone();
    let size = bytes.len();
    run_blocking(move || screen.show_bitmap(&bytes, &settings)).await?;

    tracing::info!("Previewed uploaded bitmap ({} bytes)", size);
    Ok(Json(Status::ok()))
}

/// Validate the declared base64 body length before reading anything
fn declared_length(headers: &HeaderMap, max: usize) -> Result<usize, AppError> {
    let len = content_length(headers)
        .ok_or_else(|| AppError::BadRequest("content-length required".to_string()))?;
    if len == 0 {
        return Err(AppError::BadRequest("empty body".to_string()));
    }
    if len > max as u64 {
        return Err(AppError::BodyTooLong(len));
    }

    let len = len as usize;
    if len % 4 != 0 {
        return Err(DecodeError::InvalidLength(len).into());
    }
    Ok(len)
}

/// Stream the body into the decoder in read-buffer sized pieces
async fn feed<W: Write>(body: Body, decoder: &mut StreamDecoder<W>) -> Result<(), AppError> {
    let mut stream = body.into_data_stream();
    while let Some(frame) = stream.next().await {
        let frame = frame.map_err(|e| AppError::Receive(e.to_string()))?;
        push_frame(decoder, &frame)?;
    }
    Ok(())
}

/// Decode one network frame in read-buffer sized pieces
fn push_frame<W: Write>(decoder: &mut StreamDecoder<W>, frame: &[u8]) -> Result<(), DecodeError> {
    for piece in frame.chunks(READ_BUFFER_SIZE) {
        decoder.push(piece)?;
    }
    Ok(())
}
