//! Configuration and photo HTTP API

pub mod photos;
pub mod system;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderMap};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};
use utoipa_scalar::{Scalar, Servable};

use crate::clock::Clock;
use crate::config::Config;
use crate::device::PowerControl;
use crate::display::Screen;
use crate::error::AppError;
use crate::photos::PhotoLibrary;
use crate::settings::{
    DisplayPatch, DisplaySettings, Orientation, Padding, PaddingPatch, SettingsStore,
};
use crate::slideshow::SlideshowCursor;

/// Settings bodies must be shorter than this
pub const SETTINGS_BODY_LIMIT: u64 = 1024;

/// Photo visibility batches must be shorter than this
pub const PATCH_BODY_LIMIT: u64 = 16 * 1024;

/// Largest piece handed to the base64 decoder at once
pub const READ_BUFFER_SIZE: usize = 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: SettingsStore,
    pub library: PhotoLibrary,
    pub screen: Arc<Screen>,
    pub clock: Arc<Clock>,
    pub power: Arc<PowerControl>,
    pub config: Arc<Config>,
    /// Request gate; held for the whole of every handler and slideshow
    /// advance, and owns the retained cursor
    pub gate: Arc<Mutex<SlideshowCursor>>,
}

impl AppState {
    pub fn new(config: Config, settings: SettingsStore, library: PhotoLibrary, screen: Screen) -> Self {
        Self {
            settings,
            library,
            screen: Arc::new(screen),
            clock: Arc::new(Clock::new()),
            power: Arc::new(PowerControl::new()),
            config: Arc::new(config),
            gate: Arc::new(Mutex::new(SlideshowCursor::new())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Ok,
    Fail,
}

/// Status envelope returned by every mutating endpoint
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Status {
    pub status: StatusKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Status {
    pub fn ok() -> Self {
        Self {
            status: StatusKind::Ok,
            detail: None,
        }
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            status: StatusKind::Fail,
            detail: Some(detail.into()),
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "InkFrame API",
        description = "Configuration and photo management for the e-ink photo frame",
        version = "0.1.0"
    ),
    tags(
        (name = "System", description = "Device information, display settings and time"),
        (name = "Photos", description = "Slideshow photo library")
    ),
    paths(
        system::get_info,
        system::get_display,
        system::set_display,
        system::preview_display,
        system::get_time,
        system::set_time,
        system::reboot,
        photos::list_photos,
        photos::patch_photos,
        photos::upload_photo,
        photos::preview_photo,
        photos::get_photo,
        photos::delete_photo,
    ),
    components(schemas(
        Status,
        StatusKind,
        DisplaySettings,
        DisplayPatch,
        Orientation,
        Padding,
        PaddingPatch,
        system::InfoResponse,
        system::SystemInfo,
        system::PanelInfo,
        system::StorageInfo,
        system::NetworkInfo,
        system::TimeRequest,
        system::TimeResponse,
        photos::PhotoList,
        photos::PhotoItem,
        photos::UploadResponse,
    ))
)]
pub struct ApiDoc;

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/system/info", get(system::get_info))
        .route(
            "/api/v1/system/display",
            get(system::get_display).post(system::set_display),
        )
        .route("/api/v1/system/display/preview", post(system::preview_display))
        .route(
            "/api/v1/system/time",
            get(system::get_time).post(system::set_time),
        )
        .route("/api/v1/system/reboot", post(system::reboot))
        .route(
            "/api/v1/photos",
            get(photos::list_photos)
                .patch(photos::patch_photos)
                .post(photos::upload_photo),
        )
        .route("/api/v1/photos/preview", post(photos::preview_photo))
        .route(
            "/api/v1/photos/{name}",
            get(photos::get_photo).delete(photos::delete_photo),
        )
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .route("/openapi.json", get(openapi_json))
        .layer(DefaultBodyLimit::disable())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Get OpenAPI JSON specification
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Declared `content-length`, if present and numeric
fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Read a JSON body strictly shorter than `limit` bytes
///
/// A declared length at or above the limit is rejected before any read;
/// bodies without a declared length are cut off once they reach it.
async fn read_json<T: DeserializeOwned>(
    headers: &HeaderMap,
    body: Body,
    limit: u64,
) -> Result<T, AppError> {
    if let Some(len) = content_length(headers) {
        if len >= limit {
            return Err(AppError::BodyTooLong(len));
        }
    }

    let mut buf = Vec::new();
    let mut stream = body.into_data_stream();
    while let Some(frame) = stream.next().await {
        let frame = frame.map_err(|e| AppError::Receive(e.to_string()))?;
        let len = (buf.len() + frame.len()) as u64;
        if len >= limit {
            return Err(AppError::BodyTooLong(len));
        }
        buf.extend_from_slice(&frame);
    }

    Ok(serde_json::from_slice(&buf)?)
}

/// Run storage or panel work on the blocking pool
pub async fn run_blocking<T, E, F>(work: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<AppError> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await?.map_err(Into::into)
}
