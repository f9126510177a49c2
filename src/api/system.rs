//! Device information, display settings, time and power endpoints

use axum::body::Body;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{read_json, run_blocking, AppState, Status, SETTINGS_BODY_LIMIT};
use crate::error::AppError;
use crate::settings::{DisplayPatch, DisplaySettings, SchedulePatch};
use crate::slideshow::{playlist, SlideshowCursor};

#[derive(Debug, Serialize, ToSchema)]
pub struct SystemInfo {
    pub version: String,
    pub model: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PanelInfo {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StorageInfo {
    /// Bytes used by photos
    pub used: u64,
    pub total: u64,
    /// Photos in either visibility state
    pub photos: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NetworkInfo {
    pub mac: String,
    pub ipv4: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InfoResponse {
    pub system: SystemInfo,
    pub display: PanelInfo,
    pub storage: StorageInfo,
    pub network: NetworkInfo,
}

/// Time sync and schedule update; every field is optional
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TimeRequest {
    /// Epoch milliseconds
    pub time: Option<i64>,
    /// Refresh interval in minutes, 0 for the device default
    pub refresh: Option<u16>,
    pub shuffle: Option<u8>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TimeResponse {
    /// Epoch milliseconds
    pub time: i64,
    pub refresh: u16,
    pub shuffle: u8,
}

/// Device information
#[utoipa::path(
    get,
    path = "/api/v1/system/info",
    tag = "System",
    responses(
        (status = 200, description = "Device information", body = InfoResponse),
        (status = 500, description = "Storage unreadable", body = Status)
    )
)]
pub async fn get_info(State(state): State<AppState>) -> Result<Json<InfoResponse>, AppError> {
    let _gate = state.gate.lock().await;

    let usage = state.library.usage()?;
    let (width, height) = state.screen.dimensions();

    Ok(Json(InfoResponse {
        system: SystemInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            model: state.config.model.name().to_string(),
        },
        display: PanelInfo { width, height },
        storage: StorageInfo {
            used: usage.used,
            total: state.config.storage_capacity,
            photos: usage.photos,
        },
        network: NetworkInfo {
            mac: state.config.mac.to_string(),
            ipv4: state.config.ipv4.to_string(),
        },
    }))
}

/// Current display settings
#[utoipa::path(
    get,
    path = "/api/v1/system/display",
    tag = "System",
    responses(
        (status = 200, description = "Display settings", body = DisplaySettings),
        (status = 500, description = "Settings store unavailable", body = Status)
    )
)]
pub async fn get_display(State(state): State<AppState>) -> Result<Json<DisplaySettings>, AppError> {
    let _gate = state.gate.lock().await;
    Ok(Json(state.settings.display()?))
}

/// Update display settings
///
/// Only the fields present are written; all of them commit together.
#[utoipa::path(
    post,
    path = "/api/v1/system/display",
    tag = "System",
    request_body = DisplayPatch,
    responses(
        (status = 200, description = "Settings saved", body = Status),
        (status = 400, description = "Body too long or invalid JSON", body = Status),
        (status = 500, description = "Commit failed", body = Status)
    )
)]
pub async fn set_display(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<Status>, AppError> {
    let patch: DisplayPatch = read_json(&headers, body, SETTINGS_BODY_LIMIT).await?;

    let _gate = state.gate.lock().await;
    state.settings.update_display(&patch)?;
    tracing::info!("Display settings updated: {:?}", patch);

    Ok(Json(Status::ok()))
}

/// Render the current photo with uncommitted display settings
#[utoipa::path(
    post,
    path = "/api/v1/system/display/preview",
    tag = "System",
    request_body = DisplayPatch,
    responses(
        (status = 200, description = "Preview rendered", body = Status),
        (status = 400, description = "Body too long or invalid JSON", body = Status),
        (status = 500, description = "Render failed", body = Status)
    )
)]
pub async fn preview_display(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<Status>, AppError> {
    let patch: DisplayPatch = read_json(&headers, body, SETTINGS_BODY_LIMIT).await?;

    let cursor = state.gate.lock().await;
    let preview = patch.apply_to(state.settings.display()?);

    let library = state.library.clone();
    let screen = state.screen.clone();
    match current_photo(&state, &cursor)? {
        Some(filename) => {
            let name = filename.clone();
            run_blocking(move || -> Result<(), AppError> {
                let (bytes, _) = library.read(&name)?;
                screen
                    .show_bitmap(&bytes, &preview)
                    .map_err(|source| AppError::StoredPhoto {
                        filename: name,
                        source,
                    })
            })
            .await?;
            tracing::info!("Previewed {} with {:?}", filename, preview);
        }
        None => {
            run_blocking(move || screen.show_fallback()).await?;
            tracing::info!("No visible photo to preview");
        }
    }

    Ok(Json(Status::ok()))
}

/// Photo on screen, or the first in the playlist
fn current_photo(state: &AppState, cursor: &SlideshowCursor) -> Result<Option<String>, AppError> {
    let list = playlist(state.library.visible()?);
    let index = cursor.current(list.len()).unwrap_or(0);
    Ok(list.into_iter().nth(index).map(|entry| entry.filename))
}

/// Device time and slideshow schedule
#[utoipa::path(
    get,
    path = "/api/v1/system/time",
    tag = "System",
    responses(
        (status = 200, description = "Time and schedule", body = TimeResponse),
        (status = 500, description = "Settings store unavailable", body = Status)
    )
)]
pub async fn get_time(State(state): State<AppState>) -> Result<Json<TimeResponse>, AppError> {
    let _gate = state.gate.lock().await;
    let schedule = state.settings.schedule()?;

    Ok(Json(TimeResponse {
        time: state.clock.now_ms(),
        refresh: schedule.refresh_minutes,
        shuffle: schedule.shuffle,
    }))
}

/// Set device time and/or slideshow schedule
#[utoipa::path(
    post,
    path = "/api/v1/system/time",
    tag = "System",
    request_body = TimeRequest,
    responses(
        (status = 200, description = "Saved", body = Status),
        (status = 400, description = "Body too long or invalid JSON", body = Status),
        (status = 500, description = "Commit failed", body = Status)
    )
)]
pub async fn set_time(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<Status>, AppError> {
    let request: TimeRequest = read_json(&headers, body, SETTINGS_BODY_LIMIT).await?;

    let _gate = state.gate.lock().await;

    let patch = SchedulePatch {
        refresh_minutes: request.refresh,
        shuffle: request.shuffle,
    };
    if !patch.is_empty() {
        state.settings.update_schedule(&patch)?;
        tracing::info!("Schedule updated: {:?}", patch);
    }

    if let Some(time) = request.time {
        state.clock.set_ms(time);
    }

    Ok(Json(Status::ok()))
}

/// Leave setup mode and go to sleep
#[utoipa::path(
    post,
    path = "/api/v1/system/reboot",
    tag = "System",
    responses(
        (status = 200, description = "Reboot scheduled", body = Status)
    )
)]
pub async fn reboot(State(state): State<AppState>) -> Json<Status> {
    state.power.request_reboot();
    Json(Status::ok())
}
