//! Device bring-up and wake cycle
//!
//! On real hardware each wake is a fresh boot and deep sleep ends the
//! program. On a host the sleep is an in-process timer, so the retained
//! cursor survives it exactly like retained memory survives deep sleep, while
//! restarting the process behaves like power loss.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::api::{self, run_blocking, AppState};
use crate::config::Config;
use crate::display::{PngSurface, Screen, SetupInfo};
use crate::error::AppError;
use crate::nvs::{FilePartition, StoreError};
use crate::photos::{LibraryError, PhotoLibrary};
use crate::settings::{Schedule, SettingsStore};
use crate::slideshow::{playlist, ResetCause, WakeMode};

/// Sleep after leaving setup mode before the first slideshow wake
pub const SETUP_EXIT_SLEEP: Duration = Duration::from_secs(1);

/// Fatal start-up and serving errors
#[derive(Error, Debug)]
pub enum BootError {
    #[error("settings store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("photo storage unavailable: {0}")]
    Library(#[from] LibraryError),

    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("server error: {0}")]
    Serve(io::Error),
}

/// Reboot requests from the API to the wake loop
#[derive(Debug, Default)]
pub struct PowerControl {
    reboot: Notify,
}

impl PowerControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_reboot(&self) {
        tracing::info!("Reboot requested");
        self.reboot.notify_one();
    }

    /// Wait for the next reboot request
    pub async fn rebooted(&self) {
        self.reboot.notified().await;
    }
}

/// Render the next visible photo and advance the cursor
///
/// Falls back to the grey bar pattern when nothing is visible or the photo
/// cannot be shown. Returns the photo shown, if any.
pub async fn show_next(state: &AppState) -> Option<String> {
    let mut cursor = state.gate.lock().await;

    let list = match state.library.visible() {
        Ok(visible) => playlist(visible),
        Err(e) => {
            tracing::error!("Failed to scan photos: {}", e);
            Vec::new()
        }
    };

    let Some(index) = cursor.advance(list.len()) else {
        tracing::info!("No visible photos, showing fallback");
        show_fallback(state).await;
        return None;
    };
    let filename = list[index].filename.clone();

    let display = state.settings.display().unwrap_or_else(|e| {
        tracing::warn!("Using default display settings: {}", e);
        Default::default()
    });

    let library = state.library.clone();
    let screen = state.screen.clone();
    let name = filename.clone();
    let shown = run_blocking(move || -> Result<(), AppError> {
        let (bytes, _) = library.read(&name)?;
        screen.show_bitmap(&bytes, &display)?;
        Ok(())
    })
    .await;

    match shown {
        Ok(()) => {
            tracing::info!("Showing {} ({}/{})", filename, index + 1, list.len());
            Some(filename)
        }
        Err(e) => {
            tracing::error!("Failed to show {}: {}", filename, e);
            show_fallback(state).await;
            None
        }
    }
}

/// Effective sleep between slideshow advances
fn refresh_interval(state: &AppState) -> Duration {
    match state.settings.schedule() {
        Ok(schedule) => schedule.interval(),
        Err(e) => {
            tracing::warn!("Using default refresh interval: {}", e);
            Schedule::default().interval()
        }
    }
}

async fn show_fallback(state: &AppState) {
    let screen = state.screen.clone();
    if let Err(e) = run_blocking(move || screen.show_fallback()).await {
        tracing::error!("Failed to show fallback: {}", e);
    }
}

/// A brought-up frame
pub struct Device {
    state: AppState,
}

impl Device {
    /// Open storage and the settings partition; any failure is fatal
    pub fn bring_up(config: Config) -> Result<Self, BootError> {
        let partition = Arc::new(FilePartition::new(&config.settings_path));
        let settings = SettingsStore::new(partition);
        settings.init()?;

        let library = PhotoLibrary::open(&config.photo_dir)?;

        let (width, height) = config.model.dimensions();
        let screen = Screen::new(Box::new(PngSurface::new(&config.frame_output, width, height)));

        tracing::info!(
            "{} {}x{}, AP {} at {}",
            config.model.name(),
            width,
            height,
            config.mac.ssid(),
            config.ipv4
        );

        Ok(Self {
            state: AppState::new(config, settings, library, screen),
        })
    }

    /// Run wake cycles forever, starting from the configured reset cause
    pub async fn run(self) -> Result<(), BootError> {
        if !self.state.config.sleep_cycle {
            return self.run_continuous().await;
        }

        let mut cause = self.state.config.wake_cause;
        loop {
            self.state.gate.lock().await.on_reset(cause);
            tracing::info!("Wake: {:?}", cause);

            let sleep = match cause.wake_mode() {
                WakeMode::Setup => {
                    self.setup_mode().await?;
                    SETUP_EXIT_SLEEP
                }
                WakeMode::Slideshow => {
                    show_next(&self.state).await;
                    refresh_interval(&self.state)
                }
            };

            tracing::info!("Entering deep sleep for {} seconds", sleep.as_secs());
            tokio::time::sleep(sleep).await;
            cause = ResetCause::DeepSleepTimer;
        }
    }

    async fn bind(&self) -> Result<TcpListener, BootError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| BootError::Bind { addr, source })?;
        tracing::info!("Starting server on {}", addr);
        Ok(listener)
    }

    /// Show access point details and serve until a reboot is requested
    async fn setup_mode(&self) -> Result<(), BootError> {
        let info = SetupInfo::new(&self.state.config.mac, self.state.config.ipv4);
        if let Err(e) = self.state.screen.show_setup(&info) {
            tracing::error!("Failed to show setup screen: {}", e);
        }

        let listener = self.bind().await?;
        let power = self.state.power.clone();
        axum::serve(listener, api::router(self.state.clone()))
            .with_graceful_shutdown(async move { power.rebooted().await })
            .await
            .map_err(BootError::Serve)?;

        tracing::info!("Leaving setup mode");
        Ok(())
    }

    /// Serve permanently and advance the slideshow on a timer
    async fn run_continuous(self) -> Result<(), BootError> {
        let listener = self.bind().await?;

        let state = self.state.clone();
        tokio::spawn(async move {
            loop {
                show_next(&state).await;

                tokio::select! {
                    _ = tokio::time::sleep(refresh_interval(&state)) => {}
                    _ = state.power.rebooted() => {
                        tracing::info!("Advancing slideshow on reboot request");
                    }
                }
            }
        });

        axum::serve(listener, api::router(self.state))
            .await
            .map_err(BootError::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{DisplayError, DisplaySurface};
    use crate::framebuffer::Framebuffer;
    use crate::nvs::MemoryPartition;
    use std::fs;
    use std::io::Cursor;
    use std::sync::Mutex;

    /// Surface recording every frame it is given
    struct Recorder(Arc<Mutex<Vec<Framebuffer>>>);

    impl DisplaySurface for Recorder {
        fn dimensions(&self) -> (u32, u32) {
            (16, 8)
        }

        fn present(&mut self, frame: &Framebuffer) -> Result<(), DisplayError> {
            self.0.lock().unwrap().push(frame.clone());
            Ok(())
        }
    }

    fn bmp() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([0, 0, 0]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Bmp)
            .unwrap();
        out
    }

    fn state() -> (tempfile::TempDir, AppState, Arc<Mutex<Vec<Framebuffer>>>) {
        let dir = tempfile::tempdir().unwrap();
        let frames = Arc::new(Mutex::new(Vec::new()));
        let settings = SettingsStore::new(Arc::new(MemoryPartition::new()));
        let library = PhotoLibrary::open(dir.path()).unwrap();
        let screen = Screen::new(Box::new(Recorder(frames.clone())));
        let state = AppState::new(Config::default(), settings, library, screen);
        (dir, state, frames)
    }

    #[tokio::test]
    async fn test_show_next_cycles_visible_photos() {
        let (dir, state, frames) = state();
        fs::write(dir.path().join("2.bmp"), bmp()).unwrap();
        fs::write(dir.path().join("1.bmp"), bmp()).unwrap();
        fs::write(dir.path().join(".3.bmp"), bmp()).unwrap();

        assert_eq!(show_next(&state).await.as_deref(), Some("1.bmp"));
        assert_eq!(show_next(&state).await.as_deref(), Some("2.bmp"));
        assert_eq!(show_next(&state).await.as_deref(), Some("1.bmp"));
        assert_eq!(state.gate.lock().await.last_index(), 0);
        assert_eq!(frames.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_library_shows_fallback() {
        let (_dir, state, frames) = state();

        assert_eq!(show_next(&state).await, None);
        assert_eq!(state.gate.lock().await.last_index(), -1);

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pixel(0, 0), Some(0));
        assert_eq!(frames[0].pixel(15, 0), Some(7));
    }

    #[tokio::test]
    async fn test_broken_photo_falls_back_and_advances() {
        let (dir, state, frames) = state();
        fs::write(dir.path().join("1.bmp"), b"not a bitmap").unwrap();

        assert_eq!(show_next(&state).await, None);
        assert_eq!(state.gate.lock().await.last_index(), 0);
        assert_eq!(frames.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reboot_request_is_remembered() {
        let power = PowerControl::new();
        power.request_reboot();
        tokio::time::timeout(Duration::from_secs(1), power.rebooted())
            .await
            .unwrap();
    }
}
