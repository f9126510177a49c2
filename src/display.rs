//! Display surface abstraction
//!
//! The panel driver is an external collaborator; the core only needs a
//! surface that reports its size and accepts a full framebuffer. On a host the
//! frame is written out as a greyscale PNG.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Mutex;

use png::{BitDepth, ColorType, Encoder};
use thiserror::Error;

use crate::config::MacAddress;
use crate::framebuffer::Framebuffer;
use crate::render::{self, RenderError};
use crate::settings::DisplaySettings;

/// Hostname advertised over mDNS
pub const HOSTNAME: &str = "inkart";

/// Display error types
#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("frame is {frame_w}x{frame_h}, panel is {panel_w}x{panel_h}")]
    SizeMismatch {
        frame_w: u32,
        frame_h: u32,
        panel_w: u32,
        panel_h: u32,
    },

    #[error("frame encode failed: {0}")]
    Encode(#[from] png::EncodingError),

    #[error("display I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("display lock poisoned")]
    Poisoned,
}

/// What the setup screen shows so a phone can join the access point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupInfo {
    pub ssid: String,
    pub password: String,
    pub address: Ipv4Addr,
}

impl SetupInfo {
    pub fn new(mac: &MacAddress, address: Ipv4Addr) -> Self {
        Self {
            ssid: mac.ssid(),
            password: mac.password(),
            address,
        }
    }

    /// Wi-Fi join payload encoded in the setup QR code
    pub fn qr_payload(&self) -> String {
        format!("WIFI:T:WPA;S:{};P:{};;", self.ssid, self.password)
    }

    /// Web UI addresses, mDNS name first
    pub fn urls(&self) -> [String; 2] {
        [
            format!("http://{}.local", HOSTNAME),
            format!("http://{}", self.address),
        ]
    }
}

/// A panel the firmware can draw to
pub trait DisplaySurface: Send {
    /// Physical panel size in pixels
    fn dimensions(&self) -> (u32, u32);

    /// Push a full frame to the panel
    fn present(&mut self, frame: &Framebuffer) -> Result<(), DisplayError>;

    /// Show access point details while in setup mode
    fn present_setup(&mut self, info: &SetupInfo) -> Result<(), DisplayError> {
        let [mdns, direct] = info.urls();
        tracing::info!(
            "Setup: join {} (password {}), then open {} or {}",
            info.ssid,
            info.password,
            mdns,
            direct
        );
        tracing::info!("Setup QR: {}", info.qr_payload());
        Ok(())
    }
}

/// Host surface writing each frame to a PNG file
pub struct PngSurface {
    path: PathBuf,
    width: u32,
    height: u32,
}

impl PngSurface {
    pub fn new(path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            path: path.into(),
            width,
            height,
        }
    }
}

impl DisplaySurface for PngSurface {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn present(&mut self, frame: &Framebuffer) -> Result<(), DisplayError> {
        let tmp = self.path.with_extension("png.tmp");

        {
            let file = BufWriter::new(File::create(&tmp)?);
            let mut encoder = Encoder::new(file, frame.width(), frame.height());
            encoder.set_color(ColorType::Grayscale);
            encoder.set_depth(BitDepth::Eight);

            let mut writer = encoder.write_header()?;
            writer.write_image_data(&frame.to_grey8())?;
            writer.finish()?;
        }

        fs::rename(&tmp, &self.path)?;
        tracing::info!("Frame written to {}", self.path.display());
        Ok(())
    }
}

/// Shared handle to the panel
pub struct Screen {
    surface: Mutex<Box<dyn DisplaySurface>>,
    width: u32,
    height: u32,
}

impl Screen {
    pub fn new(surface: Box<dyn DisplaySurface>) -> Self {
        let (width, height) = surface.dimensions();
        Self {
            surface: Mutex::new(surface),
            width,
            height,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn present(&self, frame: &Framebuffer) -> Result<(), DisplayError> {
        if (frame.width(), frame.height()) != (self.width, self.height) {
            return Err(DisplayError::SizeMismatch {
                frame_w: frame.width(),
                frame_h: frame.height(),
                panel_w: self.width,
                panel_h: self.height,
            });
        }
        let mut surface = self.surface.lock().map_err(|_| DisplayError::Poisoned)?;
        surface.present(frame)
    }

    /// Render a BMP with the given settings and show it
    pub fn show_bitmap(&self, bytes: &[u8], settings: &DisplaySettings) -> Result<(), RenderError> {
        let mut frame = Framebuffer::new(self.width, self.height);
        render::render_bitmap(bytes, settings, &mut frame)?;
        self.present(&frame)?;
        Ok(())
    }

    /// Show the grey bar pattern
    pub fn show_fallback(&self) -> Result<(), DisplayError> {
        let mut frame = Framebuffer::new(self.width, self.height);
        render::render_fallback(&mut frame);
        self.present(&frame)
    }

    pub fn show_setup(&self, info: &SetupInfo) -> Result<(), DisplayError> {
        let mut surface = self.surface.lock().map_err(|_| DisplayError::Poisoned)?;
        surface.present_setup(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framebuffer::BLACK;

    #[test]
    fn test_setup_info() {
        let mac: MacAddress = "24:0a:c4:1b:2c:3d".parse().unwrap();
        let info = SetupInfo::new(&mac, Ipv4Addr::new(192, 168, 4, 1));
        assert_eq!(info.ssid, "InkArtc41b");
        assert_eq!(info.password, "iNKaRT2c3d");
        assert_eq!(info.qr_payload(), "WIFI:T:WPA;S:InkArtc41b;P:iNKaRT2c3d;;");
        assert_eq!(info.urls()[0], "http://inkart.local");
        assert_eq!(info.urls()[1], "http://192.168.4.1");
    }

    #[test]
    fn test_png_surface_writes_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let screen = Screen::new(Box::new(PngSurface::new(&path, 16, 4)));

        screen.show_fallback().unwrap();

        let decoder = png::Decoder::new(File::open(&path).unwrap());
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf).unwrap();
        assert_eq!((info.width, info.height), (16, 4));
        assert_eq!(info.color_type, ColorType::Grayscale);
        assert_eq!(buf[0], BLACK);
        assert_eq!(buf[15], 255);
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let screen = Screen::new(Box::new(PngSurface::new(dir.path().join("f.png"), 4, 4)));
        let frame = Framebuffer::new(2, 2);
        assert!(matches!(
            screen.present(&frame),
            Err(DisplayError::SizeMismatch { .. })
        ));
    }
}
