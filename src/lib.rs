//! E-ink photo frame firmware core
//!
//! Settings live in a small key-value partition, photos are BMP files on
//! removable storage, and a slideshow cursor retained across deep sleep picks
//! the next photo on every timer wake. In setup mode an HTTP API configures
//! the frame and manages photos.

pub mod api;
pub mod base64_stream;
pub mod clock;
pub mod config;
pub mod device;
pub mod display;
pub mod error;
pub mod framebuffer;
pub mod nvs;
pub mod photos;
pub mod render;
pub mod settings;
pub mod slideshow;
