//! Typed device settings over the raw key-value partition
//!
//! Every field has a schema default that is returned whenever the key is
//! absent, so fields added by a firmware upgrade need no migration. Updates
//! stage every field present in a request and commit once.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::nvs::{self, OpenMode, Partition, StoreError, Stored};

/// Namespace holding the settings record
pub const NAMESPACE: &str = "system_settings";

/// Schema version written at first boot
pub const SCHEMA_VERSION: i16 = 1;

/// Sleep duration used when the stored refresh interval is 0
pub const DEFAULT_REFRESH_MINUTES: u16 = 30;

mod key {
    pub const VERSION: &str = "version";
    pub const INVERT: &str = "inverted";
    pub const DITHERING: &str = "dithering";
    pub const ORIENTATION: &str = "orientation";
    pub const PADDING_TOP: &str = "padding-top";
    pub const PADDING_LEFT: &str = "padding-left";
    pub const PADDING_RIGHT: &str = "padding-right";
    pub const PADDING_BOTTOM: &str = "padding-bottom";
    pub const REFRESH: &str = "refresh";
    pub const SHUFFLE: &str = "shuffle";
}

/// Rotation applied before rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum Orientation {
    #[default]
    Landscape = 0,
    PortraitLeft = 1,
    UpsideDown = 2,
    PortraitRight = 3,
}

impl Orientation {
    /// Convert from the stored rotation index
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Orientation::Landscape),
            1 => Some(Orientation::PortraitLeft),
            2 => Some(Orientation::UpsideDown),
            3 => Some(Orientation::PortraitRight),
            _ => None,
        }
    }

    /// Whether the logical canvas is taller than wide
    pub fn is_portrait(&self) -> bool {
        matches!(self, Orientation::PortraitLeft | Orientation::PortraitRight)
    }
}

/// Pixel margins around the rendered image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct Padding {
    pub top: i16,
    pub left: i16,
    pub right: i16,
    pub bottom: i16,
}

/// Display part of the settings record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct DisplaySettings {
    pub invert: bool,
    pub dithering: bool,
    pub orientation: Orientation,
    pub padding: Padding,
}

/// Partial padding update
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct PaddingPatch {
    pub top: Option<i16>,
    pub left: Option<i16>,
    pub right: Option<i16>,
    pub bottom: Option<i16>,
}

/// Partial display update; absent fields are left alone
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct DisplayPatch {
    pub invert: Option<bool>,
    pub dithering: Option<bool>,
    pub orientation: Option<Orientation>,
    pub padding: Option<PaddingPatch>,
}

impl DisplayPatch {
    /// Overlay the patch on `base` without touching the store
    pub fn apply_to(&self, base: DisplaySettings) -> DisplaySettings {
        let mut out = base;
        if let Some(invert) = self.invert {
            out.invert = invert;
        }
        if let Some(dithering) = self.dithering {
            out.dithering = dithering;
        }
        if let Some(orientation) = self.orientation {
            out.orientation = orientation;
        }
        if let Some(padding) = &self.padding {
            out.padding.top = padding.top.unwrap_or(out.padding.top);
            out.padding.left = padding.left.unwrap_or(out.padding.left);
            out.padding.right = padding.right.unwrap_or(out.padding.right);
            out.padding.bottom = padding.bottom.unwrap_or(out.padding.bottom);
        }
        out
    }
}

/// Slideshow scheduling part of the settings record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Stored refresh interval in minutes, 0 meaning the device default
    pub refresh_minutes: u16,
    /// Reserved ordering mode flag
    pub shuffle: u8,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            refresh_minutes: DEFAULT_REFRESH_MINUTES,
            shuffle: 0,
        }
    }
}

impl Schedule {
    /// Sleep duration between slideshow advances
    pub fn interval(&self) -> Duration {
        let minutes = match self.refresh_minutes {
            0 => DEFAULT_REFRESH_MINUTES,
            m => m,
        };
        Duration::from_secs(u64::from(minutes) * 60)
    }
}

/// Partial schedule update
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulePatch {
    pub refresh_minutes: Option<u16>,
    pub shuffle: Option<u8>,
}

impl SchedulePatch {
    pub fn is_empty(&self) -> bool {
        self.refresh_minutes.is_none() && self.shuffle.is_none()
    }
}

/// Settings accessor; opens the partition per call
#[derive(Clone)]
pub struct SettingsStore {
    partition: Arc<dyn Partition>,
}

impl SettingsStore {
    pub fn new(partition: Arc<dyn Partition>) -> Self {
        Self { partition }
    }

    /// Write the schema version on first boot, returning the stored version
    pub fn init(&self) -> Result<i16, StoreError> {
        match nvs::open(self.partition.as_ref(), NAMESPACE, OpenMode::ReadOnly) {
            Ok(handle) => {
                let version = handle.get::<i16>(key::VERSION)?.unwrap_or(SCHEMA_VERSION);
                tracing::info!("Settings schema version {}", version);
                Ok(version)
            }
            Err(StoreError::NotFound(_)) => {
                let mut handle = nvs::open(self.partition.as_ref(), NAMESPACE, OpenMode::ReadWrite)?;
                handle.set(key::VERSION, SCHEMA_VERSION)?;
                handle.commit()?;
                tracing::info!("Initialized settings with schema version {}", SCHEMA_VERSION);
                Ok(SCHEMA_VERSION)
            }
            Err(e) => Err(e),
        }
    }

    /// Stored schema version, if any
    pub fn schema_version(&self) -> Result<Option<i16>, StoreError> {
        self.read(|reader| reader.field::<i16>(key::VERSION))
    }

    /// Current display settings with defaults substituted
    pub fn display(&self) -> Result<DisplaySettings, StoreError> {
        let defaults = DisplaySettings::default();
        self.read(|reader| DisplaySettings {
            invert: reader.flag(key::INVERT).unwrap_or(defaults.invert),
            dithering: reader.flag(key::DITHERING).unwrap_or(defaults.dithering),
            orientation: reader
                .field::<u8>(key::ORIENTATION)
                .and_then(Orientation::from_u8)
                .unwrap_or(defaults.orientation),
            padding: Padding {
                top: reader.field(key::PADDING_TOP).unwrap_or(defaults.padding.top),
                left: reader.field(key::PADDING_LEFT).unwrap_or(defaults.padding.left),
                right: reader.field(key::PADDING_RIGHT).unwrap_or(defaults.padding.right),
                bottom: reader.field(key::PADDING_BOTTOM).unwrap_or(defaults.padding.bottom),
            },
        })
    }

    /// Current schedule with defaults substituted
    pub fn schedule(&self) -> Result<Schedule, StoreError> {
        let defaults = Schedule::default();
        self.read(|reader| Schedule {
            refresh_minutes: reader.field(key::REFRESH).unwrap_or(defaults.refresh_minutes),
            shuffle: reader.field(key::SHUFFLE).unwrap_or(defaults.shuffle),
        })
    }

    /// Apply every field present in `patch` and commit once
    pub fn update_display(&self, patch: &DisplayPatch) -> Result<(), StoreError> {
        let mut handle = nvs::open(self.partition.as_ref(), NAMESPACE, OpenMode::ReadWrite)?;

        if let Some(invert) = patch.invert {
            handle.set(key::INVERT, u8::from(invert))?;
        }
        if let Some(dithering) = patch.dithering {
            handle.set(key::DITHERING, u8::from(dithering))?;
        }
        if let Some(orientation) = patch.orientation {
            handle.set(key::ORIENTATION, orientation as u8)?;
        }
        if let Some(padding) = &patch.padding {
            let fields = [
                (key::PADDING_TOP, padding.top),
                (key::PADDING_LEFT, padding.left),
                (key::PADDING_RIGHT, padding.right),
                (key::PADDING_BOTTOM, padding.bottom),
            ];
            for (name, value) in fields {
                if let Some(value) = value {
                    handle.set(name, value)?;
                }
            }
        }

        handle.commit()
    }

    /// Apply every field present in `patch` and commit once
    pub fn update_schedule(&self, patch: &SchedulePatch) -> Result<(), StoreError> {
        let mut handle = nvs::open(self.partition.as_ref(), NAMESPACE, OpenMode::ReadWrite)?;

        if let Some(refresh) = patch.refresh_minutes {
            handle.set(key::REFRESH, refresh)?;
        }
        if let Some(shuffle) = patch.shuffle {
            handle.set(key::SHUFFLE, shuffle)?;
        }

        handle.commit()
    }

    fn read<T>(&self, f: impl FnOnce(&Reader<'_>) -> T) -> Result<T, StoreError> {
        let handle = match nvs::open(self.partition.as_ref(), NAMESPACE, OpenMode::ReadOnly) {
            Ok(handle) => Some(handle),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        Ok(f(&Reader { handle }))
    }
}

/// Read side that turns misses and type mismatches into `None`
struct Reader<'a> {
    handle: Option<nvs::Handle<'a>>,
}

impl Reader<'_> {
    fn field<T: Stored>(&self, name: &str) -> Option<T> {
        let handle = self.handle.as_ref()?;
        match handle.get::<T>(name) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Ignoring stored {}: {}", name, e);
                None
            }
        }
    }

    fn flag(&self, name: &str) -> Option<bool> {
        self.field::<u8>(name).map(|v| v != 0)
    }
}
