//! Slideshow cursor and wake-cycle state
//!
//! The cursor selects which visible photo is rendered on each slideshow wake.
//! It lives in memory that survives deep sleep but not a full reset, so the
//! reset cause decides whether it is kept or starts over.

use std::cmp::Ordering;
use std::str::FromStr;

use crate::photos::PhotoEntry;

/// Why the device (re)started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetCause {
    /// Cold boot or power loss
    PowerOn,
    /// Deep-sleep timer expired
    DeepSleepTimer,
    /// Woken from deep sleep by an external source (touchpad, button)
    DeepSleepExternal,
    /// Software restart
    Software,
}

impl ResetCause {
    /// Whether retained memory survives this kind of reset
    pub fn retains_memory(&self) -> bool {
        matches!(self, ResetCause::DeepSleepTimer | ResetCause::DeepSleepExternal)
    }

    /// Mode entered after this reset
    pub fn wake_mode(&self) -> WakeMode {
        match self {
            ResetCause::DeepSleepTimer => WakeMode::Slideshow,
            _ => WakeMode::Setup,
        }
    }
}

impl FromStr for ResetCause {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "power-on" | "poweron" => Ok(ResetCause::PowerOn),
            "timer" => Ok(ResetCause::DeepSleepTimer),
            "external" | "touch" => Ok(ResetCause::DeepSleepExternal),
            "software" => Ok(ResetCause::Software),
            other => Err(format!("unknown reset cause: {}", other)),
        }
    }
}

/// What the device does after waking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeMode {
    /// Serve the configuration API until asked to leave
    Setup,
    /// Render the next photo and go back to sleep
    Slideshow,
}

/// Retained index of the last rendered visible photo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlideshowCursor {
    last_index: i32,
}

impl Default for SlideshowCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl SlideshowCursor {
    /// Cursor before any photo has been shown
    pub const fn new() -> Self {
        Self { last_index: -1 }
    }

    pub fn last_index(&self) -> i32 {
        self.last_index
    }

    /// Apply reset semantics: keep the value only across deep sleep
    pub fn on_reset(&mut self, cause: ResetCause) {
        if !cause.retains_memory() {
            self.last_index = -1;
        }
    }

    /// Index of the photo currently on screen, if it is still in range
    pub fn current(&self, visible: usize) -> Option<usize> {
        usize::try_from(self.last_index).ok().filter(|&i| i < visible)
    }

    /// Move to the next photo of a list of `visible` photos
    ///
    /// Returns `None` and leaves the cursor alone when the list is empty.
    /// Running past the end, including after the list shrank, wraps to 0.
    pub fn advance(&mut self, visible: usize) -> Option<usize> {
        if visible == 0 {
            return None;
        }

        let next = self.last_index.saturating_add(1);
        let index = match usize::try_from(next) {
            Ok(i) if i < visible => i,
            _ => 0,
        };

        self.last_index = index as i32;
        Some(index)
    }
}

/// Slideshow order for visible photos
///
/// Upload names are epoch seconds, so numeric stems compare by value; any
/// other name sorts after them by name. Directory order is not stable across
/// renames and deletes, this is.
pub fn playlist_order(a: &PhotoEntry, b: &PhotoEntry) -> Ordering {
    fn numeric_stem(name: &str) -> Option<u64> {
        name.rsplit_once('.').and_then(|(stem, _)| stem.parse().ok())
    }

    match (numeric_stem(&a.filename), numeric_stem(&b.filename)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.filename.cmp(&b.filename)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.filename.cmp(&b.filename),
    }
}

/// Visible photos in slideshow order
pub fn playlist(mut visible: Vec<PhotoEntry>) -> Vec<PhotoEntry> {
    visible.retain(|entry| !entry.hidden);
    visible.sort_by(playlist_order);
    visible
}
