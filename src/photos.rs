//! Photo library on removable storage
//!
//! Every `.bmp` file in the photo directory is one photo. A photo is hidden
//! from the slideshow by prefixing its file name with `.`; the name without
//! the prefix is the photo's identity, so hiding and unhiding are renames.
//!
//! Directory layout:
//! /sdcard/
//!   1700000000.bmp    - visible photo "1700000000.bmp"
//!   .1700000123.bmp   - hidden photo "1700000123.bmp"
//!
//! Listings always come from a fresh directory scan; nothing is cached.

use std::fs::{self, File, ReadDir};
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;

use thiserror::Error;

/// Extension of photo files
pub const PHOTO_EXTENSION: &str = "bmp";

/// Leading character marking a hidden photo
const HIDDEN_MARKER: char = '.';

/// Photo library error types
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("photo not found: {0}")]
    NotFound(String),

    #[error("invalid photo name: {0:?}")]
    InvalidName(String),

    #[error("photo {0} exists both hidden and visible")]
    Conflict(String),

    #[error("storage error: {0}")]
    Io(#[from] io::Error),
}

/// One photo as seen by API clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoEntry {
    /// Name without the hidden marker
    pub filename: String,
    pub hidden: bool,
    pub size: u64,
}

/// Aggregate storage figures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    pub used: u64,
    pub photos: usize,
}

/// Split a directory entry name into photo name and hidden flag
fn classify(name: &str) -> Option<(&str, bool)> {
    let (filename, hidden) = match name.strip_prefix(HIDDEN_MARKER) {
        Some(rest) => (rest, true),
        None => (name, false),
    };

    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || !ext.eq_ignore_ascii_case(PHOTO_EXTENSION) {
        return None;
    }
    Some((filename, hidden))
}

/// Reject names that are not plain photo names
fn validate(filename: &str) -> Result<(), LibraryError> {
    let invalid = filename.is_empty()
        || filename.starts_with(HIDDEN_MARKER)
        || filename.contains(['/', '\\', '\0']);
    if invalid {
        return Err(LibraryError::InvalidName(filename.to_string()));
    }
    Ok(())
}

/// A photo resolved to its current file
#[derive(Debug, Clone)]
pub struct Located {
    pub path: PathBuf,
    pub hidden: bool,
}

/// File-backed photo collection
#[derive(Debug, Clone)]
pub struct PhotoLibrary {
    root: PathBuf,
}

impl PhotoLibrary {
    /// Open the photo directory, creating it when missing
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, LibraryError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        tracing::info!("Photo library at {}", root.display());
        Ok(Self { root })
    }

    /// Scan the directory once, yielding photos in directory order
    pub fn list(&self) -> Result<Photos, LibraryError> {
        Ok(Photos {
            inner: fs::read_dir(&self.root)?,
        })
    }

    /// Visible photos only, in directory order
    pub fn visible(&self) -> Result<Vec<PhotoEntry>, LibraryError> {
        Ok(self.list()?.filter(|entry| !entry.hidden).collect())
    }

    /// Count and total size of all photos
    pub fn usage(&self) -> Result<Usage, LibraryError> {
        Ok(self.list()?.fold(Usage::default(), |acc, entry| Usage {
            used: acc.used + entry.size,
            photos: acc.photos + 1,
        }))
    }

    fn visible_path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    fn hidden_path(&self, filename: &str) -> PathBuf {
        self.root.join(format!("{}{}", HIDDEN_MARKER, filename))
    }

    /// Resolve a photo name in either visibility state
    pub fn locate(&self, filename: &str) -> Result<Located, LibraryError> {
        validate(filename)?;

        let visible = self.visible_path(filename);
        if visible.is_file() {
            return Ok(Located {
                path: visible,
                hidden: false,
            });
        }

        let hidden = self.hidden_path(filename);
        if hidden.is_file() {
            return Ok(Located { path: hidden, hidden: true });
        }

        Err(LibraryError::NotFound(filename.to_string()))
    }

    /// Read a photo's bytes and hidden flag
    pub fn read(&self, filename: &str) -> Result<(Vec<u8>, bool), LibraryError> {
        let located = self.locate(filename)?;
        let bytes = fs::read(&located.path)?;
        Ok((bytes, located.hidden))
    }

    /// Move a photo across the hidden/visible boundary
    pub fn set_hidden(&self, filename: &str, hidden: bool) -> Result<(), LibraryError> {
        validate(filename)?;

        let visible = self.visible_path(filename);
        let marked = self.hidden_path(filename);
        let (from, to) = if hidden { (visible, marked) } else { (marked, visible) };

        // rename replaces an existing target, which would drop the other copy
        match (from.is_file(), to.is_file()) {
            (true, true) => return Err(LibraryError::Conflict(filename.to_string())),
            (false, true) => {
                tracing::debug!("{} already hidden={}", filename, hidden);
                return Ok(());
            }
            (false, false) => return Err(LibraryError::NotFound(filename.to_string())),
            (true, false) => {}
        }

        fs::rename(&from, &to)?;
        tracing::info!("Set {} hidden={}", filename, hidden);
        Ok(())
    }

    /// Remove a photo in whichever visibility state it is in
    pub fn delete(&self, filename: &str) -> Result<(), LibraryError> {
        validate(filename)?;

        for path in [self.visible_path(filename), self.hidden_path(filename)] {
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::info!("Deleted photo {}", path.display());
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(LibraryError::NotFound(filename.to_string()))
    }

    /// Name for a photo uploaded at `epoch_secs`
    pub fn upload_name(epoch_secs: u64) -> String {
        format!("{}.{}", epoch_secs, PHOTO_EXTENSION)
    }

    /// Create (or truncate) the file for a new upload
    ///
    /// Two uploads within the same second share a name; the later one wins.
    pub fn create(&self, epoch_secs: u64) -> Result<(String, File), LibraryError> {
        let filename = Self::upload_name(epoch_secs);
        let file = File::create(self.visible_path(&filename))?;
        tracing::info!("Created photo {}", filename);
        Ok((filename, file))
    }

    /// Store already decoded bytes as a new photo
    pub fn create_from_bytes(&self, epoch_secs: u64, bytes: &[u8]) -> Result<String, LibraryError> {
        let (filename, mut file) = self.create(epoch_secs)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(filename)
    }
}

/// Lazy single-pass directory scan
pub struct Photos {
    inner: ReadDir,
}

impl Iterator for Photos {
    type Item = PhotoEntry;

    fn next(&mut self) -> Option<PhotoEntry> {
        for entry in self.inner.by_ref() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable directory entry: {}", e);
                    continue;
                }
            };

            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => continue,
            };

            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };

            if let Some((filename, hidden)) = classify(name) {
                return Some(PhotoEntry {
                    filename: filename.to_string(),
                    hidden,
                    size: metadata.len(),
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> (tempfile::TempDir, PhotoLibrary) {
        let dir = tempfile::tempdir().unwrap();
        let library = PhotoLibrary::open(dir.path()).unwrap();
        (dir, library)
    }

    fn names(library: &PhotoLibrary) -> Vec<(String, bool)> {
        let mut names: Vec<_> = library.list().unwrap().map(|e| (e.filename, e.hidden)).collect();
        names.sort();
        names
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("1.bmp"), Some(("1.bmp", false)));
        assert_eq!(classify(".1.bmp"), Some(("1.bmp", true)));
        assert_eq!(classify("CAT.BMP"), Some(("CAT.BMP", false)));
        assert_eq!(classify("notes.txt"), None);
        assert_eq!(classify(".bmp"), None);
        assert_eq!(classify("bmp"), None);
    }

    #[test]
    fn test_list_skips_other_files_and_dirs() {
        let (dir, library) = library();
        fs::write(dir.path().join("a.bmp"), b"aa").unwrap();
        fs::write(dir.path().join(".b.bmp"), b"bbb").unwrap();
        fs::write(dir.path().join("readme.txt"), b"x").unwrap();
        fs::create_dir(dir.path().join("sub.bmp")).unwrap();

        assert_eq!(
            names(&library),
            vec![("a.bmp".to_string(), false), ("b.bmp".to_string(), true)]
        );
        assert_eq!(library.usage().unwrap(), Usage { used: 5, photos: 2 });
        assert_eq!(library.visible().unwrap().len(), 1);
    }

    #[test]
    fn test_toggle_twice_restores_photo() {
        let (dir, library) = library();
        fs::write(dir.path().join("a.bmp"), b"data").unwrap();

        library.set_hidden("a.bmp", true).unwrap();
        assert!(dir.path().join(".a.bmp").is_file());
        assert!(!dir.path().join("a.bmp").exists());
        assert_eq!(names(&library), vec![("a.bmp".to_string(), true)]);

        library.set_hidden("a.bmp", false).unwrap();
        assert!(dir.path().join("a.bmp").is_file());
        assert_eq!(names(&library), vec![("a.bmp".to_string(), false)]);
        assert_eq!(library.read("a.bmp").unwrap(), (b"data".to_vec(), false));
    }

    #[test]
    fn test_set_hidden_is_idempotent_and_reports_missing() {
        let (dir, library) = library();
        fs::write(dir.path().join("a.bmp"), b"data").unwrap();

        library.set_hidden("a.bmp", false).unwrap();
        assert!(matches!(
            library.set_hidden("missing.bmp", true),
            Err(LibraryError::NotFound(_))
        ));
    }

    #[test]
    fn test_set_hidden_keeps_both_copies_on_conflict() {
        let (dir, library) = library();
        fs::write(dir.path().join("a.bmp"), b"visible").unwrap();
        fs::write(dir.path().join(".a.bmp"), b"hidden").unwrap();

        for hidden in [true, false] {
            assert!(matches!(
                library.set_hidden("a.bmp", hidden),
                Err(LibraryError::Conflict(_))
            ));
        }
        assert_eq!(fs::read(dir.path().join("a.bmp")).unwrap(), b"visible");
        assert_eq!(fs::read(dir.path().join(".a.bmp")).unwrap(), b"hidden");
    }

    #[test]
    fn test_delete_either_state() {
        let (dir, library) = library();
        fs::write(dir.path().join("a.bmp"), b"a").unwrap();
        fs::write(dir.path().join(".b.bmp"), b"b").unwrap();

        library.delete("a.bmp").unwrap();
        library.delete("b.bmp").unwrap();
        assert!(names(&library).is_empty());
        assert!(matches!(library.delete("a.bmp"), Err(LibraryError::NotFound(_))));
    }

    #[test]
    fn test_names_are_validated() {
        let (_dir, library) = library();
        for name in ["", ".a.bmp", "../a.bmp", "x/y.bmp"] {
            assert!(
                matches!(library.locate(name), Err(LibraryError::InvalidName(_))),
                "{:?}",
                name
            );
        }
    }

    #[test]
    fn test_create_from_bytes() {
        let (_dir, library) = library();
        let name = library.create_from_bytes(1_700_000_000, b"BM123").unwrap();
        assert_eq!(name, "1700000000.bmp");
        assert_eq!(library.read(&name).unwrap(), (b"BM123".to_vec(), false));

        // Same second overwrites
        library.create_from_bytes(1_700_000_000, b"BM4").unwrap();
        assert_eq!(library.read(&name).unwrap().0, b"BM4".to_vec());
    }
}
