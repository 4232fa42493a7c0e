//! Source items selected for burning
//!
//! A [`MediaItem`] is either a single file or a directory tree. Both report
//! their size on disc (rounded up to whole sectors per file) and know how to
//! add themselves to a file-system image.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{JobError, round_to_sector, sectors_for};
use crate::device::{EngineError, ImageEngine};

/// Icon hint for displaying an item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemIcon {
    /// A file, keyed by its lowercase extension
    File { extension: Option<String> },
    Folder,
}

/// A file or directory queued for the disc
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaItem {
    File {
        path: PathBuf,
        /// Size in bytes when the item was added
        size: u64,
    },
    Directory {
        path: PathBuf,
        /// Sum of the sector-rounded sizes of every file below `path`
        size_on_disc: u64,
        file_count: usize,
    },
}

impl MediaItem {
    /// Create an item for a path, picking the variant from the file system
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, JobError> {
        let path = path.into();
        if path.is_dir() {
            Self::directory(path)
        } else {
            Self::file(path)
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Result<Self, JobError> {
        let path = path.into();
        let metadata = fs::metadata(&path)
            .map_err(|e| JobError::Io(format!("Cannot read {}: {}", path.display(), e)))?;
        if !metadata.is_file() {
            return Err(JobError::Io(format!("Not a file: {}", path.display())));
        }
        Ok(MediaItem::File {
            path,
            size: metadata.len(),
        })
    }

    pub fn directory(path: impl Into<PathBuf>) -> Result<Self, JobError> {
        let path = path.into();
        if !path.is_dir() {
            return Err(JobError::Io(format!("Not a directory: {}", path.display())));
        }

        let mut size_on_disc = 0;
        let mut file_count = 0;
        for entry in WalkDir::new(&path).min_depth(1) {
            let entry =
                entry.map_err(|e| JobError::Io(format!("Cannot scan {}: {}", path.display(), e)))?;
            if entry.path().is_file() {
                let len = fs::metadata(entry.path())
                    .map_err(|e| {
                        JobError::Io(format!("Cannot read {}: {}", entry.path().display(), e))
                    })?
                    .len();
                size_on_disc += round_to_sector(len);
                file_count += 1;
            }
        }

        log::debug!(
            "Scanned {}: {} file(s), {} bytes on disc",
            path.display(),
            file_count,
            size_on_disc
        );

        Ok(MediaItem::Directory {
            path,
            size_on_disc,
            file_count,
        })
    }

    pub fn path(&self) -> &Path {
        match self {
            MediaItem::File { path, .. } | MediaItem::Directory { path, .. } => path,
        }
    }

    /// Name the item gets at the root of the disc
    pub fn display_name(&self) -> String {
        self.path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path().display().to_string())
    }

    /// Size the item occupies on the disc, always a multiple of the sector size
    pub fn size_on_disc(&self) -> u64 {
        match self {
            MediaItem::File { size, .. } => round_to_sector(*size),
            MediaItem::Directory { size_on_disc, .. } => *size_on_disc,
        }
    }

    pub fn sectors(&self) -> u64 {
        sectors_for(self.size_on_disc())
    }

    pub fn icon(&self) -> ItemIcon {
        match self {
            MediaItem::File { path, .. } => ItemIcon::File {
                extension: path
                    .extension()
                    .map(|e| e.to_string_lossy().to_lowercase()),
            },
            MediaItem::Directory { .. } => ItemIcon::Folder,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, MediaItem::Directory { .. })
    }

    /// Add this item under the image root.
    ///
    /// Directories are walked again at this point, in file-name order, so the
    /// image reflects the tree as it is when the job runs.
    pub fn add_to_image(&self, image: &mut dyn ImageEngine) -> Result<(), EngineError> {
        let name = self.display_name();
        match self {
            MediaItem::File { path, .. } => image.add_file(&name, path),
            MediaItem::Directory { path, .. } => {
                image.add_directory(&name)?;
                for entry in WalkDir::new(path).min_depth(1).sort_by_file_name() {
                    let entry = entry.map_err(std::io::Error::from)?;
                    let relative = entry
                        .path()
                        .strip_prefix(path)
                        .unwrap_or(entry.path());
                    let image_path = image_path_for(&name, relative);

                    if entry.file_type().is_dir() {
                        image.add_directory(&image_path)?;
                    } else if entry.path().is_file() {
                        image.add_file(&image_path, entry.path())?;
                    } else {
                        log::debug!("Skipping {}", entry.path().display());
                    }
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for MediaItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// Image path of a descendant: `root/a/b` with `/` separators on every host
fn image_path_for(root: &str, relative: &Path) -> String {
    let mut image_path = root.to_string();
    for component in relative.components() {
        image_path.push('/');
        image_path.push_str(&component.as_os_str().to_string_lossy());
    }
    image_path
}
