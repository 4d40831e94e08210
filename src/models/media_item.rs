use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "webp" | "gif" | "bmp" | "tiff" | "tif" => Some(Self::Image),
            "webm" | "mp4" | "mkv" | "avi" | "mov" => Some(Self::Video),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

/// Where the viewer currently is in the ordered folder listing.
///
/// Owned by the viewer; the core only reads it to compute the preload window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationCursor {
    pub current_path: PathBuf,
    pub current_index: usize,
}

impl NavigationCursor {
    pub fn new(current_path: PathBuf, current_index: usize) -> Self {
        Self {
            current_path,
            current_index,
        }
    }
}
