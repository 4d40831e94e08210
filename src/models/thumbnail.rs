use std::path::PathBuf;
use std::sync::Arc;

/// Quality tier of a thumbnail artifact.
///
/// Ordered from worst to best: a cheap fast-tier preview, a high-quality
/// artifact loaded from an existing cache, and a freshly generated
/// high-quality artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    Fast,
    CacheHit,
    Dct,
}

impl Tier {
    /// Whether this tier belongs to the high-quality pipeline phase.
    pub fn is_quality(self) -> bool {
        matches!(self, Tier::CacheHit | Tier::Dct)
    }
}

/// Shared handle to thumbnail pixels. Cloning never copies the buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelPayload(Arc<[u8]>);

impl PixelPayload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }

    pub fn empty() -> Self {
        Self(Arc::from(Vec::new()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for PixelPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PixelPayload({} bytes)", self.0.len())
    }
}

/// Lightweight EXIF fields shown next to a thumbnail. Never used for pipeline decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExifSubset {
    pub orientation: Option<u16>,
    pub captured_at: Option<String>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
}

/// Best known thumbnail for one path.
#[derive(Debug, Clone)]
pub struct ThumbnailRecord {
    pub path: PathBuf,
    /// RGBA8 pixels, `width * height * 4` bytes.
    pub payload: PixelPayload,
    pub width: u32,
    pub height: u32,
    pub tier: Tier,
    pub exif: Option<ExifSubset>,
}

impl ThumbnailRecord {
    pub fn new(path: PathBuf, payload: PixelPayload, width: u32, height: u32, tier: Tier) -> Self {
        Self {
            path,
            payload,
            width,
            height,
            tier,
            exif: None,
        }
    }
}
