//! Full-resolution decoding from the filesystem.

use std::future::Future;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use image::codecs::gif::GifDecoder;
use image::AnimationDecoder;
use image::{DynamicImage, ImageFormat};

use crate::error::DecodeError;
use crate::image_cache::ImageDecoder;

pub fn open_image(path: &Path) -> Result<DynamicImage> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read image: {:?}", path))?;
    let format = image::guess_format(&bytes).ok();

    if format == Some(ImageFormat::Gif) {
        let decoder = GifDecoder::new(Cursor::new(bytes))
            .with_context(|| format!("Failed to decode GIF: {:?}", path))?;
        let mut frames = decoder.into_frames();
        if let Some(frame) = frames.next() {
            let frame = frame.context("Failed to decode GIF frame")?;
            return Ok(DynamicImage::ImageRgba8(frame.into_buffer()));
        }
        return Err(anyhow!("GIF has no frames: {:?}", path));
    }

    match format {
        Some(fmt) => image::load_from_memory_with_format(&bytes, fmt)
            .with_context(|| format!("Failed to decode image: {:?}", path)),
        None => image::load_from_memory(&bytes)
            .with_context(|| format!("Failed to decode image: {:?}", path)),
    }
}

/// A decoded full-resolution image in RGBA8.
pub struct DecodedImage {
    pub path: PathBuf,
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl DecodedImage {
    pub fn byte_size(&self) -> usize {
        self.rgba.len()
    }
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("path", &self.path)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

fn decode_rgba(path: &Path) -> Result<DecodedImage> {
    let img = open_image(path)?;
    let rgba = img.to_rgba8();
    Ok(DecodedImage {
        path: path.to_path_buf(),
        width: rgba.width(),
        height: rgba.height(),
        rgba: rgba.into_raw(),
    })
}

/// Decodes files on tokio's blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileDecoder;

impl ImageDecoder for FileDecoder {
    type Handle = Arc<DecodedImage>;

    fn decode(
        &self,
        path: PathBuf,
    ) -> impl Future<Output = Result<Self::Handle, DecodeError>> + Send {
        async move {
            let task_path = path.clone();
            match tokio::task::spawn_blocking(move || decode_rgba(&task_path)).await {
                Ok(Ok(decoded)) => Ok(Arc::new(decoded)),
                Ok(Err(e)) => Err(DecodeError::new(path, format!("{e:#}"))),
                Err(e) => Err(DecodeError::new(path, format!("decode task panicked: {e}"))),
            }
        }
    }
}
