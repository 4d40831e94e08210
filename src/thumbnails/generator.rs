//! Thumbnail renditions using the image crate.
//!
//! Fast renditions are small and stay in memory. Quality renditions are
//! approximately 256px high and are also written to disk as JPEG.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use tracing::debug;

use crate::image_loader::open_image;
use crate::models::{PixelPayload, ThumbnailRecord, Tier};

/// Target height of high-quality thumbnails in pixels.
pub const DEFAULT_THUMB_HEIGHT: u32 = 256;

/// Target height of fast-tier thumbnails in pixels.
pub const FAST_THUMB_HEIGHT: u32 = 96;

/// Minimum width for thumbnails (to handle extreme aspect ratios).
const MIN_THUMB_WIDTH: u32 = 64;

/// Maximum width for thumbnails (to handle extreme panoramas).
const MAX_THUMB_WIDTH: u32 = 1024;

/// JPEG quality for persisted thumbnails (0-100).
const JPEG_QUALITY: u8 = 85;

/// RGBA8 pixels of a thumbnail.
#[derive(Debug, Clone)]
pub struct Rendition {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Rendition {
    pub fn from_image(img: &DynamicImage) -> Self {
        let rgba = img.to_rgba8();
        Self {
            width: rgba.width(),
            height: rgba.height(),
            rgba: rgba.into_raw(),
        }
    }

    pub fn into_record(self, path: PathBuf, tier: Tier) -> ThumbnailRecord {
        ThumbnailRecord::new(
            path,
            PixelPayload::new(self.rgba),
            self.width,
            self.height,
            tier,
        )
    }
}

pub struct ThumbnailGenerator;

impl ThumbnailGenerator {
    /// Cheap downscale of `src` for the fast tier. Nothing touches the disk.
    pub fn fast(src: &Path, target_height: u32) -> Result<Rendition> {
        let img = open_image(src)?;
        let (src_width, src_height) = img.dimensions();
        let (width, height) = Self::calculate_dimensions(src_width, src_height, target_height);

        let thumbnail = img.thumbnail_exact(width, height);
        Ok(Rendition::from_image(&thumbnail))
    }

    /// High-quality downscale of `src`, saved to `dst` as JPEG.
    pub fn quality(src: &Path, dst: &Path, target_height: u32) -> Result<Rendition> {
        debug!(?src, ?dst, target_height, "Generating thumbnail");

        let img = open_image(src)?;
        let (src_width, src_height) = img.dimensions();
        let (thumb_width, thumb_height) =
            Self::calculate_dimensions(src_width, src_height, target_height);

        debug!(
            src_width,
            src_height, thumb_width, thumb_height, "Calculated thumbnail dimensions"
        );

        // CatmullRom: good quality/speed balance for downscaling
        let thumbnail = img.resize_exact(thumb_width, thumb_height, FilterType::CatmullRom);

        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create thumbnail directory: {:?}", parent))?;
        }
        Self::save_thumbnail(&thumbnail, dst)?;

        Ok(Rendition::from_image(&thumbnail))
    }

    /// Thumbnail dimensions preserving aspect ratio.
    ///
    /// The target height is the base. Width is clamped to
    /// MIN_THUMB_WIDTH..MAX_THUMB_WIDTH and the height follows the clamp.
    pub fn calculate_dimensions(src_width: u32, src_height: u32, target_height: u32) -> (u32, u32) {
        if src_height == 0 || src_width == 0 {
            return (target_height, target_height);
        }

        // No upscaling
        let effective_height = target_height.min(src_height);

        let aspect_ratio = src_width as f64 / src_height as f64;
        let calculated_width = (effective_height as f64 * aspect_ratio).round() as u32;
        let final_width = calculated_width.clamp(MIN_THUMB_WIDTH, MAX_THUMB_WIDTH);

        let final_height = if final_width != calculated_width {
            (final_width as f64 / aspect_ratio).round() as u32
        } else {
            effective_height
        };

        (final_width.max(1), final_height.max(1))
    }

    fn save_thumbnail(img: &DynamicImage, dst: &Path) -> Result<()> {
        let file = File::create(dst)
            .with_context(|| format!("Failed to create thumbnail file: {:?}", dst))?;
        let mut writer = BufWriter::new(file);

        // JPEG has no alpha channel
        let rgb_img = img.to_rgb8();
        let encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
        rgb_img
            .write_with_encoder(encoder)
            .with_context(|| format!("Failed to encode thumbnail: {:?}", dst))?;

        debug!(?dst, "Saved thumbnail");
        Ok(())
    }
}
