//! Raw camera and photo frames.
//!
//! Camera pipelines hand out frames in whatever channel order the platform prefers (typically
//! BGRA). [`Frame`] stores such a buffer without converting it; the conversion into the
//! network's color order happens in [`crate::nn::transform`].

use std::{fmt, path::Path};

use anyhow::{bail, Context};
use image::{DynamicImage, Rgb, RgbImage};

pub use crate::resolution::Resolution;

/// Channel layout of a [`Frame`]'s pixel data. All formats use 8 bits per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Bgr8,
    Bgra8,
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    /// Returns the number of channels (and bytes) per pixel.
    #[inline]
    pub fn channels(self) -> usize {
        match self {
            Self::Bgr8 | Self::Rgb8 => 3,
            Self::Bgra8 | Self::Rgba8 => 4,
        }
    }

    /// Extracts the `[r, g, b]` components of a single pixel.
    #[inline]
    fn rgb(self, px: &[u8]) -> [u8; 3] {
        match self {
            Self::Bgr8 | Self::Bgra8 => [px[2], px[1], px[0]],
            Self::Rgb8 | Self::Rgba8 => [px[0], px[1], px[2]],
        }
    }
}

/// An owned, tightly packed 8-bit image in one of the supported [`PixelFormat`]s.
///
/// Frames are never empty: both dimensions are at least 1.
#[derive(Clone)]
pub struct Frame {
    resolution: Resolution,
    format: PixelFormat,
    data: Vec<u8>,
}

impl Frame {
    /// Creates a frame from a raw pixel buffer.
    ///
    /// Rows must be tightly packed, so `data` has to be exactly
    /// `width * height * format.channels()` bytes long.
    pub fn from_raw(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> anyhow::Result<Self> {
        let resolution = Resolution::new(width, height);
        if resolution.is_empty() {
            bail!("cannot create empty frame of size {}", resolution);
        }

        let expected = resolution.num_pixels() as usize * format.channels();
        if data.len() != expected {
            bail!(
                "{:?} frame of size {} needs {} bytes of data, got {}",
                format,
                resolution,
                expected,
                data.len()
            );
        }

        Ok(Self {
            resolution,
            format,
            data,
        })
    }

    /// Creates a frame by copying the pixels of a decoded image.
    pub fn from_image(image: &DynamicImage) -> anyhow::Result<Self> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self::from_raw(width, height, PixelFormat::Rgb8, rgb.into_raw())
    }

    /// Loads and decodes an image file.
    ///
    /// The format is determined from the file extension; JPEG and PNG are supported.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Self::load_impl(path.as_ref())
    }

    fn load_impl(path: &Path) -> anyhow::Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("failed to load image '{}'", path.display()))?;
        Self::from_image(&image)
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.resolution.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.resolution.height()
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Returns the raw pixel data.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Converts this frame to a 3-channel RGB image, dropping any alpha channel.
    pub fn to_rgb(&self) -> RgbImage {
        let channels = self.format.channels();
        let width = self.width();
        RgbImage::from_fn(width, self.height(), |x, y| {
            let start = (y as usize * width as usize + x as usize) * channels;
            Rgb(self.format.rgb(&self.data[start..start + channels]))
        })
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("resolution", &self.resolution)
            .field("format", &self.format)
            .finish()
    }
}
