//! Conversion of camera frames into network input tensors.

use std::ops::RangeInclusive;

use anyhow::bail;
use image::{imageops::FilterType, RgbImage};
use ndarray::Array4;

use crate::image::{Frame, Resolution};

enum ColorMapperKind {
    Linear { target_range: RangeInclusive<f32> },
    Standardize { mean: f32, scale: f32 },
}

/// Maps 8-bit RGB colors to the value range a network expects.
pub struct ColorMapper {
    kind: ColorMapperKind,
}

impl ColorMapper {
    /// Creates a color mapper that uniformly maps sRGB values to `target_range`.
    pub fn linear(target_range: RangeInclusive<f32>) -> Self {
        assert!(target_range.end() > target_range.start());

        Self {
            kind: ColorMapperKind::Linear { target_range },
        }
    }

    /// Creates a color mapper that computes `(value - mean) / scale` for every channel.
    pub fn standardize(mean: f32, scale: f32) -> Self {
        assert!(scale != 0.0, "color scale must not be zero");

        Self {
            kind: ColorMapperKind::Standardize { mean, scale },
        }
    }

    /// The normalization used by the UltraFace networks: `(value - 127) / 128`.
    pub fn ultraface() -> Self {
        Self::standardize(127.0, 128.0)
    }

    fn map(&self, rgb: [u8; 3]) -> [f32; 3] {
        match &self.kind {
            ColorMapperKind::Linear { target_range } => {
                let start = *target_range.start();
                let end = *target_range.end();

                let adjust_range = (end - start) / 255.0;
                rgb.map(|col| col as f32 * adjust_range + start)
            }
            ColorMapperKind::Standardize { mean, scale } => {
                rgb.map(|col| (col as f32 - mean) / scale)
            }
        }
    }
}

/// Turns [`Frame`]s into `[1, 3, H, W]` input tensors.
///
/// Frames are converted to RGB, stretched to the network's input resolution (without preserving
/// the aspect ratio), and their colors are mapped with a [`ColorMapper`].
pub struct FrameTransform {
    input_res: Resolution,
    color_mapper: ColorMapper,
}

impl FrameTransform {
    pub fn new(input_res: Resolution, color_mapper: ColorMapper) -> Self {
        assert!(!input_res.is_empty(), "network input must not be empty");
        Self {
            input_res,
            color_mapper,
        }
    }

    /// Returns the network input resolution frames are resized to.
    #[inline]
    pub fn input_resolution(&self) -> Resolution {
        self.input_res
    }

    pub fn transform(&self, frame: &Frame) -> Array4<f32> {
        let (w, h) = (self.input_res.width(), self.input_res.height());
        let mut rgb = frame.to_rgb();
        if rgb.dimensions() != (w, h) {
            rgb = image::imageops::resize(&rgb, w, h, FilterType::Triangle);
        }

        self.to_tensor(&rgb)
    }

    fn to_tensor(&self, rgb: &RgbImage) -> Array4<f32> {
        let (w, h) = rgb.dimensions();
        Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, c, y, x)| {
            self.color_mapper.map(rgb.get_pixel(x as u32, y as u32).0)[c]
        })
    }
}

/// Extracts the input resolution from an `[N, C, H, W]` tensor shape.
///
/// Only shapes with a batch size of 1 and 3 color channels are accepted.
pub fn nchw_input_resolution(shape: &[usize]) -> anyhow::Result<Resolution> {
    let (w, h) = match shape {
        [1, 3, h, w] => (*w, *h),
        _ => bail!("invalid model input shape for NCHW network: {:?}", shape),
    };

    let (w, h): (u32, u32) = (w.try_into()?, h.try_into()?);
    let res = Resolution::new(w, h);
    if res.is_empty() {
        bail!("model input resolution {} is empty", res);
    }
    Ok(res)
}
