//! UltraFace face detection core.
//!
//! This crate turns the raw output of an UltraFace face detection network into a stable list of
//! face bounding boxes, and estimates the camera-to-face distance from a detected box.
//!
//! The network itself is treated as an opaque function (see [`nn::InferenceEngine`]). Everything
//! around it is implemented here:
//!
//! * [`nn::transform`] converts camera frames into the network's input tensor.
//! * [`detection`] filters, decodes and deduplicates the network's candidate boxes.
//! * [`detection::ssd`] generates the prior anchors needed by networks that output raw offsets.
//! * [`detector`] ties it all together behind the [`detector::FaceDetector`] trait.
//! * [`distance`] estimates distances with a pinhole camera model.
//! * [`control`] and [`flight`] implement a frame-dropping, single-flight detection loop.
//!
//! # Coordinates
//!
//! Bounding boxes are in corner form (`x0, y0, x1, y1`) with Y pointing down. Depending on the
//! detector they are either normalized to `[0, 1]` or in pixels of the source frame, see
//! [`detector::BoxUnits`].
//!
//! # Environment Variables
//!
//! * `ULTRAFACE_ONNX_BACKEND`: Selects the inference backend used by detectors that were not given
//!   an explicit [`nn::Backend`]. Allowed values are:
//!   * `tract` (default): uses the pure-Rust [tract] inference engine.
//!   * `onnxruntime` or `ort`: uses [ONNX Runtime] (requires the `onnxruntime` cargo feature).
//!
//! [tract]: https://github.com/sonos/tract
//! [ONNX Runtime]: https://onnxruntime.ai/

use log::LevelFilter;

pub mod control;
pub mod detection;
pub mod detector;
pub mod distance;
pub mod drop;
pub mod flight;
pub mod image;
pub mod nn;
pub mod num;
pub mod rect;
mod resolution;
pub mod timer;

#[cfg(test)]
mod test;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = LevelFilter::Debug;
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_PKG_NAME")), log_level)
        .filter(Some("tract_onnx"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// The calling crate and this crate will log at *debug* level, `tract` at *warn* level. The
/// `RUST_LOG` environment variable can override these defaults.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
