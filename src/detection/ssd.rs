//! Prior anchor generation for Single Shot MultiBox Detectors (SSDs).
//!
//! The anchor-decoded UltraFace variant predicts offsets relative to a fixed grid of prior boxes.
//! The grid only depends on the network input resolution and the layer configuration, so it is
//! computed once when the model is loaded and shared by all detection passes afterwards.

use std::ops::Index;

use itertools::iproduct;

use crate::{image::Resolution, num::clip, rect::BoundingBox};

/// Scales the predicted center offsets.
pub const CENTER_VARIANCE: f32 = 0.1;
/// Scales the predicted (log-space) size offsets.
pub const SIZE_VARIANCE: f32 = 0.2;

/// A prior box, in normalized coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorAnchor {
    // all values range from 0 to 1
    x_center: f32,
    y_center: f32,
    width: f32,
    height: f32,
}

impl PriorAnchor {
    pub fn x_center(&self) -> f32 {
        self.x_center
    }

    pub fn y_center(&self) -> f32 {
        self.y_center
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    /// Decodes the network's `[dcx, dcy, dw, dh]` prediction for this prior into a normalized box.
    ///
    /// All coordinates of the returned box are clipped into `[0, 1]`.
    pub fn decode(&self, [dcx, dcy, dw, dh]: [f32; 4]) -> BoundingBox {
        let x_center = dcx * CENTER_VARIANCE * self.width + self.x_center;
        let y_center = dcy * CENTER_VARIANCE * self.height + self.y_center;
        let w = (dw * SIZE_VARIANCE).exp() * self.width;
        let h = (dh * SIZE_VARIANCE).exp() * self.height;

        BoundingBox::new(
            clip(x_center - w / 2.0, 1.0),
            clip(y_center - h / 2.0, 1.0),
            clip(x_center + w / 2.0, 1.0),
            clip(y_center + h / 2.0, 1.0),
        )
    }
}

/// Describes an output layer (feature map) of an SSD network.
#[derive(Debug, Clone)]
pub struct LayerInfo {
    /// Downscaling factor of this layer's feature map relative to the network input.
    stride: u32,
    /// Sizes (in input pixels) of the square prior boxes centered on each feature map cell.
    min_boxes: Vec<f32>,
}

impl LayerInfo {
    /// Creates a new SSD layer description.
    ///
    /// # Parameters
    ///
    /// - `stride`: downscaling factor of the feature map. Must be non-zero.
    /// - `min_boxes`: sizes of the prior boxes generated for every feature map cell, in input
    ///   pixels. Must not be empty.
    pub fn new<B: Into<Vec<f32>>>(stride: u32, min_boxes: B) -> Self {
        let min_boxes = min_boxes.into();
        assert_ne!(stride, 0);
        assert!(!min_boxes.is_empty(), "SSD layer needs at least one box size");
        Self { stride, min_boxes }
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn min_boxes(&self) -> &[f32] {
        &self.min_boxes
    }

    /// Computes the feature map size of this layer for a network with input size `input_res`.
    pub fn feature_map_size(&self, input_res: Resolution) -> Resolution {
        Resolution::new(
            (input_res.width() + self.stride - 1) / self.stride,
            (input_res.height() + self.stride - 1) / self.stride,
        )
    }

    /// Returns the layer configuration shared by all published UltraFace networks.
    pub fn ultraface() -> Vec<LayerInfo> {
        vec![
            LayerInfo::new(8, [10.0, 16.0, 24.0]),
            LayerInfo::new(16, [32.0, 48.0]),
            LayerInfo::new(32, [64.0, 96.0]),
            LayerInfo::new(64, [128.0, 192.0, 256.0]),
        ]
    }
}

pub struct AnchorParams<'a> {
    /// Resolution of the network input.
    pub input_res: Resolution,
    /// List of output layers.
    pub layers: &'a [LayerInfo],
}

/// The full, ordered list of prior anchors of a network.
///
/// Anchor `i` corresponds to candidate `i` of the network output.
#[derive(Debug, Clone)]
pub struct PriorAnchors {
    anchors: Vec<PriorAnchor>,
}

impl PriorAnchors {
    pub fn calculate(params: &AnchorParams<'_>) -> Self {
        let input_w = params.input_res.width() as f32;
        let input_h = params.input_res.height() as f32;
        let mut anchors = Vec::new();

        for layer in params.layers {
            let fm = layer.feature_map_size(params.input_res);
            let scale_w = input_w / layer.stride as f32;
            let scale_h = input_h / layer.stride as f32;

            for (y, x, &size) in iproduct!(0..fm.height(), 0..fm.width(), &layer.min_boxes) {
                anchors.push(PriorAnchor {
                    x_center: clip((x as f32 + 0.5) / scale_w, 1.0),
                    y_center: clip((y as f32 + 0.5) / scale_h, 1.0),
                    width: clip(size / input_w, 1.0),
                    height: clip(size / input_h, 1.0),
                });
            }
        }

        Self { anchors }
    }

    /// Computes the priors of an UltraFace network with the given input resolution.
    pub fn ultraface(input_res: Resolution) -> Self {
        Self::calculate(&AnchorParams {
            input_res,
            layers: &LayerInfo::ultraface(),
        })
    }

    /// Returns the total number of SSD anchors/priors.
    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PriorAnchor> {
        self.anchors.iter()
    }
}

impl Index<usize> for PriorAnchors {
    type Output = PriorAnchor;

    fn index(&self, index: usize) -> &PriorAnchor {
        &self.anchors[index]
    }
}
