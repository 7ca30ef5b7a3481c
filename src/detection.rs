//! Post-processing of raw UltraFace network outputs.
//!
//! The network produces a score pair `(background, face)` and four box values for every
//! candidate. [`PostProcessor`] turns these flat arrays into a short list of [`FaceBox`]es by
//! filtering low-confidence candidates, optionally decoding anchor offsets, running
//! [`NonMaxSuppression`] and capping the result count.

pub mod nms;
pub mod ssd;

use anyhow::ensure;
use itertools::Itertools;

use crate::{image::Resolution, nn::ModelSource, num::clip, rect::BoundingBox};

use self::{nms::NonMaxSuppression, ssd::PriorAnchors};

/// A detected face.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    rect: BoundingBox,
    confidence: f32,
    label: Option<String>,
}

impl FaceBox {
    pub fn new(rect: BoundingBox, confidence: f32) -> Self {
        Self {
            rect,
            confidence,
            label: None,
        }
    }

    /// Attaches a label to this detection.
    #[must_use]
    pub fn with_label<L: Into<String>>(mut self, label: L) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Returns the bounding box of the face.
    ///
    /// Whether the box is in normalized or pixel coordinates depends on the detector that
    /// produced it, see [`crate::detector::BoxUnits`].
    #[inline]
    pub fn rect(&self) -> &BoundingBox {
        &self.rect
    }

    /// Returns the detection confidence, in range `[0, 1]`.
    #[inline]
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn set_label(&mut self, label: Option<String>) {
        self.label = label;
    }

    /// Applies a transformation to the bounding box, keeping confidence and label.
    #[must_use]
    pub fn map_rect(mut self, f: impl FnOnce(BoundingBox) -> BoundingBox) -> Self {
        self.rect = f(self.rect);
        self
    }
}

/// Configuration of a face detector.
///
/// Immutable once handed to a detector.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    confidence_threshold: f32,
    iou_threshold: f32,
    max_faces: usize,
    input_resolution: Resolution,
    model: Option<ModelSource>,
}

impl DetectorConfig {
    pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.7;
    pub const DEFAULT_IOU_THRESHOLD: f32 = NonMaxSuppression::DEFAULT_IOU_THRESH;
    pub const DEFAULT_MAX_FACES: usize = 200;

    /// Creates a detector configuration.
    ///
    /// Both thresholds must lie in `[0, 1]` and `max_faces` must be at least 1. The input
    /// resolution defaults to 320x240 and no model is set.
    pub fn new(
        confidence_threshold: f32,
        iou_threshold: f32,
        max_faces: usize,
    ) -> anyhow::Result<Self> {
        ensure!(
            (0.0..=1.0).contains(&confidence_threshold),
            "confidence threshold must be in range 0..=1, got {}",
            confidence_threshold
        );
        ensure!(
            (0.0..=1.0).contains(&iou_threshold),
            "IoU threshold must be in range 0..=1, got {}",
            iou_threshold
        );
        ensure!(max_faces > 0, "`max_faces` must be at least 1");

        Ok(Self {
            confidence_threshold,
            iou_threshold,
            max_faces,
            input_resolution: Resolution::ULTRAFACE_320,
            model: None,
        })
    }

    /// Sets the network input resolution that frames are resized to.
    #[must_use]
    pub fn with_input_resolution(mut self, input_resolution: Resolution) -> Self {
        self.input_resolution = input_resolution;
        self
    }

    /// Sets the model that is loaded when no explicit model is passed to
    /// [`FaceDetector::load_model`](crate::detector::FaceDetector::load_model).
    #[must_use]
    pub fn with_model(mut self, model: ModelSource) -> Self {
        self.model = Some(model);
        self
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn iou_threshold(&self) -> f32 {
        self.iou_threshold
    }

    pub fn max_faces(&self) -> usize {
        self.max_faces
    }

    pub fn input_resolution(&self) -> Resolution {
        self.input_resolution
    }

    pub fn model(&self) -> Option<&ModelSource> {
        self.model.as_ref()
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: Self::DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: Self::DEFAULT_IOU_THRESHOLD,
            max_faces: Self::DEFAULT_MAX_FACES,
            input_resolution: Resolution::ULTRAFACE_320,
            model: None,
        }
    }
}

/// How the box values of the network output are interpreted.
#[derive(Debug, Clone, Copy)]
pub enum Decoding<'a> {
    /// Boxes are normalized `(x0, y0, x1, y1)` corners and are used as-is.
    Direct,
    /// Boxes are offsets relative to the matching prior anchor. Decoded boxes are scaled to the
    /// pixel size of the original `frame`.
    Anchored {
        priors: &'a PriorAnchors,
        frame: Resolution,
    },
}

/// Turns raw network outputs into a list of faces.
#[derive(Debug, Clone)]
pub struct PostProcessor {
    confidence_threshold: f32,
    max_faces: usize,
    nms: NonMaxSuppression,
}

impl PostProcessor {
    pub fn new(config: &DetectorConfig) -> Self {
        let mut nms = NonMaxSuppression::new();
        nms.set_iou_thresh(config.iou_threshold());
        Self {
            confidence_threshold: config.confidence_threshold(),
            max_faces: config.max_faces(),
            nms,
        }
    }

    /// Filters, decodes and deduplicates the candidates of one inference pass.
    ///
    /// `confidences` holds 2 values per candidate, `boxes` holds 4. The result is sorted by
    /// descending confidence and holds at most `max_faces` entries.
    ///
    /// # Panics
    ///
    /// Panics if the array lengths don't describe the same number of candidates, or if the number
    /// of priors passed with [`Decoding::Anchored`] differs from the candidate count.
    pub fn postprocess(
        &self,
        confidences: &[f32],
        boxes: &[f32],
        decoding: Decoding<'_>,
    ) -> Vec<FaceBox> {
        let candidates = self.filter(confidences, boxes, decoding);
        let mut faces = self.nms.process(candidates);
        faces.truncate(self.max_faces);
        faces
    }

    /// Extracts all valid, finite candidates whose face score exceeds the confidence threshold.
    ///
    /// Confidences of the returned candidates are clipped into `[0, 1]`. Output order matches
    /// candidate order.
    pub fn filter(
        &self,
        confidences: &[f32],
        boxes: &[f32],
        decoding: Decoding<'_>,
    ) -> Vec<FaceBox> {
        assert_eq!(
            confidences.len() % 2,
            0,
            "confidence array length must be a multiple of 2"
        );
        let count = confidences.len() / 2;
        assert_eq!(
            boxes.len(),
            count * 4,
            "box array does not match confidence array ({} candidates)",
            count
        );
        if let Decoding::Anchored { priors, .. } = decoding {
            assert_eq!(
                priors.anchor_count(),
                count,
                "prior count does not match network candidate count"
            );
        }

        let mut candidates = Vec::new();
        for (i, (scores, coords)) in confidences
            .chunks_exact(2)
            .zip_eq(boxes.chunks_exact(4))
            .enumerate()
        {
            let score = scores[1];
            if score > self.confidence_threshold {
                let coords = [coords[0], coords[1], coords[2], coords[3]];
                let rect = match decoding {
                    Decoding::Direct => {
                        BoundingBox::new(coords[0], coords[1], coords[2], coords[3])
                    }
                    Decoding::Anchored { priors, frame } => {
                        priors[i].decode(coords).denormalize(frame)
                    }
                };

                if !rect.is_valid() || !rect.is_finite() {
                    log::trace!("discarding invalid candidate #{}: {:?}", i, rect);
                    continue;
                }

                candidates.push(FaceBox::new(rect, clip(score, 1.0)));
            }
        }

        candidates
    }
}
