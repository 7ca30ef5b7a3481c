//! Greedy Non-Maximum Suppression.
//!
//! Single-Shot MultiBox Detectors (SSD) produce many overlapping candidates for every face.
//! Non-Maximum Suppression (NMS) filters these duplicates out, leaving only the candidate with the
//! highest confidence for each face.

use std::cmp::Reverse;

use crate::num::TotalF32;

use super::FaceBox;

/// A non-maximum suppression algorithm.
#[derive(Debug, Clone, Copy)]
pub struct NonMaxSuppression {
    iou_thresh: f32,
}

impl NonMaxSuppression {
    /// The default intersection-over-union threshold used to determine if two detections overlap.
    pub const DEFAULT_IOU_THRESH: f32 = 0.3;

    /// Creates a new non-maximum suppressor using [`Self::DEFAULT_IOU_THRESH`].
    pub fn new() -> Self {
        Self {
            iou_thresh: Self::DEFAULT_IOU_THRESH,
        }
    }

    /// Sets the intersection-over-union threshold above which two detections are considered to
    /// be duplicates.
    pub fn set_iou_thresh(&mut self, iou_thresh: f32) {
        self.iou_thresh = iou_thresh;
    }

    pub fn iou_thresh(&self) -> f32 {
        self.iou_thresh
    }

    /// Performs non-maximum suppression on `candidates`.
    ///
    /// The returned detections are sorted by descending confidence. Candidates with equal
    /// confidence keep their relative order.
    pub fn process(&self, mut candidates: Vec<FaceBox>) -> Vec<FaceBox> {
        // Sort by descending confidence, then flip so that the best candidate sits at the back.
        candidates.sort_by_key(|face| Reverse(TotalF32(face.confidence())));
        candidates.reverse();

        let mut accepted = Vec::new();
        while let Some(seed) = candidates.pop() {
            candidates.retain(|other| seed.rect().iou(other.rect()) <= self.iou_thresh);
            accepted.push(seed);
        }

        accepted
    }
}

impl Default for NonMaxSuppression {
    fn default() -> Self {
        Self::new()
    }
}
