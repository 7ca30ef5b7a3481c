//! Monocular camera-to-face distance estimation.
//!
//! Uses a pinhole camera approximation: the apparent height of a face is inversely proportional
//! to its distance from the camera. The proportionality constant (the "focal length") is derived
//! from a single calibration measurement.

use anyhow::ensure;

use crate::rect::BoundingBox;

/// Calibration of a [`DistanceEstimator`].
///
/// Describes one reference observation: a face of height `reference_face_height_cm`, seen from
/// `reference_distance_cm` away, covers `reference_face_height_fraction` of the frame height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceEstimatorConfig {
    reference_face_height_cm: f32,
    reference_face_height_fraction: f32,
    reference_distance_cm: f32,
}

impl DistanceEstimatorConfig {
    /// Creates a calibration from a reference observation.
    ///
    /// All values must be finite and greater than 0.
    pub fn new(
        reference_face_height_cm: f32,
        reference_face_height_fraction: f32,
        reference_distance_cm: f32,
    ) -> anyhow::Result<Self> {
        for (name, value) in [
            ("reference face height", reference_face_height_cm),
            ("reference face height fraction", reference_face_height_fraction),
            ("reference distance", reference_distance_cm),
        ] {
            ensure!(
                value.is_finite() && value > 0.0,
                "{} must be a positive number, got {}",
                name,
                value
            );
        }

        Ok(Self {
            reference_face_height_cm,
            reference_face_height_fraction,
            reference_distance_cm,
        })
    }

    pub fn reference_face_height_cm(&self) -> f32 {
        self.reference_face_height_cm
    }

    pub fn reference_face_height_fraction(&self) -> f32 {
        self.reference_face_height_fraction
    }

    pub fn reference_distance_cm(&self) -> f32 {
        self.reference_distance_cm
    }
}

impl Default for DistanceEstimatorConfig {
    fn default() -> Self {
        Self {
            reference_face_height_cm: 20.0,
            reference_face_height_fraction: 0.75,
            reference_distance_cm: 30.0,
        }
    }
}

/// Estimates the distance of a face from the camera based on the height of its bounding box.
#[derive(Debug, Clone, Copy)]
pub struct DistanceEstimator {
    reference_face_height_cm: f32,
    focal_length: f32,
}

impl DistanceEstimator {
    pub fn new(config: &DistanceEstimatorConfig) -> Self {
        let focal_length = config.reference_distance_cm * config.reference_face_height_fraction
            / config.reference_face_height_cm;
        log::trace!("distance estimator focal length: {}", focal_length);

        Self {
            reference_face_height_cm: config.reference_face_height_cm,
            focal_length,
        }
    }

    pub fn focal_length(&self) -> f32 {
        self.focal_length
    }

    /// Computes the distance (in cm) of the face in `bb`.
    ///
    /// `bb` must be in normalized frame coordinates, like the calibration fraction. Returns 0 if
    /// no box is given, if the box is invalid or has no height, and whenever the distance would
    /// not be a finite number.
    pub fn compute_distance<'a>(&self, bb: impl Into<Option<&'a BoundingBox>>) -> f32 {
        let Some(bb) = bb.into() else { return 0.0 };
        // `is_valid` admits zero height, which would divide by zero
        if !bb.is_valid() || bb.height() <= 0.0 {
            return 0.0;
        }

        let distance = self.focal_length * self.reference_face_height_cm / bb.height();
        if !distance.is_finite() {
            log::trace!("distance of {:?} is not finite, reporting 0", bb);
            return 0.0;
        }
        distance
    }
}

impl Default for DistanceEstimator {
    fn default() -> Self {
        Self::new(&DistanceEstimatorConfig::default())
    }
}
