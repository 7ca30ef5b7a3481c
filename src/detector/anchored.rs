//! UltraFace variant that decodes raw prior anchor offsets.
//!
//! Some exports of the UltraFace networks stop before the box decoding layers, so their box
//! output contains `(dcx, dcy, dw, dh)` offsets relative to a fixed grid of prior anchors instead
//! of corner coordinates. This detector generates the priors when the model is loaded and
//! decodes the boxes itself.

use anyhow::ensure;

use crate::{
    detection::{ssd::PriorAnchors, Decoding, DetectorConfig, FaceBox, PostProcessor},
    image::Resolution,
    nn::{Backend, InferenceEngine, ModelSource, Outputs},
};

use super::{
    impl_face_detector, load_engine, score_and_box_outputs, validate_engine, BoxUnits,
    DetectorCore, Strategy,
};

pub(crate) struct AnchoredModel {
    engine: Box<dyn InferenceEngine>,
    priors: PriorAnchors,
}

impl Strategy for AnchoredModel {
    fn engine(&self) -> &dyn InferenceEngine {
        &*self.engine
    }

    fn units(&self) -> BoxUnits {
        BoxUnits::Pixels
    }

    fn extract(
        &self,
        outputs: &Outputs,
        frame: Resolution,
        post: &PostProcessor,
    ) -> anyhow::Result<Vec<FaceBox>> {
        let (scores, boxes) = score_and_box_outputs(outputs)?;
        Ok(post.postprocess(
            scores,
            boxes,
            Decoding::Anchored {
                priors: &self.priors,
                frame,
            },
        ))
    }
}

/// Detects faces with an UltraFace network that outputs prior anchor offsets.
///
/// Detected boxes are reported in pixel coordinates of the input frame
/// ([`BoxUnits::Pixels`]).
pub struct AnchoredUltraFace {
    core: DetectorCore<AnchoredModel>,
    backend: Option<Box<dyn Backend>>,
}

impl AnchoredUltraFace {
    /// Creates a detector that uses the backend selected by the environment.
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            core: DetectorCore::new("AnchoredUltraFace", config),
            backend: None,
        }
    }

    /// Creates a detector that runs inference on `backend`.
    pub fn with_backend(config: DetectorConfig, backend: Box<dyn Backend>) -> Self {
        Self {
            core: DetectorCore::new("AnchoredUltraFace", config),
            backend: Some(backend),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        self.core.config()
    }

    fn load_impl(&self, source: &ModelSource) -> anyhow::Result<AnchoredModel> {
        let input_res = self.core.config().input_resolution();
        let (engine, backend) = load_engine(self.backend.as_deref(), source)?;
        let candidates = validate_engine(&*engine, input_res)?;

        let priors = PriorAnchors::ultraface(input_res);
        if let Some(candidates) = candidates {
            ensure!(
                candidates == priors.anchor_count(),
                "model produces {} candidates, but {} prior anchors were generated for input \
                 resolution {}",
                candidates,
                priors.anchor_count(),
                input_res
            );
        }

        log::info!(
            "{}: loaded {:?} with {} ({} priors)",
            self.core.name(),
            source,
            backend,
            priors.anchor_count()
        );
        Ok(AnchoredModel { engine, priors })
    }
}

impl_face_detector!(AnchoredUltraFace);
