//! UltraFace running on the built-in tract backend.

use crate::{
    detection::DetectorConfig,
    nn::{Backend, ModelSource, Tract},
};

use super::{impl_face_detector, DetectorCore, DirectModel};

/// Detects faces with an UltraFace network whose outputs are normalized corner boxes.
///
/// Inference always uses [`Tract`], regardless of `ULTRAFACE_ONNX_BACKEND`. Use
/// [`RuntimeUltraFace`](super::RuntimeUltraFace) to choose a different backend.
pub struct UltraFace {
    core: DetectorCore<DirectModel>,
}

impl UltraFace {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            core: DetectorCore::new("UltraFace", config),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        self.core.config()
    }

    fn load_impl(&self, source: &ModelSource) -> anyhow::Result<DirectModel> {
        let model = DirectModel::new(Tract.load(source)?, self.core.config())?;
        log::info!("{}: loaded {:?} with tract", self.core.name(), source);
        Ok(model)
    }
}

impl Default for UltraFace {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl_face_detector!(UltraFace);
