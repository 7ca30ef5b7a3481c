//! UltraFace with a pluggable inference backend.

use crate::{
    detection::DetectorConfig,
    nn::{Backend, ModelSource},
};

use super::{impl_face_detector, load_engine, DetectorCore, DirectModel};

/// Detects faces with an UltraFace network whose outputs are normalized corner boxes, running
/// inference on any [`Backend`].
///
/// Without an explicit backend, the one selected by `ULTRAFACE_ONNX_BACKEND` is used. The
/// environment is consulted when the model is loaded.
pub struct RuntimeUltraFace {
    core: DetectorCore<DirectModel>,
    backend: Option<Box<dyn Backend>>,
}

impl RuntimeUltraFace {
    /// Creates a detector that uses the backend selected by the environment.
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            core: DetectorCore::new("RuntimeUltraFace", config),
            backend: None,
        }
    }

    /// Creates a detector that runs inference on `backend`.
    pub fn with_backend(config: DetectorConfig, backend: Box<dyn Backend>) -> Self {
        Self {
            core: DetectorCore::new("RuntimeUltraFace", config),
            backend: Some(backend),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        self.core.config()
    }

    fn load_impl(&self, source: &ModelSource) -> anyhow::Result<DirectModel> {
        let (engine, backend) = load_engine(self.backend.as_deref(), source)?;
        let model = DirectModel::new(engine, self.core.config())?;
        log::info!("{}: loaded {:?} with {}", self.core.name(), source, backend);
        Ok(model)
    }
}

impl_face_detector!(RuntimeUltraFace);
