//! Inference via Microsoft's [ONNX Runtime](https://onnxruntime.ai/).

use std::sync::{Mutex, PoisonError};

use anyhow::Context;
use ndarray::{Array4, ArrayD, IxDyn};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::{Tensor, ValueType},
};

use super::{Backend, InferenceEngine, ModelSource, Outputs};

/// The ONNX Runtime backend.
///
/// All sessions share the process-wide ONNX Runtime environment, which is set up by
/// [`OnnxRuntime::new`].
pub struct OnnxRuntime {
    _priv: (),
}

impl OnnxRuntime {
    pub fn new() -> anyhow::Result<Self> {
        ort::init()
            .with_name(env!("CARGO_PKG_NAME"))
            .commit()
            .context("failed to initialize ONNX Runtime")?;
        Ok(Self { _priv: () })
    }
}

impl Backend for OnnxRuntime {
    fn name(&self) -> &'static str {
        "onnxruntime"
    }

    fn load(&self, model: &ModelSource) -> anyhow::Result<Box<dyn InferenceEngine>> {
        let data = model.read()?;
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_memory(&data)
            .with_context(|| format!("failed to create ONNX Runtime session from {:?}", model))?;

        Ok(Box::new(OrtEngine {
            input_shape: session
                .inputs
                .first()
                .and_then(|input| concrete(&input.input_type)),
            output_shapes: session
                .outputs
                .iter()
                .map(|output| concrete(&output.output_type))
                .collect(),
            session: Mutex::new(session),
        }))
    }
}

/// Returns the shape of a tensor value, if all of its dimensions are fixed.
fn concrete(ty: &ValueType) -> Option<Vec<usize>> {
    match ty {
        // dynamic dimensions are reported as -1
        ValueType::Tensor { shape, .. } => shape
            .iter()
            .map(|&dim| usize::try_from(dim).ok())
            .collect(),
        _ => None,
    }
}

struct OrtEngine {
    session: Mutex<Session>,
    input_shape: Option<Vec<usize>>,
    output_shapes: Vec<Option<Vec<usize>>>,
}

impl InferenceEngine for OrtEngine {
    fn input_shape(&self) -> Option<Vec<usize>> {
        self.input_shape.clone()
    }

    fn output_shape(&self, index: usize) -> Option<Vec<usize>> {
        self.output_shapes.get(index).cloned().flatten()
    }

    fn num_outputs(&self) -> Option<usize> {
        Some(self.output_shapes.len())
    }

    fn infer(&self, input: Array4<f32>) -> anyhow::Result<Outputs> {
        let (n, c, h, w) = input.dim();
        let input = Tensor::from_array(([n, c, h, w], input.iter().copied().collect::<Vec<_>>()))?;

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = session.run(ort::inputs![input])?;

        (0..outputs.len())
            .map(|index| -> anyhow::Result<ArrayD<f32>> {
                let (shape, data) = outputs[index].try_extract_tensor::<f32>()?;
                let dims = shape
                    .iter()
                    .map(|&dim| usize::try_from(dim))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())?)
            })
            .collect()
    }
}
