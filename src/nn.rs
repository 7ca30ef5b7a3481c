//! Neural network inference boundary.
//!
//! The face detection network is treated as an opaque function from an input tensor to a list of
//! output tensors. A [`Backend`] knows how to turn a [`ModelSource`] into an [`InferenceEngine`],
//! which then performs the actual computation.
//!
//! The [`Tract`] backend is always available. An ONNX Runtime backend can be enabled with the
//! `onnxruntime` cargo feature.

pub mod backend;
#[cfg(feature = "onnxruntime")]
pub mod onnxruntime;
pub mod transform;

use std::{
    borrow::Cow,
    fmt,
    ops::Index,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context};
use ndarray::{Array4, ArrayD};
use tract_onnx::prelude::{tvec, Framework, Graph, InferenceModelExt, SimplePlan, TypedFact, TypedOp};

type Model = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Where to load a model from.
#[derive(Clone)]
pub enum ModelSource {
    /// An ONNX file on the file system. The path must have an `.onnx` extension.
    Path(PathBuf),
    /// An in-memory ONNX file.
    Memory(Arc<[u8]>),
}

impl ModelSource {
    pub fn from_path<P: Into<PathBuf>>(path: P) -> Self {
        Self::Path(path.into())
    }

    pub fn from_bytes<B: Into<Arc<[u8]>>>(bytes: B) -> Self {
        Self::Memory(bytes.into())
    }

    /// Returns the model file path, if this source refers to a file.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Path(path) => Some(path),
            Self::Memory(_) => None,
        }
    }

    /// Reads the raw model data.
    pub fn read(&self) -> anyhow::Result<Cow<'_, [u8]>> {
        match self {
            Self::Path(path) => {
                match path.extension() {
                    Some(ext) if ext == "onnx" => {}
                    _ => bail!(
                        "neural network file must have `.onnx` extension: '{}'",
                        path.display()
                    ),
                }

                let data = std::fs::read(path)
                    .with_context(|| format!("failed to read model '{}'", path.display()))?;
                Ok(data.into())
            }
            Self::Memory(data) => Ok(Cow::Borrowed(data)),
        }
    }
}

impl fmt::Debug for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "ModelSource::Path({})", path.display()),
            Self::Memory(data) => write!(f, "ModelSource::Memory({} bytes)", data.len()),
        }
    }
}

/// An inference backend that can load models.
pub trait Backend: Send + Sync + 'static {
    /// Returns a short human-readable name of the backend, for logging.
    fn name(&self) -> &'static str;

    /// Loads and prepares a model for inference.
    ///
    /// Returns an error if the model data is missing, malformed, or uses operations the backend
    /// does not support.
    fn load(&self, model: &ModelSource) -> anyhow::Result<Box<dyn InferenceEngine>>;
}

/// A loaded neural network, ready to run inference.
///
/// Implementations must tolerate concurrent calls to [`InferenceEngine::infer`].
pub trait InferenceEngine: Send + Sync + 'static {
    /// Returns the shape of the network's (single) input tensor, if it is statically known.
    fn input_shape(&self) -> Option<Vec<usize>>;

    /// Returns the shape of output tensor `index`, if it is statically known.
    ///
    /// Returns [`None`] if the shape is dynamic or the output does not exist.
    fn output_shape(&self, index: usize) -> Option<Vec<usize>>;

    /// Returns the number of output tensors, if known.
    fn num_outputs(&self) -> Option<usize>;

    /// Runs the network on an input tensor of shape `[1, 3, H, W]`.
    fn infer(&self, input: Array4<f32>) -> anyhow::Result<Outputs>;
}

/// The result of an inference pass: one tensor per network output.
#[derive(Debug, Clone)]
pub struct Outputs {
    // Invariant: all tensors are in standard (row-major, contiguous) layout.
    inner: Vec<ArrayD<f32>>,
}

impl Outputs {
    /// Returns the number of tensors in this inference output.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over the output tensors.
    pub fn iter(&self) -> impl Iterator<Item = &ArrayD<f32>> {
        self.inner.iter()
    }

    /// Returns the flattened, row-major data of output tensor `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[track_caller]
    pub fn flat(&self, index: usize) -> &[f32] {
        self.inner[index]
            .as_slice()
            .expect("output tensors are stored in standard layout")
    }
}

impl Index<usize> for Outputs {
    type Output = ArrayD<f32>;

    fn index(&self, index: usize) -> &ArrayD<f32> {
        &self.inner[index]
    }
}

impl FromIterator<ArrayD<f32>> for Outputs {
    fn from_iter<T: IntoIterator<Item = ArrayD<f32>>>(iter: T) -> Self {
        Self {
            inner: iter
                .into_iter()
                .map(|tensor| {
                    if tensor.is_standard_layout() {
                        tensor
                    } else {
                        tensor.as_standard_layout().into_owned()
                    }
                })
                .collect(),
        }
    }
}

/// CPU inference via the pure-Rust [tract] engine.
///
/// [tract]: https://github.com/sonos/tract
#[derive(Debug, Clone, Copy, Default)]
pub struct Tract;

impl Backend for Tract {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn load(&self, model: &ModelSource) -> anyhow::Result<Box<dyn InferenceEngine>> {
        let data = model.read()?;
        let graph = tract_onnx::onnx()
            .model_for_read(&mut &*data)
            .with_context(|| format!("failed to parse ONNX model from {:?}", model))?
            .into_optimized()?;
        let plan = SimplePlan::new(graph)?;
        Ok(Box::new(TractEngine { plan }))
    }
}

struct TractEngine {
    plan: Model,
}

impl InferenceEngine for TractEngine {
    fn input_shape(&self) -> Option<Vec<usize>> {
        let fact = self.plan.model().input_fact(0).ok()?;
        fact.shape.as_concrete().map(<[usize]>::to_vec)
    }

    fn output_shape(&self, index: usize) -> Option<Vec<usize>> {
        let fact = self.plan.model().output_fact(index).ok()?;
        fact.shape.as_concrete().map(<[usize]>::to_vec)
    }

    fn num_outputs(&self) -> Option<usize> {
        Some(self.plan.model().outputs.len())
    }

    fn infer(&self, input: Array4<f32>) -> anyhow::Result<Outputs> {
        let outputs = self
            .plan
            .run(tvec!(tract_onnx::prelude::Tensor::from(input).into()))?;

        outputs
            .iter()
            .map(|value| -> anyhow::Result<ArrayD<f32>> {
                Ok(value.to_array_view::<f32>()?.to_owned())
            })
            .collect()
    }
}
