//! Shared test fixtures.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::{bail, ensure};
use ndarray::{Array4, ArrayD, IxDyn};

use crate::{
    image::{Frame, PixelFormat, Resolution},
    nn::{Backend, InferenceEngine, ModelSource, Outputs},
};

/// Path of a tiny ONNX graph with the UltraFace input and output layout.
///
/// The input is `[1, 3, 2, 4]` (a 4x2 RGB image). Output 0 (`[1, 6, 2]`) holds the first 12 input
/// values, output 1 (`[1, 6, 4]`) all 24 of them, both in NCHW order.
pub const RESHAPE_MODEL_PATH: &str =
    concat!(env!("CARGO_MANIFEST_DIR"), "/tests/models/reshape-4x2.onnx");

pub const RESHAPE_MODEL: &[u8] = include_bytes!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/models/reshape-4x2.onnx"
));

pub const RESHAPE_MODEL_RES: Resolution = Resolution::new(4, 2);

/// Canned network outputs in the UltraFace layout.
#[derive(Debug, Clone)]
pub struct FakeModel {
    scores: Vec<f32>,
    boxes: Vec<f32>,
}

impl FakeModel {
    /// `candidates` candidates that are all confidently background.
    pub fn direct(candidates: usize) -> Self {
        Self {
            scores: [1.0, 0.0].repeat(candidates),
            boxes: vec![0.0; candidates * 4],
        }
    }

    /// Turns candidate `index` into a face with the given score and box values.
    pub fn with_face(mut self, index: usize, score: f32, bb: [f32; 4]) -> Self {
        self.scores[index * 2..][..2].copy_from_slice(&[1.0 - score, score]);
        self.boxes[index * 4..][..4].copy_from_slice(&bb);
        self
    }

    pub fn candidates(&self) -> usize {
        self.scores.len() / 2
    }
}

/// An [`InferenceEngine`] that returns a [`FakeModel`]'s outputs.
#[derive(Clone)]
pub struct FakeEngine {
    model: Arc<FakeModel>,
    input_shape: Option<Vec<usize>>,
    output_shapes: Vec<Option<Vec<usize>>>,
    fail: bool,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl FakeEngine {
    /// Creates an engine reporting a 320x240 input and the model's output shapes.
    pub fn new(model: FakeModel) -> Self {
        let n = model.candidates();
        Self {
            model: Arc::new(model),
            input_shape: Some(vec![1, 3, 240, 320]),
            output_shapes: vec![Some(vec![1, n, 2]), Some(vec![1, n, 4])],
            fail: false,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_shapes(
        mut self,
        input_shape: Option<Vec<usize>>,
        output_shapes: Vec<Option<Vec<usize>>>,
    ) -> Self {
        self.input_shape = input_shape;
        self.output_shapes = output_shapes;
        self
    }

    /// Makes every inference call fail.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Returns the number of inference calls made so far, across all clones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl InferenceEngine for FakeEngine {
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
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        if let Some(shape) = &self.input_shape {
            ensure!(input.shape() == shape.as_slice(), "bad input shape {:?}", input.shape());
        }
        if self.fail {
            bail!("simulated inference failure");
        }

        let n = self.model.candidates();
        Ok([
            ArrayD::from_shape_vec(IxDyn(&[1, n, 2]), self.model.scores.clone())?,
            ArrayD::from_shape_vec(IxDyn(&[1, n, 4]), self.model.boxes.clone())?,
        ]
        .into_iter()
        .collect())
    }
}

/// A [`Backend`] handing out clones of a [`FakeEngine`].
pub struct FakeBackend {
    engine: FakeEngine,
}

impl FakeBackend {
    /// Model data that fails to load.
    pub const CORRUPT: &'static [u8] = b"corrupt";

    pub fn new(engine: FakeEngine) -> Self {
        Self { engine }
    }
}

impl Backend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn load(&self, model: &ModelSource) -> anyhow::Result<Box<dyn InferenceEngine>> {
        if *model.read()? == *Self::CORRUPT {
            bail!("corrupt model");
        }
        Ok(Box::new(self.engine.clone()))
    }
}

/// A model source accepted by [`FakeBackend`].
pub fn fake_source() -> ModelSource {
    ModelSource::from_bytes(&b"fake onnx"[..])
}

/// A mid-gray BGRA frame, like a camera would deliver.
pub fn test_frame(width: u32, height: u32) -> Frame {
    let len = width as usize * height as usize * 4;
    Frame::from_raw(width, height, PixelFormat::Bgra8, vec![128; len]).unwrap()
}
