//! Face detectors: the glue between frames, the inference engine and post-processing.
//!
//! All detectors implement [`FaceDetector`]. They share the preprocessing ([`FrameTransform`])
//! and post-processing ([`PostProcessor`]) logic and only differ in how the network is loaded and
//! how its outputs are decoded:
//!
//! * [`UltraFace`] runs the network with the built-in tract backend and expects normalized corner
//!   boxes.
//! * [`RuntimeUltraFace`] expects the same outputs, but runs on a pluggable [`Backend`].
//! * [`AnchoredUltraFace`] decodes raw prior anchor offsets and reports boxes in frame pixels.
//!
//! [`Backend`]: crate::nn::Backend

pub mod anchored;
pub mod runtime;
pub mod ultraface;

use std::sync::{
    atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering},
    Arc, Mutex, MutexGuard, PoisonError, RwLock,
};

use anyhow::{anyhow, bail, ensure};
use crossbeam::channel::Receiver;

use crate::{
    detection::{DetectorConfig, FaceBox, PostProcessor},
    drop::defer,
    image::{Frame, Resolution},
    nn::{
        transform::{nchw_input_resolution, ColorMapper, FrameTransform},
        Backend, InferenceEngine, ModelSource, Outputs,
    },
    timer::Timer,
};

pub use self::{anchored::AnchoredUltraFace, runtime::RuntimeUltraFace, ultraface::UltraFace};

/// Lifecycle state of a [`FaceDetector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// No model is loaded. Detection requests are ignored.
    Unloaded,
    /// A model is currently being loaded.
    Loading,
    /// A model is loaded and no detection is running.
    Loaded,
    /// A model is loaded and at least one detection pass is in progress.
    Detecting,
}

/// Coordinate system of the boxes in a [`DetectionEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxUnits {
    /// Coordinates are in range `[0, 1]`, relative to the frame size.
    Normalized,
    /// Coordinates are in pixels of the original frame.
    Pixels,
}

/// The result of one detection pass, as delivered to subscribers.
#[derive(Debug, Clone)]
pub struct DetectionEvent {
    faces: Vec<FaceBox>,
    frame_resolution: Resolution,
    units: BoxUnits,
}

impl DetectionEvent {
    pub fn new(faces: Vec<FaceBox>, frame_resolution: Resolution, units: BoxUnits) -> Self {
        Self {
            faces,
            frame_resolution,
            units,
        }
    }

    /// Returns the detected faces, sorted by descending confidence.
    pub fn faces(&self) -> &[FaceBox] {
        &self.faces
    }

    pub fn into_faces(self) -> Vec<FaceBox> {
        self.faces
    }

    /// Returns the size of the frame the detection ran on (before any resizing).
    pub fn frame_resolution(&self) -> Resolution {
        self.frame_resolution
    }

    pub fn units(&self) -> BoxUnits {
        self.units
    }

    /// Returns the detected faces with their boxes converted to normalized coordinates.
    ///
    /// [`DistanceEstimator`](crate::distance::DistanceEstimator) expects boxes in this form.
    pub fn normalized_faces(&self) -> Vec<FaceBox> {
        match self.units {
            BoxUnits::Normalized => self.faces.clone(),
            BoxUnits::Pixels => self
                .faces
                .iter()
                .cloned()
                .map(|face| face.map_rect(|rect| rect.normalize(self.frame_resolution)))
                .collect(),
        }
    }
}

/// Identifies a subscription made with [`FaceDetector::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A detection result callback.
pub type Callback = Box<dyn Fn(&DetectionEvent) + Send + Sync>;

/// Common interface of all face detectors.
pub trait FaceDetector: Send + Sync {
    /// Returns a short human-readable name of the detector.
    fn name(&self) -> &'static str;

    /// Loads a model, replacing any previously loaded one.
    ///
    /// If `model` is [`None`], the model set in the detector's [`DetectorConfig`] is used.
    ///
    /// On failure, the error is logged and returned, and the detector is left without a model.
    fn load_model(&self, model: Option<&ModelSource>) -> anyhow::Result<()>;

    /// Returns whether a model has been loaded successfully.
    fn is_model_loaded(&self) -> bool;

    fn state(&self) -> DetectorState;

    /// Runs a detection pass on `frame`.
    ///
    /// Does nothing and returns [`None`] if `frame` is [`None`] or no model is loaded. Inference
    /// failures are logged and also result in [`None`]. Otherwise the result is delivered to all
    /// subscribers and then returned.
    ///
    /// Concurrent calls are permitted. See [`crate::flight`] for a way to avoid them.
    fn detect(&self, frame: Option<&Frame>) -> Option<DetectionEvent>;

    /// Registers a callback that is invoked with every detection result.
    ///
    /// Callbacks run on the thread that called [`FaceDetector::detect`].
    fn subscribe(&self, callback: Callback) -> SubscriptionId;

    /// Removes a callback. Returns `false` if the subscription did not exist.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Subscribes to detection results via a channel.
    ///
    /// Events are dropped while the receiver is disconnected, but the subscription itself stays
    /// registered.
    fn subscribe_channel(&self) -> Receiver<DetectionEvent> {
        let (sender, receiver) = crossbeam::channel::unbounded();
        self.subscribe(Box::new(move |event| {
            sender.send(event.clone()).ok();
        }));
        receiver
    }

    /// Returns the preprocessing, inference and post-processing timers of this detector.
    fn timers(&self) -> &[Timer];
}

/// A loaded model together with the knowledge of how to decode its outputs.
pub(crate) trait Strategy: Send + Sync + 'static {
    fn engine(&self) -> &dyn InferenceEngine;

    fn units(&self) -> BoxUnits;

    /// Extracts the detected faces from the network outputs. `frame` is the original frame size.
    fn extract(
        &self,
        outputs: &Outputs,
        frame: Resolution,
        post: &PostProcessor,
    ) -> anyhow::Result<Vec<FaceBox>>;
}

const UNLOADED: u8 = 0;
const LOADING: u8 = 1;
const LOADED: u8 = 2;

/// Detector state and logic shared by all [`FaceDetector`] implementations.
pub(crate) struct DetectorCore<S> {
    name: &'static str,
    config: DetectorConfig,
    transform: FrameTransform,
    post: PostProcessor,
    model: RwLock<Option<Arc<S>>>,
    load_lock: Mutex<()>,
    state: AtomicU8,
    in_flight: AtomicUsize,
    subscribers: Subscribers,
    timers: [Timer; 3],
}

impl<S: Strategy> DetectorCore<S> {
    pub(crate) fn new(name: &'static str, config: DetectorConfig) -> Self {
        Self {
            name,
            transform: FrameTransform::new(config.input_resolution(), ColorMapper::ultraface()),
            post: PostProcessor::new(&config),
            config,
            model: RwLock::new(None),
            load_lock: Mutex::new(()),
            state: AtomicU8::new(UNLOADED),
            in_flight: AtomicUsize::new(0),
            subscribers: Subscribers::default(),
            timers: [
                Timer::new("preprocess"),
                Timer::new("infer"),
                Timer::new("postprocess"),
            ],
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Loads a model using `load`, managing the state transitions.
    pub(crate) fn load(
        &self,
        model: Option<&ModelSource>,
        load: impl FnOnce(&ModelSource) -> anyhow::Result<S>,
    ) -> anyhow::Result<()> {
        let _loading = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);

        *self.model_slot_mut() = None;
        self.state.store(LOADING, Ordering::Release);

        let result = model
            .or(self.config.model())
            .ok_or_else(|| anyhow!("no model given and none configured"))
            .and_then(|source| {
                log::debug!("{}: loading model from {:?}", self.name, source);
                load(source)
            });

        match result {
            Ok(loaded) => {
                *self.model_slot_mut() = Some(Arc::new(loaded));
                self.state.store(LOADED, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                self.state.store(UNLOADED, Ordering::Release);
                log::warn!("{}: failed to load model: {:#}", self.name, e);
                Err(e)
            }
        }
    }

    pub(crate) fn is_model_loaded(&self) -> bool {
        self.state.load(Ordering::Acquire) == LOADED
    }

    pub(crate) fn state(&self) -> DetectorState {
        match self.state.load(Ordering::Acquire) {
            UNLOADED => DetectorState::Unloaded,
            LOADING => DetectorState::Loading,
            _ if self.in_flight.load(Ordering::Acquire) > 0 => DetectorState::Detecting,
            _ => DetectorState::Loaded,
        }
    }

    pub(crate) fn detect(&self, frame: Option<&Frame>) -> Option<DetectionEvent> {
        let Some(frame) = frame else {
            log::trace!("{}: no frame, skipping detection", self.name);
            return None;
        };
        let Some(model) = self.loaded_model() else {
            log::trace!("{}: no model loaded, skipping detection", self.name);
            return None;
        };

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let _in_flight = defer(|| {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
        });

        let [t_pre, t_infer, t_post] = &self.timers;
        let input = t_pre.time(|| self.transform.transform(frame));
        let faces = t_infer
            .time(|| model.engine().infer(input))
            .and_then(|outputs| {
                log::trace!(
                    "{}: output shapes: {:?}",
                    self.name,
                    outputs.iter().map(|t| t.shape()).collect::<Vec<_>>()
                );
                t_post.time(|| model.extract(&outputs, frame.resolution(), &self.post))
            });
        let faces = match faces {
            Ok(faces) => faces,
            Err(e) => {
                log::error!("{}: detection failed: {:#}", self.name, e);
                return None;
            }
        };

        let event = DetectionEvent::new(faces, frame.resolution(), model.units());
        self.subscribers.notify(&event);
        Some(event)
    }

    pub(crate) fn subscribe(&self, callback: Callback) -> SubscriptionId {
        self.subscribers.add(callback)
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }

    pub(crate) fn timers(&self) -> &[Timer] {
        &self.timers
    }

    fn loaded_model(&self) -> Option<Arc<S>> {
        self.model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn model_slot_mut(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<S>>> {
        self.model.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Implements [`FaceDetector`] for a type with a `core: DetectorCore<_>` field and a
/// `load_impl(&self, &ModelSource) -> anyhow::Result<_>` method.
macro_rules! impl_face_detector {
    ($ty:ty) => {
        impl $crate::detector::FaceDetector for $ty {
            fn name(&self) -> &'static str {
                self.core.name()
            }

            fn load_model(&self, model: Option<&$crate::nn::ModelSource>) -> anyhow::Result<()> {
                self.core.load(model, |source| self.load_impl(source))
            }

            fn is_model_loaded(&self) -> bool {
                self.core.is_model_loaded()
            }

            fn state(&self) -> $crate::detector::DetectorState {
                self.core.state()
            }

            fn detect(
                &self,
                frame: Option<&$crate::image::Frame>,
            ) -> Option<$crate::detector::DetectionEvent> {
                self.core.detect(frame)
            }

            fn subscribe(
                &self,
                callback: $crate::detector::Callback,
            ) -> $crate::detector::SubscriptionId {
                self.core.subscribe(callback)
            }

            fn unsubscribe(&self, id: $crate::detector::SubscriptionId) -> bool {
                self.core.unsubscribe(id)
            }

            fn timers(&self) -> &[$crate::timer::Timer] {
                self.core.timers()
            }
        }
    };
}
pub(crate) use impl_face_detector;

type SharedCallback = Arc<dyn Fn(&DetectionEvent) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: AtomicU64,
    list: Mutex<Vec<(SubscriptionId, SharedCallback)>>,
}

impl Subscribers {
    fn add(&self, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::from(callback)));
        id
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut list = self.lock();
        let before = list.len();
        list.retain(|(other, _)| *other != id);
        list.len() != before
    }

    /// Invokes all callbacks. The list is not locked while they run, so callbacks may
    /// (un)subscribe.
    fn notify(&self, event: &DetectionEvent) {
        let callbacks: Vec<_> = self.lock().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in callbacks {
            callback(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(SubscriptionId, SharedCallback)>> {
        self.list.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A loaded network that outputs normalized corner boxes.
///
/// Output 0 holds the scores (`[1, N, 2]`), output 1 the boxes (`[1, N, 4]`).
pub(crate) struct DirectModel {
    engine: Box<dyn InferenceEngine>,
}

impl DirectModel {
    pub(crate) fn new(
        engine: Box<dyn InferenceEngine>,
        config: &DetectorConfig,
    ) -> anyhow::Result<Self> {
        validate_engine(&*engine, config.input_resolution())?;
        Ok(Self { engine })
    }
}

impl Strategy for DirectModel {
    fn engine(&self) -> &dyn InferenceEngine {
        &*self.engine
    }

    fn units(&self) -> BoxUnits {
        BoxUnits::Normalized
    }

    fn extract(
        &self,
        outputs: &Outputs,
        _frame: Resolution,
        post: &PostProcessor,
    ) -> anyhow::Result<Vec<FaceBox>> {
        let (scores, boxes) = score_and_box_outputs(outputs)?;
        Ok(post.postprocess(scores, boxes, crate::detection::Decoding::Direct))
    }
}

/// Loads `source` with `backend`, or with the backend selected by the environment if `backend` is
/// [`None`]. Returns the engine and the name of the backend that loaded it.
pub(crate) fn load_engine(
    backend: Option<&dyn Backend>,
    source: &ModelSource,
) -> anyhow::Result<(Box<dyn InferenceEngine>, &'static str)> {
    match backend {
        Some(backend) => Ok((backend.load(source)?, backend.name())),
        None => {
            let backend = crate::nn::backend::from_env()?;
            Ok((backend.load(source)?, backend.name()))
        }
    }
}

pub(crate) fn score_and_box_outputs(outputs: &Outputs) -> anyhow::Result<(&[f32], &[f32])> {
    ensure!(
        outputs.len() >= 2,
        "network produced {} outputs, expected scores and boxes",
        outputs.len()
    );
    Ok((outputs.flat(0), outputs.flat(1)))
}

/// Checks the shapes an engine reports against what a face detection model must look like.
///
/// Returns the number of candidates the network produces, if the output shapes are known.
pub(crate) fn validate_engine(
    engine: &dyn InferenceEngine,
    input_res: Resolution,
) -> anyhow::Result<Option<usize>> {
    if let Some(shape) = engine.input_shape() {
        let model_res = nchw_input_resolution(&shape)?;
        ensure!(
            model_res == input_res,
            "model input resolution {} does not match configured input resolution {}",
            model_res,
            input_res
        );
    }

    if let Some(count) = engine.num_outputs() {
        ensure!(
            count >= 2,
            "face detection model needs 2 outputs (scores, boxes), this one has {}",
            count
        );
    }

    let scores = engine
        .output_shape(0)
        .map(|shape| candidate_count(&shape, 2))
        .transpose()?;
    let boxes = engine
        .output_shape(1)
        .map(|shape| candidate_count(&shape, 4))
        .transpose()?;

    match (scores, boxes) {
        (Some(scores), Some(boxes)) if scores != boxes => {
            bail!(
                "score output has {} candidates, but box output has {}",
                scores,
                boxes
            )
        }
        (scores, boxes) => Ok(scores.or(boxes)),
    }
}

fn candidate_count(shape: &[usize], values: usize) -> anyhow::Result<usize> {
    match shape.split_last() {
        Some((&last, rest)) if last == values => Ok(rest.iter().product()),
        _ => bail!(
            "invalid output shape {:?}, expected {} values per candidate",
            shape,
            values
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use crate::{
        rect::BoundingBox,
        test::{FakeEngine, FakeModel},
    };

    use super::*;

    #[test]
    fn engine_validation() {
        let res = Resolution::ULTRAFACE_320;
        let good = FakeEngine::new(FakeModel::direct(4420)).with_shapes(
            Some(vec![1, 3, 240, 320]),
            vec![Some(vec![1, 4420, 2]), Some(vec![1, 4420, 4])],
        );
        assert_eq!(validate_engine(&good, res).unwrap(), Some(4420));

        let unknown = FakeEngine::new(FakeModel::direct(4420)).with_shapes(None, vec![None, None]);
        assert_eq!(validate_engine(&unknown, res).unwrap(), None);

        let wrong_res = good.clone().with_shapes(
            Some(vec![1, 3, 480, 640]),
            vec![Some(vec![1, 4420, 2]), Some(vec![1, 4420, 4])],
        );
        validate_engine(&wrong_res, res).unwrap_err();

        let nhwc = good.clone().with_shapes(Some(vec![1, 240, 320, 3]), vec![None, None]);
        validate_engine(&nhwc, res).unwrap_err();

        let one_output = good.clone().with_shapes(None, vec![Some(vec![1, 4420, 2])]);
        validate_engine(&one_output, res).unwrap_err();

        let swapped = good.clone().with_shapes(
            None,
            vec![Some(vec![1, 4420, 4]), Some(vec![1, 4420, 2])],
        );
        validate_engine(&swapped, res).unwrap_err();

        let mismatch = good.with_shapes(
            None,
            vec![Some(vec![1, 4420, 2]), Some(vec![1, 4000, 4])],
        );
        validate_engine(&mismatch, res).unwrap_err();
    }

    #[test]
    fn normalized_faces() {
        let face = FaceBox::new(BoundingBox::new(64.0, 48.0, 320.0, 240.0), 0.9);
        let event = DetectionEvent::new(vec![face], Resolution::new(640, 480), BoxUnits::Pixels);
        let normalized = event.normalized_faces();
        assert_eq!(normalized[0].confidence(), 0.9);
        assert_eq!(*normalized[0].rect(), BoundingBox::new(0.1, 0.1, 0.5, 0.5));

        let event = DetectionEvent::new(
            normalized.clone(),
            event.frame_resolution(),
            BoxUnits::Normalized,
        );
        assert_eq!(event.normalized_faces(), normalized);
    }

    #[test]
    fn subscribers() {
        let subscribers = Subscribers::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        let a = subscribers.add(Box::new(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        }));
        let c = calls.clone();
        let b = subscribers.add(Box::new(move |_| {
            c.fetch_add(10, Ordering::Relaxed);
        }));
        assert_ne!(a, b);

        let event = DetectionEvent::new(Vec::new(), Resolution::new(1, 1), BoxUnits::Normalized);
        subscribers.notify(&event);
        assert_eq!(calls.load(Ordering::Relaxed), 11);

        assert!(subscribers.remove(b));
        assert!(!subscribers.remove(b));
        subscribers.notify(&event);
        assert_eq!(calls.load(Ordering::Relaxed), 12);
    }
}
