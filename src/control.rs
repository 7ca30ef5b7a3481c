//! Caller-side control of a live detection loop.
//!
//! [`DetectionControl`] sits between a camera feed and a [`FaceDetector`]. It can be switched off,
//! skips work while no model is loaded, and drops frames that arrive while a detection pass is
//! still running, so the newest frame always wins and no backlog builds up.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Instant,
};

use crate::{
    detector::{DetectionEvent, FaceDetector},
    flight::SingleFlight,
    image::Frame,
    nn::ModelSource,
    timer::FpsCounter,
};

/// What happened to a frame passed to [`DetectionControl::run`].
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Detection is switched off.
    Disabled,
    /// The detector has no model loaded.
    NotLoaded,
    /// No frame was given.
    NoFrame,
    /// Another detection pass was still running, the frame was dropped.
    Busy,
    /// A detection pass ran. Holds its result, or [`None`] if the pass failed.
    Completed(Option<DetectionEvent>),
}

/// Drives a [`FaceDetector`] from a live frame source.
pub struct DetectionControl {
    detector: Arc<dyn FaceDetector>,
    enabled: AtomicBool,
    flight: SingleFlight,
    /// `f32` bits of the rate of the last completed pass.
    fps: AtomicU32,
    dropped: AtomicU64,
    fps_counter: Mutex<FpsCounter>,
}

impl DetectionControl {
    /// Wraps `detector`. Detection starts out enabled.
    pub fn new(detector: Arc<dyn FaceDetector>) -> Self {
        Self {
            fps_counter: Mutex::new(FpsCounter::new(detector.name())),
            detector,
            enabled: AtomicBool::new(true),
            flight: SingleFlight::new(),
            fps: AtomicU32::new(0.0f32.to_bits()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Wraps `detector` and loads its model.
    ///
    /// `model` overrides the model from the detector's configuration.
    pub fn initialize(
        detector: Arc<dyn FaceDetector>,
        model: Option<&ModelSource>,
    ) -> anyhow::Result<Self> {
        detector.load_model(model)?;
        Ok(Self::new(detector))
    }

    pub fn detector(&self) -> &Arc<dyn FaceDetector> {
        &self.detector
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Returns whether a detection pass started by [`DetectionControl::run`] is in progress.
    pub fn is_detecting(&self) -> bool {
        self.flight.is_busy()
    }

    /// Returns the detection rate of the last pass, as the inverse of its duration in seconds.
    ///
    /// Returns 0 until the first pass has completed.
    pub fn fps(&self) -> f32 {
        f32::from_bits(self.fps.load(Ordering::Relaxed))
    }

    /// Returns the number of frames dropped because a detection was already running.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Runs detection on `frame`, unless something prevents it.
    ///
    /// Never blocks waiting for another pass: if one is in flight, the frame is dropped and
    /// [`RunOutcome::Busy`] is returned.
    pub fn run(&self, frame: Option<&Frame>) -> RunOutcome {
        if !self.is_enabled() {
            return RunOutcome::Disabled;
        }
        if !self.detector.is_model_loaded() {
            return RunOutcome::NotLoaded;
        }
        let Some(frame) = frame else {
            return RunOutcome::NoFrame;
        };
        let Some(_flight) = self.flight.try_begin() else {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            log::trace!("detection in progress, dropping frame ({} dropped)", dropped);
            return RunOutcome::Busy;
        };

        let start = Instant::now();
        let event = self.detector.detect(Some(frame));
        let secs = start.elapsed().as_secs_f32();
        if secs > 0.0 {
            self.fps.store((1.0 / secs).to_bits(), Ordering::Relaxed);
        }

        self.fps_counter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tick_with(self.detector.timers());

        RunOutcome::Completed(event)
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use rayon::prelude::*;

    use crate::{
        detection::DetectorConfig,
        detector::RuntimeUltraFace,
        test::{fake_source, test_frame, FakeBackend, FakeEngine, FakeModel},
    };

    use super::*;

    fn control(engine: FakeEngine) -> DetectionControl {
        let backend = FakeBackend::new(engine);
        let detector = RuntimeUltraFace::with_backend(DetectorConfig::default(), Box::new(backend));
        DetectionControl::initialize(Arc::new(detector), Some(&fake_source())).unwrap()
    }

    fn model() -> FakeModel {
        FakeModel::direct(4420).with_face(7, 0.99, [0.2, 0.2, 0.4, 0.5])
    }

    #[test]
    fn short_circuits() {
        let engine = FakeEngine::new(model());
        let control = control(engine.clone());
        let frame = test_frame(32, 24);

        control.set_enabled(false);
        assert!(matches!(control.run(Some(&frame)), RunOutcome::Disabled));
        control.set_enabled(true);
        assert!(matches!(control.run(None), RunOutcome::NoFrame));
        assert_eq!(engine.calls(), 0);

        let detector = RuntimeUltraFace::with_backend(
            DetectorConfig::default(),
            Box::new(FakeBackend::new(engine.clone())),
        );
        let unloaded = DetectionControl::new(Arc::new(detector));
        assert!(matches!(unloaded.run(Some(&frame)), RunOutcome::NotLoaded));
        assert_eq!(engine.calls(), 0);
    }

    #[test]
    fn runs_detection() {
        let control = control(FakeEngine::new(model()));
        assert_eq!(control.fps(), 0.0);

        match control.run(Some(&test_frame(32, 24))) {
            RunOutcome::Completed(Some(event)) => assert_eq!(event.faces().len(), 1),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(control.fps() > 0.0);
        assert!(!control.is_detecting());
    }

    #[test]
    fn failed_pass_completes_and_releases() {
        let control = control(FakeEngine::new(model()).failing());
        let frame = test_frame(32, 24);
        assert!(matches!(control.run(Some(&frame)), RunOutcome::Completed(None)));
        assert!(matches!(control.run(Some(&frame)), RunOutcome::Completed(None)));
        assert!(!control.is_detecting());
        assert_eq!(control.dropped_frames(), 0);
    }

    #[test]
    fn drops_frames_while_busy() {
        let engine = FakeEngine::new(model()).with_delay(Duration::from_millis(100));
        let control = control(engine.clone());
        let frame = test_frame(32, 24);

        thread::scope(|s| {
            let pass = s.spawn(|| control.run(Some(&frame)));
            thread::sleep(Duration::from_millis(30));
            assert!(control.is_detecting());
            assert!(matches!(control.run(Some(&frame)), RunOutcome::Busy));
            assert!(matches!(pass.join().unwrap(), RunOutcome::Completed(Some(_))));
        });

        assert_eq!(engine.calls(), 1);
        assert_eq!(control.dropped_frames(), 1);
        assert!(matches!(control.run(Some(&frame)), RunOutcome::Completed(_)));
    }

    #[test]
    fn never_overlaps() {
        let engine = FakeEngine::new(model()).with_delay(Duration::from_millis(2));
        let control = control(engine.clone());
        let frame = test_frame(32, 24);

        let completed = (0..32)
            .into_par_iter()
            .filter(|_| matches!(control.run(Some(&frame)), RunOutcome::Completed(_)))
            .count();

        assert_eq!(engine.calls(), completed);
        assert_eq!(completed as u64 + control.dropped_frames(), 32);
    }
}
