//! End-to-end tests of the detection pipeline with a custom inference backend.

use std::sync::Arc;

use approx::assert_relative_eq;
use ndarray::{Array4, ArrayD, IxDyn};
use ultraface::{
    control::{DetectionControl, RunOutcome},
    detection::DetectorConfig,
    detector::{AnchoredUltraFace, BoxUnits, DetectorState, FaceDetector, RuntimeUltraFace},
    distance::DistanceEstimator,
    image::{Frame, PixelFormat, Resolution},
    nn::{Backend, InferenceEngine, ModelSource, Outputs},
};

const CANDIDATES: usize = 4420;

/// A "network" that reports a face at candidate `face_index` when the frame is mostly bright.
///
/// The box values are returned as-is, so they are either corners or anchor offsets depending on
/// the detector used.
struct BrightnessEngine {
    face_index: usize,
    face_box: [f32; 4],
}

impl InferenceEngine for BrightnessEngine {
    fn input_shape(&self) -> Option<Vec<usize>> {
        Some(vec![1, 3, 240, 320])
    }

    fn output_shape(&self, index: usize) -> Option<Vec<usize>> {
        match index {
            0 => Some(vec![1, CANDIDATES, 2]),
            1 => Some(vec![1, CANDIDATES, 4]),
            _ => None,
        }
    }

    fn num_outputs(&self) -> Option<usize> {
        Some(2)
    }

    fn infer(&self, input: Array4<f32>) -> anyhow::Result<Outputs> {
        let brightness = input.mean().unwrap_or(-1.0);
        let face_score = if brightness > 0.0 { 0.98 } else { 0.02 };

        let mut scores = [1.0, 0.0].repeat(CANDIDATES);
        let mut boxes = vec![0.0; CANDIDATES * 4];
        scores[self.face_index * 2] = 1.0 - face_score;
        scores[self.face_index * 2 + 1] = face_score;
        boxes[self.face_index * 4..][..4].copy_from_slice(&self.face_box);

        Ok([
            ArrayD::from_shape_vec(IxDyn(&[1, CANDIDATES, 2]), scores)?,
            ArrayD::from_shape_vec(IxDyn(&[1, CANDIDATES, 4]), boxes)?,
        ]
        .into_iter()
        .collect())
    }
}

struct BrightnessBackend {
    face_index: usize,
    face_box: [f32; 4],
}

impl Backend for BrightnessBackend {
    fn name(&self) -> &'static str {
        "brightness"
    }

    fn load(&self, model: &ModelSource) -> anyhow::Result<Box<dyn InferenceEngine>> {
        model.read()?;
        Ok(Box::new(BrightnessEngine {
            face_index: self.face_index,
            face_box: self.face_box,
        }))
    }
}

fn model() -> ModelSource {
    ModelSource::from_bytes(&b"brightness"[..])
}

fn frame(value: u8) -> Frame {
    Frame::from_raw(640, 480, PixelFormat::Bgra8, vec![value; 640 * 480 * 4]).unwrap()
}

#[test]
fn direct_boxes_to_distance() {
    ultraface::init_logger!();

    let backend = BrightnessBackend {
        face_index: 100,
        face_box: [0.4, 0.35, 0.5, 0.65],
    };
    let config = DetectorConfig::new(0.7, 0.3, 5).unwrap().with_model(model());
    let detector = RuntimeUltraFace::with_backend(config, Box::new(backend));
    detector.load_model(None).unwrap();
    assert_eq!(detector.state(), DetectorState::Loaded);

    assert!(detector.detect(Some(&frame(10))).unwrap().faces().is_empty());

    let event = detector.detect(Some(&frame(250))).unwrap();
    assert_eq!(event.units(), BoxUnits::Normalized);
    assert_eq!(event.frame_resolution(), Resolution::new(640, 480));
    let faces = event.normalized_faces();
    assert_eq!(faces.len(), 1);
    assert_relative_eq!(faces[0].confidence(), 0.98);

    // 30% of the frame height with the default calibration
    let distance = DistanceEstimator::default().compute_distance(faces[0].rect());
    assert_relative_eq!(distance, 75.0, max_relative = 1e-4);
}

#[test]
fn anchored_boxes_are_in_pixels() {
    // first prior: center (0.5/40, 0.5/30), size 10x10 input pixels
    let backend = BrightnessBackend {
        face_index: 0,
        face_box: [0.0; 4],
    };
    let detector = AnchoredUltraFace::with_backend(DetectorConfig::default(), Box::new(backend));
    detector.load_model(Some(&model())).unwrap();

    let event = detector.detect(Some(&frame(255))).unwrap();
    assert_eq!(event.units(), BoxUnits::Pixels);
    let rect = event.faces()[0].rect();
    // the left/top edges are clipped at the frame border
    assert_relative_eq!(rect.x0(), 0.0);
    assert_relative_eq!(rect.y0(), 0.0);
    assert_relative_eq!(rect.x1(), (0.5 / 40.0 + 5.0 / 320.0) * 640.0, max_relative = 1e-4);
    assert_relative_eq!(rect.y1(), (0.5 / 30.0 + 5.0 / 240.0) * 480.0, max_relative = 1e-4);
}

#[test]
fn control_loop_with_channel() {
    let backend = BrightnessBackend {
        face_index: 4419,
        face_box: [0.1, 0.1, 0.2, 0.2],
    };
    let detector: Arc<dyn FaceDetector> = Arc::new(RuntimeUltraFace::with_backend(
        DetectorConfig::default(),
        Box::new(backend),
    ));
    let events = detector.subscribe_channel();
    let control = DetectionControl::initialize(detector.clone(), Some(&model())).unwrap();

    for value in [0, 255, 0, 255] {
        assert!(matches!(
            control.run(Some(&frame(value))),
            RunOutcome::Completed(Some(_))
        ));
    }

    let counts = events.try_iter().map(|e| e.faces().len()).collect::<Vec<_>>();
    assert_eq!(counts, [0, 1, 0, 1]);
    assert!(control.fps() > 0.0);
}

#[test]
fn invalid_models_do_not_load() {
    let detector = RuntimeUltraFace::with_backend(
        DetectorConfig::default(),
        Box::new(BrightnessBackend {
            face_index: 0,
            face_box: [0.0; 4],
        }),
    );

    detector
        .load_model(Some(&ModelSource::from_path("/does/not/exist.onnx")))
        .unwrap_err();
    assert!(!detector.is_model_loaded());
    assert!(detector.detect(Some(&frame(255))).is_none());

    // wrong network input size
    let detector = AnchoredUltraFace::with_backend(
        DetectorConfig::default().with_input_resolution(Resolution::new(640, 480)),
        Box::new(BrightnessBackend {
            face_index: 0,
            face_box: [0.0; 4],
        }),
    );
    detector.load_model(Some(&model())).unwrap_err();
    assert_eq!(detector.state(), DetectorState::Unloaded);
}
