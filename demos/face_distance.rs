//! Detects faces in an image file and estimates their distance from the camera.
//!
//! Usage: `face_distance <model.onnx> <image> [anchored]`
//!
//! Pass `anchored` for models that output raw prior anchor offsets.

use std::sync::Arc;

use anyhow::Context;
use ultraface::{
    detection::DetectorConfig,
    detector::{AnchoredUltraFace, FaceDetector, RuntimeUltraFace},
    distance::DistanceEstimator,
    image::Frame,
    nn::ModelSource,
};

fn main() -> anyhow::Result<()> {
    ultraface::init_logger!();

    let mut args = std::env::args().skip(1);
    let usage = "usage: face_distance <model.onnx> <image> [anchored]";
    let model = args.next().context(usage)?;
    let image = args.next().context(usage)?;
    let anchored = args.next().as_deref() == Some("anchored");

    let config = DetectorConfig::default().with_model(ModelSource::from_path(model));
    let detector: Arc<dyn FaceDetector> = if anchored {
        Arc::new(AnchoredUltraFace::new(config))
    } else {
        Arc::new(RuntimeUltraFace::new(config))
    };
    detector.load_model(None)?;

    let frame = Frame::load(&image)?;
    let event = detector
        .detect(Some(&frame))
        .context("detection failed, see log for details")?;

    let estimator = DistanceEstimator::default();
    println!("{} face(s) in {} ({})", event.faces().len(), image, frame.resolution());
    for (face, normalized) in event.faces().iter().zip(event.normalized_faces()) {
        println!(
            "{:?} confidence={:.3} distance={:.1}cm",
            face.rect(),
            face.confidence(),
            estimator.compute_distance(normalized.rect()),
        );
    }
    for timer in detector.timers() {
        println!("{}", timer);
    }

    Ok(())
}
