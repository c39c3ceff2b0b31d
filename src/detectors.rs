//! Detector adapters: narrow interfaces around a face detector and a pose
//! detector.
//!
//! Both are out-of-scope external collaborators: the pipeline only depends
//! on the traits here, never on a concrete detection library, so a real
//! backend (ONNX, mediapipe, ...) can be plugged in without touching
//! [`crate::pipeline`] or [`crate::features`].

use dws_camera::Frame;
use eyre::Result;

/// A single relative keypoint, in `[0, 1]` image coordinates.
#[derive(Clone, Copy, Debug, Default)]
pub struct Keypoint {
    /// Horizontal position, 0 = left edge, 1 = right edge.
    pub x: f64,
    /// Vertical position, 0 = top edge, 1 = bottom edge.
    pub y: f64,
}

/// Relative bounding box: origin and size as fractions of image width/height.
#[derive(Clone, Copy, Debug, Default)]
pub struct BoundingBox {
    /// Left edge, as a fraction of image width.
    pub x: f64,
    /// Top edge, as a fraction of image height.
    pub y: f64,
    /// Width, as a fraction of image width.
    pub width: f64,
    /// Height, as a fraction of image height.
    pub height: f64,
}

/// The six relative keypoints a face detection carries.
#[derive(Clone, Copy, Debug, Default)]
pub struct Keypoints {
    /// Detector's left eye (subject's right eye).
    pub left_eye: Keypoint,
    /// Detector's right eye (subject's left eye).
    pub right_eye: Keypoint,
    /// Nose tip.
    pub nose: Keypoint,
    /// Mouth center.
    pub mouth: Keypoint,
    /// Left ear tragion.
    pub left_ear: Keypoint,
    /// Right ear tragion.
    pub right_ear: Keypoint,
}

/// One face detection.
#[derive(Clone, Copy, Debug)]
pub struct Detection {
    /// Detector confidence, `[0, 1]`.
    pub score: f64,
    /// Relative bounding box.
    pub bbox: BoundingBox,
    /// The six relative keypoints.
    pub keypoints: Keypoints,
}

/// A single pose reading: the world-space nose Z coordinate, or nothing if
/// the pose model produced no landmarks this frame.
#[derive(Clone, Copy, Debug)]
pub struct PoseSample {
    /// World-space nose Z, unscaled (the pipeline multiplies by 100).
    pub nose_z: f64,
}

/// Returns zero or more face detections for a frame.
pub trait FaceDetector: Send {
    /// Runs detection on `frame`. An empty vector means no face found; an
    /// error is a transient detector failure, counted into `face_lost`.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Returns the world-space nose Z, or `None`, for a frame.
pub trait PoseDetector: Send {
    /// Runs pose estimation on `frame`. `Ok(None)` means no landmarks found;
    /// an error is a transient detector failure, counted into `pose_lost`.
    fn detect(&mut self, frame: &Frame) -> Result<Option<PoseSample>>;
}

/// A [`FaceDetector`] that never finds a face. Used where no real backend is
/// wired in.
#[derive(Default)]
pub struct NullFaceDetector;

impl FaceDetector for NullFaceDetector {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(Vec::new())
    }
}

/// A [`PoseDetector`] that never produces a reading. Used where no real
/// backend is wired in.
#[derive(Default)]
pub struct NullPoseDetector;

impl PoseDetector for NullPoseDetector {
    fn detect(&mut self, _frame: &Frame) -> Result<Option<PoseSample>> {
        Ok(None)
    }
}

/// Selects the highest-scoring detection, matching the feature extractor's
/// "best face" input.
#[must_use]
pub fn best_detection(detections: &[Detection]) -> Option<Detection> {
    detections.iter().copied().fold(None, |best, d| match best {
        Some(b) if b.score >= d.score => Some(b),
        _ => Some(d),
    })
}
