//! Feature extractor: turns a frame plus optional detections into a
//! [`FeatureVector`] and frame-quality scalars.

use crate::{
    consts::YAW_EPS,
    detectors::{Detection, PoseSample},
};
use dws_camera::Frame;
use serde::Serialize;
use opencv::{
    core::{Mat, CV_8UC3},
    imgproc,
    prelude::*,
};

#[cfg(test)]
use mock_instant::Instant;
#[cfg(not(test))]
use std::time::Instant;

/// A value that may go stale: the extractor keeps producing it from the last
/// successful detection when the detector that feeds it is skipped or fails,
/// per the "reuse previous feature when detector skipped" re-architecture
/// note. Fusion reads `last_value` but weights only by the caller's own
/// `present_now`-derived booleans on [`FeatureVector`].
#[derive(Clone, Copy, Debug, Default)]
struct Feature<T> {
    last_value: Option<T>,
    #[allow(dead_code)]
    last_valid_ts: Option<Instant>,
}

impl<T: Copy> Feature<T> {
    fn set(&mut self, now: Instant, value: T) {
        self.last_value = Some(value);
        self.last_valid_ts = Some(now);
    }
}

/// Feature vector computed per frame; fields may be null when their source
/// detector has never produced a value.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct FeatureVector {
    /// Fraction of image area covered by the face bbox.
    pub bbox_area: Option<f64>,
    /// Relative distance between the two eye keypoints.
    pub eye_dist: Option<f64>,
    /// Head roll, degrees, wrapped into `(-90, 90]`.
    pub roll_deg: Option<f64>,
    /// Log-ratio of ear-to-nose distances; positive = turned right.
    pub yaw_proxy: Option<f64>,
    /// Detector confidence of the selected face, `0.0` if none.
    pub face_score: f64,
    /// Whether a face was found in this frame's own detection (not reused).
    pub has_face: bool,
    /// Whether both eye keypoints were present.
    pub eyes_visible: bool,
    /// Whether both ear keypoints were present.
    pub ears_visible: bool,
    /// Whether a pose reading was found in this frame's own detection.
    pub has_pose: bool,
    /// World-space nose Z, times 100. Reused verbatim when the pose detector
    /// is skipped or fails this frame.
    pub metric_nose_z: Option<f64>,
}

/// Frame-quality scalars, computed every frame regardless of detector
/// striding.
#[derive(Clone, Copy, Debug)]
pub struct FrameQuality {
    /// Mean brightness of the grayscale, downscaled processing frame.
    pub brightness: f64,
    /// Variance of the 64-bit Laplacian of the grayscale, downscaled
    /// processing frame.
    pub blur_var: f64,
}

/// Stateful extractor: owns the capability cells that let individual
/// features outlive the frame where they were last measured.
#[derive(Default)]
pub struct FeatureExtractor {
    bbox_area: Feature<f64>,
    eye_dist: Feature<f64>,
    roll_deg: Feature<f64>,
    yaw_proxy: Feature<f64>,
    metric_nose_z: Feature<f64>,
    has_face: bool,
    eyes_visible: bool,
    ears_visible: bool,
    has_pose: bool,
}

impl FeatureExtractor {
    /// Creates an extractor with no feature history yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one frame. `face_ran`/`pose_ran` reflect this tick's striding
    /// decision (see [`crate::qos`]); when a detector did not run, its
    /// contribution and booleans are left untouched (reused verbatim).
    pub fn extract(
        &mut self,
        now: Instant,
        face_ran: bool,
        face: Option<Detection>,
        pose_ran: bool,
        pose: Option<PoseSample>,
    ) -> FeatureVector {
        let mut face_score = 0.0;
        if face_ran {
            match face {
                Some(det) => {
                    let (left, right) = (det.keypoints.left_eye, det.keypoints.right_eye);
                    let (left, right) =
                        if left.x <= right.x { (left, right) } else { (right, left) };
                    let dx = right.x - left.x;
                    let dy = right.y - left.y;
                    let eye_dist = dx.hypot(dy);
                    let mut roll_deg = dy.atan2(dx).to_degrees();
                    if roll_deg <= -90.0 {
                        roll_deg += 180.0;
                    } else if roll_deg > 90.0 {
                        roll_deg -= 180.0;
                    }
                    let d_right_ear_to_nose =
                        dist(det.keypoints.right_ear, det.keypoints.nose);
                    let d_left_ear_to_nose = dist(det.keypoints.left_ear, det.keypoints.nose);
                    let yaw_proxy = ((d_right_ear_to_nose + YAW_EPS)
                        / (d_left_ear_to_nose + YAW_EPS))
                        .ln();
                    let bbox_area =
                        det.bbox.width.clamp(0.0, 1.0) * det.bbox.height.clamp(0.0, 1.0);

                    self.bbox_area.set(now, bbox_area);
                    self.eye_dist.set(now, eye_dist);
                    self.roll_deg.set(now, roll_deg);
                    self.yaw_proxy.set(now, yaw_proxy);
                    face_score = det.score;
                    self.has_face = true;
                    self.eyes_visible = true;
                    self.ears_visible = true;
                }
                None => {
                    self.has_face = false;
                    self.eyes_visible = false;
                    self.ears_visible = false;
                }
            }
        }
        if pose_ran {
            match pose {
                Some(sample) => {
                    self.metric_nose_z.set(now, sample.nose_z * 100.0);
                    self.has_pose = true;
                }
                None => {
                    self.has_pose = false;
                }
            }
        }

        FeatureVector {
            bbox_area: self.bbox_area.last_value,
            eye_dist: self.eye_dist.last_value,
            roll_deg: self.roll_deg.last_value,
            yaw_proxy: self.yaw_proxy.last_value,
            face_score,
            has_face: self.has_face,
            eyes_visible: self.eyes_visible,
            ears_visible: self.ears_visible,
            has_pose: self.has_pose,
            metric_nose_z: self.metric_nose_z.last_value,
        }
    }
}

fn dist(a: crate::detectors::Keypoint, b: crate::detectors::Keypoint) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Downscales `frame` by `proc_scale` and computes mean brightness and
/// Laplacian variance of its grayscale version.
pub fn frame_quality(frame: &Frame, proc_scale: f64) -> eyre::Result<FrameQuality> {
    let src = unsafe {
        Mat::new_rows_cols_with_data_unsafe(
            frame.height as i32,
            frame.width as i32,
            CV_8UC3,
            frame.data.as_ptr() as *mut std::ffi::c_void,
            opencv::core::Mat_AUTO_STEP,
        )?
    };
    let mut scaled = Mat::default();
    let size = opencv::core::Size::new(
        (f64::from(frame.width) * proc_scale).round() as i32,
        (f64::from(frame.height) * proc_scale).round() as i32,
    );
    imgproc::resize(&src, &mut scaled, size, 0.0, 0.0, imgproc::INTER_AREA)?;

    let mut gray = Mat::default();
    imgproc::cvt_color(
        &scaled,
        &mut gray,
        imgproc::COLOR_BGR2GRAY,
        0,
        opencv::core::AlgorithmHint::ALGO_HINT_DEFAULT,
    )?;

    let brightness = opencv::core::mean(&gray, &opencv::core::no_array())?[0];

    let mut laplacian = Mat::default();
    imgproc::laplacian(&gray, &mut laplacian, opencv::core::CV_64F, 1, 1.0, 0.0, opencv::core::BORDER_DEFAULT)?;
    let mut mean = opencv::core::Scalar::default();
    let mut stddev = opencv::core::Scalar::default();
    opencv::core::mean_std_dev(&laplacian, &mut mean, &mut stddev, &opencv::core::no_array())?;
    let blur_var = stddev[0] * stddev[0];

    Ok(FrameQuality { brightness, blur_var })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::{BoundingBox, Keypoints};

    fn det(score: f64) -> Detection {
        Detection {
            score,
            bbox: BoundingBox { x: 0.3, y: 0.2, width: 0.4, height: 0.5 },
            keypoints: Keypoints {
                left_eye: crate::detectors::Keypoint { x: 0.4, y: 0.4 },
                right_eye: crate::detectors::Keypoint { x: 0.6, y: 0.4 },
                nose: crate::detectors::Keypoint { x: 0.5, y: 0.5 },
                mouth: crate::detectors::Keypoint { x: 0.5, y: 0.6 },
                left_ear: crate::detectors::Keypoint { x: 0.35, y: 0.45 },
                right_ear: crate::detectors::Keypoint { x: 0.65, y: 0.45 },
            },
        }
    }

    #[test]
    fn reuses_bbox_when_face_detector_skipped() {
        let mut extractor = FeatureExtractor::new();
        let now = Instant::now();
        let first = extractor.extract(now, true, Some(det(0.9)), false, None);
        assert!(first.has_face);
        assert_eq!(first.bbox_area, Some(0.4 * 0.5));

        let second = extractor.extract(now, false, None, false, None);
        assert!(second.has_face, "booleans reused verbatim when detector skipped");
        assert_eq!(second.bbox_area, first.bbox_area);
    }

    #[test]
    fn metric_reused_when_pose_skipped() {
        let mut extractor = FeatureExtractor::new();
        let now = Instant::now();
        let first = extractor.extract(now, false, None, true, Some(PoseSample { nose_z: -0.3 }));
        assert_eq!(first.metric_nose_z, Some(-30.0));

        let second = extractor.extract(now, false, None, false, None);
        assert_eq!(second.metric_nose_z, Some(-30.0));
        assert!(!second.has_pose);
    }

    #[test]
    fn eye_keypoints_swapped_when_out_of_order() {
        let mut extractor = FeatureExtractor::new();
        let now = Instant::now();
        let mut reversed = det(0.5);
        std::mem::swap(&mut reversed.keypoints.left_eye, &mut reversed.keypoints.right_eye);
        let out = extractor.extract(now, true, Some(reversed), false, None);
        // hypot is symmetric, so eye_dist is unaffected by the swap either way.
        assert!(out.eye_dist.unwrap() > 0.0);
    }
}
