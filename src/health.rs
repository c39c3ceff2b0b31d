//! Health monitor: classifies the frame/session status from a flag vector.

use serde::Serialize;
use crate::{
    consts::{
        BLUR_VAR_MIN, BRIGHTNESS_GOOD, BRIGHTNESS_MIN, FACE_LOST_STREAK, MAX_ABS_ROLL_DEG,
        MAX_ABS_YAW, POSE_LOST_STREAK, TOO_CLOSE_RATIO, TOO_FAR_RATIO,
    },
    features::{FeatureVector, FrameQuality},
};

/// Overall frame/session status derived from the flag vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// Nothing degraded.
    Ok,
    /// One or more non-fatal flags set; the pipeline keeps running.
    Degraded,
    /// A fatal flag is set; the state machine evaluates no transitions.
    Paused,
}

/// Individual health flags, each independently computed from this frame.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct HealthFlags {
    /// Brightness below [`BRIGHTNESS_MIN`].
    pub low_light: bool,
    /// Laplacian variance below [`BLUR_VAR_MIN`].
    pub motion_blur: bool,
    /// `face_lost_streak` reached [`FACE_LOST_STREAK`].
    pub face_lost: bool,
    /// `pose_lost_streak` reached [`POSE_LOST_STREAK`].
    pub pose_lost: bool,
    /// `|yaw_proxy| > MAX_ABS_YAW` or `|roll_deg| > MAX_ABS_ROLL_DEG`.
    pub looking_away: bool,
    /// Eye distance too far outside the calibrated FOCUS/REVIEW band.
    pub too_close_far: bool,
    /// The last frame read failed.
    pub camera_error: bool,
}

/// Per-frame health classification.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct HealthReport {
    /// Overall status.
    pub status: HealthStatus,
    /// Individual flags contributing to `status`.
    pub flags: HealthFlags,
    /// This frame's mean brightness.
    pub brightness: f64,
    /// This frame's Laplacian variance.
    pub blur_var: f64,
}

/// Linear ramp from 0 at `lo` to 1 at `hi`, clamped.
fn ramp(x: f64, lo: f64, hi: f64) -> f64 {
    ((x - lo) / (hi - lo)).clamp(0.0, 1.0)
}

/// Tracks the consecutive-miss streaks that [`HealthFlags::face_lost`] and
/// [`HealthFlags::pose_lost`] are derived from.
#[derive(Default)]
pub struct HealthMonitor {
    face_lost_streak: u32,
    pose_lost_streak: u32,
}

impl HealthMonitor {
    /// Creates a monitor with no history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes this frame's [`HealthReport`].
    ///
    /// `face_ran`/`pose_ran` must match the striding decision the feature
    /// extractor was given this tick: streaks only advance on frames where
    /// the corresponding detector actually ran.
    #[allow(clippy::too_many_arguments)]
    pub fn compute(
        &mut self,
        features: &FeatureVector,
        quality: FrameQuality,
        camera_error: bool,
        face_ran: bool,
        pose_ran: bool,
        eye_near: Option<f64>,
        eye_far: Option<f64>,
    ) -> HealthReport {
        if face_ran {
            if features.has_face {
                self.face_lost_streak = 0;
            } else {
                self.face_lost_streak += 1;
            }
        }
        if pose_ran {
            if features.has_pose {
                self.pose_lost_streak = 0;
            } else {
                self.pose_lost_streak += 1;
            }
        }

        let low_light = quality.brightness < BRIGHTNESS_MIN;
        let motion_blur = quality.blur_var < BLUR_VAR_MIN;
        let face_lost = self.face_lost_streak >= FACE_LOST_STREAK;
        let pose_lost = self.pose_lost_streak >= POSE_LOST_STREAK;
        let looking_away = features.yaw_proxy.map_or(false, |y| y.abs() > MAX_ABS_YAW)
            || features.roll_deg.map_or(false, |r| r.abs() > MAX_ABS_ROLL_DEG);
        let too_close_far = match (features.eye_dist, eye_near, eye_far) {
            (Some(eye_dist), Some(eye_near), Some(eye_far)) => {
                eye_dist > TOO_CLOSE_RATIO * eye_near || eye_dist < TOO_FAR_RATIO * eye_far
            }
            _ => false,
        };

        let c_bri = ramp(quality.brightness, BRIGHTNESS_MIN, BRIGHTNESS_GOOD);

        let flags = HealthFlags {
            low_light,
            motion_blur,
            face_lost,
            pose_lost,
            looking_away,
            too_close_far,
            camera_error,
        };

        let status = if face_lost || camera_error || (low_light && c_bri == 0.0) {
            HealthStatus::Paused
        } else if motion_blur || looking_away || pose_lost || too_close_far {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        };

        HealthReport { status, flags, brightness: quality.brightness, blur_var: quality.blur_var }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quality(brightness: f64, blur_var: f64) -> FrameQuality {
        FrameQuality { brightness, blur_var }
    }

    #[test]
    fn face_lost_after_ten_misses() {
        let mut monitor = HealthMonitor::new();
        let mut report = None;
        for _ in 0..10 {
            report = Some(monitor.compute(
                &FeatureVector::default(),
                quality(100.0, 100.0),
                false,
                true,
                false,
                None,
                None,
            ));
        }
        assert!(report.unwrap().flags.face_lost);
    }

    #[test]
    fn skipped_frames_do_not_advance_streak() {
        let mut monitor = HealthMonitor::new();
        for _ in 0..20 {
            monitor.compute(
                &FeatureVector::default(),
                quality(100.0, 100.0),
                false,
                false,
                false,
                None,
                None,
            );
        }
        let report = monitor.compute(
            &FeatureVector::default(),
            quality(100.0, 100.0),
            false,
            false,
            false,
            None,
            None,
        );
        assert!(!report.flags.face_lost);
    }

    #[test]
    fn low_light_and_camera_error_pause() {
        let mut monitor = HealthMonitor::new();
        let report = monitor.compute(
            &FeatureVector { has_face: true, ..FeatureVector::default() },
            quality(10.0, 100.0),
            false,
            true,
            false,
            None,
            None,
        );
        assert_eq!(report.status, HealthStatus::Paused);

        let mut monitor = HealthMonitor::new();
        let report = monitor.compute(
            &FeatureVector { has_face: true, ..FeatureVector::default() },
            quality(100.0, 100.0),
            true,
            true,
            false,
            None,
            None,
        );
        assert_eq!(report.status, HealthStatus::Paused);
    }

    #[test]
    fn too_close_far_degrades() {
        let mut monitor = HealthMonitor::new();
        let features = FeatureVector {
            has_face: true,
            eyes_visible: true,
            eye_dist: Some(0.5),
            ..FeatureVector::default()
        };
        // eye_near (focus) = 0.3, eye_far (review) = 0.2: 0.5 > 1.3*0.3
        let report =
            monitor.compute(&features, quality(100.0, 100.0), false, true, false, Some(0.3), Some(0.2));
        assert!(report.flags.too_close_far);
        assert_eq!(report.status, HealthStatus::Degraded);
    }
}
