//! Fusion engine: normalizes raw signals against calibration anchors, forms
//! a confidence-weighted convex combination, and maintains a winsorized EMA.

use crate::{
    calibration::CalibrationProfile,
    consts::{
        BLUR_VAR_GOOD, BLUR_VAR_MIN, BRIGHTNESS_GOOD, BRIGHTNESS_MIN, CONF_WEIGHT_BBOX,
        CONF_WEIGHT_EYE, CONF_WEIGHT_QUALITY, CONF_WEIGHT_Z, EMA_MIN_DT_S, EMA_TAU_S,
        WEIGHT_BBOX, WEIGHT_EYE, WEIGHT_Z, WINSOR_DELTA,
    },
    features::{FeatureVector, FrameQuality},
};
use serde::Serialize;
use std::time::Duration;

/// A single fusion step's output.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct FusedSample {
    /// The confidence-weighted convex combination, `[0, 1]` when present.
    ///
    /// Invariant: non-null only if the sum of effective weights was `> 0`.
    pub raw: Option<f64>,
    /// The winsorized EMA of `raw`, seeded by the first non-null `raw`.
    pub ema: Option<f64>,
}

/// Normalizes `x` against the `far` (maps to 0) / `near` (maps to 1) anchors.
/// Returns `None` if any argument is `None` or `far == near`.
#[must_use]
pub fn lin_norm(x: Option<f64>, far: f64, near: f64) -> Option<f64> {
    let x = x?;
    if (far - near).abs() < f64::EPSILON {
        return None;
    }
    Some(((x - far) / (near - far)).clamp(0.0, 1.0))
}

/// Linear ramp from 0 at `lo` to 1 at `hi`, clamped.
fn ramp(x: f64, lo: f64, hi: f64) -> f64 {
    ((x - lo) / (hi - lo)).clamp(0.0, 1.0)
}

/// Stateful fusion engine: owns the EMA across ticks.
#[derive(Default)]
pub struct FusionEngine {
    ema: Option<f64>,
}

impl FusionEngine {
    /// Creates an engine with no prior EMA.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs one fusion step, returning the sample and the overall confidence
    /// used to gate the state machine.
    pub fn tick(
        &mut self,
        features: &FeatureVector,
        quality: FrameQuality,
        profile: &CalibrationProfile,
        dt: Duration,
    ) -> (FusedSample, f64) {
        let z_norm = lin_norm(features.metric_nose_z, profile.review_mean, profile.focus_mean);
        let eye_norm = lin_norm(
            features.eye_dist,
            profile.face_baselines.review.eye_dist,
            profile.face_baselines.focus.eye_dist,
        );
        let bbox_norm = lin_norm(
            features.bbox_area,
            profile.face_baselines.review.bbox_area,
            profile.face_baselines.focus.bbox_area,
        );

        let w_z = if features.has_pose && z_norm.is_some() { WEIGHT_Z } else { 0.0 };
        let w_eye = if features.eyes_visible && eye_norm.is_some() {
            WEIGHT_EYE * features.face_score
        } else {
            0.0
        };
        let w_bbox = if features.has_face && bbox_norm.is_some() {
            WEIGHT_BBOX * features.face_score
        } else {
            0.0
        };
        let sum_w = w_z + w_eye + w_bbox;

        let raw = (sum_w > 0.0).then(|| {
            let weighted = w_z * z_norm.unwrap_or(0.0)
                + w_eye * eye_norm.unwrap_or(0.0)
                + w_bbox * bbox_norm.unwrap_or(0.0);
            (weighted / sum_w).clamp(0.0, 1.0)
        });

        let ema = self.step_ema(raw, dt);

        let c_z = f64::from(u8::from(features.has_pose && z_norm.is_some()));
        let c_eye = if features.eyes_visible && eye_norm.is_some() { features.face_score } else { 0.0 };
        let c_box = if features.has_face && bbox_norm.is_some() { features.face_score } else { 0.0 };
        let c_q = ramp(quality.brightness, BRIGHTNESS_MIN, BRIGHTNESS_GOOD)
            .min(ramp(quality.blur_var, BLUR_VAR_MIN, BLUR_VAR_GOOD));
        let overall = CONF_WEIGHT_Z * c_z
            + CONF_WEIGHT_EYE * c_eye
            + CONF_WEIGHT_BBOX * c_box
            + CONF_WEIGHT_QUALITY * c_q;

        (FusedSample { raw, ema }, overall)
    }

    /// On a null input the previous EMA is preserved; otherwise the sample is
    /// winsorized to `±WINSOR_DELTA` of the prior value before blending in.
    fn step_ema(&mut self, raw: Option<f64>, dt: Duration) -> Option<f64> {
        let Some(x) = raw else { return self.ema };
        let new = match self.ema {
            None => x,
            Some(prev) => {
                let beta = 1.0 - (-dt.as_secs_f64().max(EMA_MIN_DT_S) / EMA_TAU_S).exp();
                let clamped = x.clamp(prev - WINSOR_DELTA, prev + WINSOR_DELTA);
                prev + beta * (clamped - prev)
            }
        };
        self.ema = Some(new);
        self.ema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{FaceBaseline, FaceBaselines, Thresholds};

    fn profile() -> CalibrationProfile {
        CalibrationProfile {
            v: 6,
            metric: "nose_z_x100".to_owned(),
            review_mean: -30.0,
            review_std: 0.5,
            focus_mean: -28.0,
            focus_std: 0.5,
            thresholds: Thresholds { mid: -29.0, t_focus_in: -29.4, t_review_in: -28.6, dwell_ms: 750 },
            face_baselines: FaceBaselines {
                review: FaceBaseline { eye_dist: 0.15, bbox_area: 0.1 },
                focus: FaceBaseline { eye_dist: 0.25, bbox_area: 0.2 },
            },
            created_at: "2026-01-01T00:00:00Z".to_owned(),
        }
    }

    #[test]
    fn lin_norm_endpoints_and_monotone() {
        assert_eq!(lin_norm(Some(1.0), 0.0, 1.0), Some(1.0));
        assert_eq!(lin_norm(Some(0.0), 0.0, 1.0), Some(0.0));
        assert!(lin_norm(Some(0.25), 0.0, 1.0) < lin_norm(Some(0.75), 0.0, 1.0));
        assert_eq!(lin_norm(None, 0.0, 1.0), None);
        assert_eq!(lin_norm(Some(0.5), 1.0, 1.0), None);
    }

    #[test]
    fn fused_raw_in_bounds_when_present() {
        let mut engine = FusionEngine::new();
        let features = FeatureVector {
            metric_nose_z: Some(-29.0),
            has_pose: true,
            eye_dist: Some(0.2),
            eyes_visible: true,
            bbox_area: Some(0.15),
            has_face: true,
            face_score: 0.8,
            ..FeatureVector::default()
        };
        let quality = FrameQuality { brightness: 100.0, blur_var: 100.0 };
        let (sample, overall) = engine.tick(&features, quality, &profile(), Duration::from_millis(33));
        let raw = sample.raw.expect("weights are positive");
        assert!((0.0..=1.0).contains(&raw));
        assert!((0.0..=1.0).contains(&sample.ema.unwrap()));
        assert!((0.0..=1.0).contains(&overall));
    }

    #[test]
    fn zero_weights_yield_null_raw_and_preserve_ema() {
        let mut engine = FusionEngine::new();
        let quality = FrameQuality { brightness: 100.0, blur_var: 100.0 };
        let present = FeatureVector {
            metric_nose_z: Some(-29.0),
            has_pose: true,
            ..FeatureVector::default()
        };
        let (first, _) = engine.tick(&present, quality, &profile(), Duration::from_millis(33));
        assert!(first.ema.is_some());

        let absent = FeatureVector::default();
        let (second, _) = engine.tick(&absent, quality, &profile(), Duration::from_millis(33));
        assert_eq!(second.raw, None);
        assert_eq!(second.ema, first.ema);
    }

    #[test]
    fn ema_step_never_exceeds_delta_plus_beta_delta() {
        let mut engine = FusionEngine::new();
        let quality = FrameQuality { brightness: 100.0, blur_var: 100.0 };
        let lo = FeatureVector {
            metric_nose_z: Some(-30.0),
            has_pose: true,
            ..FeatureVector::default()
        };
        let hi = FeatureVector {
            metric_nose_z: Some(-28.0),
            has_pose: true,
            ..FeatureVector::default()
        };
        let (s1, _) = engine.tick(&lo, quality, &profile(), Duration::from_millis(33));
        let (s2, _) = engine.tick(&hi, quality, &profile(), Duration::from_millis(33));
        let step = (s2.ema.unwrap() - s1.ema.unwrap()).abs();
        assert!(step <= WINSOR_DELTA * 2.0 + 1e-9);
    }
}
