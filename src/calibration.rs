//! The two-phase calibration protocol and its persistence.
//!
//! A phase is a fixed-length sampling window during which the receiver task
//! appends metric/eye/bbox samples read from the shared state store. Once
//! both phases (REVIEW then FOCUS) are accepted, `finalize` derives a
//! [`CalibrationProfile`] and persists it atomically.

use crate::{
    consts::{
        CALIBRATION_BAND_FRACTION, CALIBRATION_BAND_MAX, CALIBRATION_BAND_MIN,
        CALIBRATION_DWELL_MS_DEFAULT, CALIBRATION_MIN_CONFIDENCE, CALIBRATION_MIN_OK_SAMPLES,
        CALIBRATION_MIN_SUMMARY_SAMPLES, CALIBRATION_PHASE_DURATION_S,
        CALIBRATION_SCHEMA_VERSION, CALIBRATION_STABILITY_FLOOR, CALIBRATION_STABILITY_FRACTION,
    },
    paths,
};
use eyre::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::fs;

/// Label recorded into `CalibrationProfile::metric`; this crate only ever
/// calibrates on the world-space nose-Z proxy.
const METRIC_NAME: &str = "nose_z_x100";

/// One of the two calibration phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    /// Leaned-back baseline.
    Review,
    /// Leaned-in baseline.
    Focus,
}

/// Per-phase eye/bbox baseline, averaged over the phase's accepted samples.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct FaceBaseline {
    /// Mean relative eye-to-eye distance observed during the phase.
    pub eye_dist: f64,
    /// Mean relative bbox area observed during the phase.
    pub bbox_area: f64,
}

/// The two face baselines used by [`crate::fusion`] to normalize eye/bbox
/// signals.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct FaceBaselines {
    /// REVIEW-phase baseline.
    pub review: FaceBaseline,
    /// FOCUS-phase baseline.
    pub focus: FaceBaseline,
}

/// Derived decision thresholds, computed once at finalize time.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema)]
pub struct Thresholds {
    /// Midpoint between `review_mean` and `focus_mean`.
    pub mid: f64,
    /// Enter-FOCUS threshold on the EMA.
    pub t_focus_in: f64,
    /// Enter-REVIEW threshold on the EMA.
    pub t_review_in: f64,
    /// Minimum time spent in a transition state before it commits.
    pub dwell_ms: u64,
}

/// Persisted calibration profile. Published to the pipeline via a pointer
/// swap of this immutable record; readers never see torn updates.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct CalibrationProfile {
    /// Schema version.
    pub v: u32,
    /// Name of the metric the profile was calibrated against.
    pub metric: String,
    /// Mean metric value recorded during the REVIEW phase.
    pub review_mean: f64,
    /// Population standard deviation of the REVIEW phase's metric samples.
    pub review_std: f64,
    /// Mean metric value recorded during the FOCUS phase.
    pub focus_mean: f64,
    /// Population standard deviation of the FOCUS phase's metric samples.
    pub focus_std: f64,
    /// Derived thresholds.
    pub thresholds: Thresholds,
    /// Per-phase face baselines.
    pub face_baselines: FaceBaselines,
    /// ISO-8601 UTC timestamp, with trailing `Z`, of when this profile was
    /// derived.
    pub created_at: String,
}

/// Errors raised while driving a calibration phase or finalizing it.
#[derive(Debug, Error)]
pub enum CalibrationError {
    /// A phase's metric sample count fell short of [`CALIBRATION_MIN_OK_SAMPLES`].
    #[error("phase {phase:?} collected only {n} metric samples, need at least {min}")]
    InsufficientSamples {
        /// The phase that failed acceptance.
        phase: Phase,
        /// Samples actually collected.
        n: usize,
        /// Minimum required.
        min: usize,
    },
    /// `finalize` was called before both phases were accepted.
    #[error("cannot finalize: missing phase(s) {0:?}")]
    MissingPhase(Vec<Phase>),
}

/// Summary of one phase's accepted samples, also the shape sent back to
/// clients as `calib_result_phase`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema)]
pub struct PhaseSummary {
    /// Which phase this summarizes.
    pub phase: Phase,
    /// Mean of the metric samples.
    pub mean: f64,
    /// Population standard deviation of the metric samples.
    pub std: f64,
    /// Number of metric samples collected.
    pub n: usize,
    /// Whether the metric samples were stable enough to trust.
    pub stable: bool,
    /// Mean eye/bbox baselines observed during the phase.
    pub face_means: FaceBaseline,
}

/// Accumulator for one in-progress phase.
#[derive(Debug, Default)]
struct PhaseSamples {
    metric: Vec<f64>,
    eye_dist: Vec<f64>,
    bbox_area: Vec<f64>,
}

/// Drives the two-phase sampling window and derives a [`CalibrationProfile`]
/// once both phases are accepted.
#[derive(Debug, Default)]
pub struct CalibrationService {
    active: Option<(Phase, PhaseSamples)>,
    review: Option<PhaseSummary>,
    focus: Option<PhaseSummary>,
}

impl CalibrationService {
    /// Creates a service with no phase samples collected yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins collecting samples for `phase`, discarding any previously
    /// collected in-progress samples for it.
    pub fn start_phase(&mut self, phase: Phase) {
        self.active = Some((phase, PhaseSamples::default()));
    }

    /// Default sampling window length for a phase.
    #[must_use]
    pub fn default_phase_duration() -> Duration {
        Duration::from_secs_f64(CALIBRATION_PHASE_DURATION_S)
    }

    /// Appends one tick's readings to the active phase, per the gating rules
    /// in the fusion confidence and visibility flags. No-op if no phase is
    /// active.
    pub fn tick(
        &mut self,
        metric: Option<f64>,
        confidence: f64,
        eyes_visible: bool,
        eye_dist: Option<f64>,
        has_face: bool,
        bbox_area: Option<f64>,
    ) {
        let Some((_, samples)) = &mut self.active else { return };
        if let Some(metric) = metric {
            if confidence >= CALIBRATION_MIN_CONFIDENCE {
                samples.metric.push(metric);
            }
        }
        if eyes_visible {
            if let Some(eye_dist) = eye_dist {
                samples.eye_dist.push(eye_dist);
            }
        }
        if has_face {
            if let Some(bbox_area) = bbox_area {
                samples.bbox_area.push(bbox_area);
            }
        }
    }

    /// Ends the active phase, summarizes it, and records it as accepted if it
    /// meets the minimum metric-sample count.
    pub fn finish_phase(&mut self) -> Result<PhaseSummary, CalibrationError> {
        let (phase, samples) = self.active.take().expect("finish_phase called with no active phase");
        let n = samples.metric.len();
        if n < CALIBRATION_MIN_OK_SAMPLES {
            return Err(CalibrationError::InsufficientSamples {
                phase,
                n,
                min: CALIBRATION_MIN_OK_SAMPLES,
            });
        }
        let (mean, std) = summarize(&samples.metric);
        let stable =
            std <= (CALIBRATION_STABILITY_FLOOR).max(CALIBRATION_STABILITY_FRACTION * mean.abs());
        let face_means = FaceBaseline {
            eye_dist: mean_or_zero(&samples.eye_dist),
            bbox_area: mean_or_zero(&samples.bbox_area),
        };
        let summary = PhaseSummary { phase, mean, std, n, stable, face_means };
        match phase {
            Phase::Review => self.review = Some(summary),
            Phase::Focus => self.focus = Some(summary),
        }
        Ok(summary)
    }

    /// Derives and returns the final profile once both phases are accepted.
    /// Does not persist it; callers should follow up with [`store`].
    pub fn finalize(&self) -> Result<CalibrationProfile, CalibrationError> {
        let mut missing = Vec::new();
        if self.review.is_none() {
            missing.push(Phase::Review);
        }
        if self.focus.is_none() {
            missing.push(Phase::Focus);
        }
        if !missing.is_empty() {
            return Err(CalibrationError::MissingPhase(missing));
        }
        let review = self.review.expect("checked above");
        let focus = self.focus.expect("checked above");
        Ok(derive_profile(review, focus))
    }
}

/// Population mean and standard deviation of `samples`, or `(0.0, 0.0)` if
/// fewer than [`CALIBRATION_MIN_SUMMARY_SAMPLES`] are present.
fn summarize(samples: &[f64]) -> (f64, f64) {
    if samples.len() < CALIBRATION_MIN_SUMMARY_SAMPLES {
        return (0.0, 0.0);
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

fn mean_or_zero(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}

/// Computes `mid`, `band`, `t_focus_in`, `t_review_in` from the two phase
/// summaries and assembles the persisted profile.
fn derive_profile(review: PhaseSummary, focus: PhaseSummary) -> CalibrationProfile {
    let mid = (review.mean + focus.mean) / 2.0;
    let band =
        (CALIBRATION_BAND_FRACTION * (review.mean - focus.mean).abs())
            .clamp(CALIBRATION_BAND_MIN, CALIBRATION_BAND_MAX);
    let thresholds = Thresholds {
        mid,
        t_focus_in: mid - band / 2.0,
        t_review_in: mid + band / 2.0,
        dwell_ms: CALIBRATION_DWELL_MS_DEFAULT,
    };
    CalibrationProfile {
        v: CALIBRATION_SCHEMA_VERSION,
        metric: METRIC_NAME.to_owned(),
        review_mean: review.mean,
        review_std: review.std,
        focus_mean: focus.mean,
        focus_std: focus.std,
        thresholds,
        face_baselines: FaceBaselines { review: review.face_means, focus: focus.face_means },
        created_at: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .expect("formatting a valid OffsetDateTime never fails"),
    }
}

impl CalibrationProfile {
    /// An uncalibrated profile: every anchor pair collapses `far == near`, so
    /// [`crate::fusion::lin_norm`] returns `None` for every channel until the
    /// user runs the two-phase calibration. Used when no persisted profile
    /// exists yet.
    #[must_use]
    pub fn uncalibrated() -> Self {
        Self {
            v: CALIBRATION_SCHEMA_VERSION,
            metric: METRIC_NAME.to_owned(),
            review_mean: 0.0,
            review_std: 0.0,
            focus_mean: 0.0,
            focus_std: 0.0,
            thresholds: Thresholds {
                mid: 0.0,
                t_focus_in: 0.0,
                t_review_in: 0.0,
                dwell_ms: CALIBRATION_DWELL_MS_DEFAULT,
            },
            face_baselines: FaceBaselines::default(),
            created_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .expect("formatting a valid OffsetDateTime never fails"),
        }
    }

    /// Eye-distance anchors consumed by the health monitor's `too_close_far`
    /// check: `(eye_near, eye_far)` i.e. `(focus, review)`. `None` when the
    /// two baselines are undifferentiated (e.g. an uncalibrated profile),
    /// mirroring [`crate::fusion::lin_norm`]'s own degenerate-anchor check.
    #[must_use]
    pub fn eye_anchors(&self) -> (Option<f64>, Option<f64>) {
        let near = self.face_baselines.focus.eye_dist;
        let far = self.face_baselines.review.eye_dist;
        if (near - far).abs() < f64::EPSILON {
            (None, None)
        } else {
            (Some(near), Some(far))
        }
    }

    /// Atomically persists the profile at `path` (write to a temp file in the
    /// same directory, then rename).
    pub async fn store<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        fs::write(tmp.path(), json).await?;
        tmp.persist(path).map_err(|e| e.error)?;
        tracing::info!("stored calibration profile at {}", path.display());
        Ok(())
    }

    /// Loads a previously persisted profile, or `Ok(None)` if none exists yet.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path).await?;
        let profile = serde_json::from_str(&contents)?;
        Ok(Some(profile))
    }

    /// Loads the profile from the platform-appropriate per-user config path.
    pub async fn load_default() -> Result<Option<Self>> {
        Self::load(paths::calibration_file_path()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_phase(service: &mut CalibrationService, phase: Phase, metric_values: &[f64]) {
        service.start_phase(phase);
        for &m in metric_values {
            service.tick(Some(m), 0.9, true, Some(0.2), true, Some(0.1));
        }
    }

    #[test]
    fn finish_phase_rejects_too_few_samples() {
        let mut service = CalibrationService::new();
        run_phase(&mut service, Phase::Review, &[1.0; 3]);
        let err = service.finish_phase().unwrap_err();
        assert!(matches!(err, CalibrationError::InsufficientSamples { phase: Phase::Review, .. }));
    }

    #[test]
    fn finalize_requires_both_phases() {
        let mut service = CalibrationService::new();
        run_phase(&mut service, Phase::Review, &[-30.0; 12]);
        service.finish_phase().unwrap();
        let err = service.finalize().unwrap_err();
        assert!(matches!(err, CalibrationError::MissingPhase(phases) if phases == [Phase::Focus]));
    }

    #[test]
    fn s6_derives_expected_thresholds() {
        let mut service = CalibrationService::new();
        run_phase(&mut service, Phase::Review, &[-30.0; 60]);
        service.finish_phase().unwrap();
        run_phase(&mut service, Phase::Focus, &[-28.0; 60]);
        service.finish_phase().unwrap();
        let profile = service.finalize().unwrap();
        assert!((profile.thresholds.mid - -29.0).abs() < 1e-9);
        assert!((profile.thresholds.t_focus_in - -29.4).abs() < 1e-9);
        assert!((profile.thresholds.t_review_in - -28.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn round_trip_preserves_thresholds() {
        let mut service = CalibrationService::new();
        run_phase(&mut service, Phase::Review, &[-30.0; 60]);
        service.finish_phase().unwrap();
        run_phase(&mut service, Phase::Focus, &[-28.0; 60]);
        service.finish_phase().unwrap();
        let profile = service.finalize().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        profile.store(&path).await.unwrap();
        let loaded = CalibrationProfile::load(&path).await.unwrap().unwrap();

        assert!((loaded.thresholds.mid - profile.thresholds.mid).abs() < 1e-9);
        assert!((loaded.thresholds.t_focus_in - profile.thresholds.t_focus_in).abs() < 1e-9);
        assert!((loaded.thresholds.t_review_in - profile.thresholds.t_review_in).abs() < 1e-9);
    }
}
