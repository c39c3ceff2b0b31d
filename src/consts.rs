//! Project constants.

use std::ops::RangeInclusive;

/// Directory name under the per-user config root, matching the original
/// Python implementation's `user_config_dir()` layout.
pub const CONFIG_APP_DIR: &str = "DynamicWorkspace";

/// Sub-directory holding the calibration file.
pub const CONFIG_SUB_DIR: &str = "config";

/// File name of the persisted calibration profile.
pub const CALIBRATION_FILE: &str = "calibration.json";

/// Current schema version written to and expected from the calibration file.
pub const CALIBRATION_SCHEMA_VERSION: u32 = 6;

/// Milliseconds in a second, used to turn a frame rate into a budget.
pub const MS_PER_SEC: f64 = 1000.0;

/// Lower bound for `--fps`.
pub const TARGET_FPS_MIN: f64 = 10.0;

/// Upper bound for `--fps`.
pub const TARGET_FPS_MAX: f64 = 30.0;

/// Default `--fps` when unset.
pub const TARGET_FPS_DEFAULT: f64 = 20.0;

/// Number of camera indices probed by the `cameras` command (`0..6`).
pub const CAMERA_PROBE_RANGE: RangeInclusive<i32> = 0..=5;

/// Epsilon added to ear-to-nose distances before taking their log-ratio.
pub const YAW_EPS: f64 = 1e-6;

/// `|yaw_proxy|` above this is `looking_away`.
pub const MAX_ABS_YAW: f64 = 0.55;

/// `|roll_deg|` above this is `looking_away`.
pub const MAX_ABS_ROLL_DEG: f64 = 30.0;

/// Consecutive FD-run frames with no detection before `face_lost`.
pub const FACE_LOST_STREAK: u32 = 10;

/// Consecutive pose frames with no landmarks before `pose_lost`.
pub const POSE_LOST_STREAK: u32 = 10;

/// Brightness below this is `low_light`.
pub const BRIGHTNESS_MIN: f64 = 60.0;

/// Brightness at/above this fully satisfies the quality confidence ramp.
pub const BRIGHTNESS_GOOD: f64 = 120.0;

/// Laplacian variance below this is `motion_blur`.
pub const BLUR_VAR_MIN: f64 = 60.0;

/// Laplacian variance at/above this fully satisfies the quality confidence ramp.
pub const BLUR_VAR_GOOD: f64 = 150.0;

/// Fusion engine base weight of the depth-proxy (z) signal.
pub const WEIGHT_Z: f64 = 0.6;

/// Fusion engine base weight of the eye-distance signal.
pub const WEIGHT_EYE: f64 = 0.3;

/// Fusion engine base weight of the bbox-area signal.
pub const WEIGHT_BBOX: f64 = 0.1;

/// Overall-confidence weight of the depth-proxy component.
pub const CONF_WEIGHT_Z: f64 = 0.4;

/// Overall-confidence weight of the eye-distance component.
pub const CONF_WEIGHT_EYE: f64 = 0.3;

/// Overall-confidence weight of the bbox-area component.
pub const CONF_WEIGHT_BBOX: f64 = 0.2;

/// Overall-confidence weight of the frame-quality component.
pub const CONF_WEIGHT_QUALITY: f64 = 0.1;

/// EMA time constant, seconds.
pub const EMA_TAU_S: f64 = 0.25;

/// Winsorization clamp half-width applied to each EMA update.
pub const WINSOR_DELTA: f64 = 0.35;

/// Floor on `dt` fed into the EMA's `beta`, avoids a divide-by-near-zero blowup.
pub const EMA_MIN_DT_S: f64 = 1e-3;

/// State machine: enter REVIEW at/below this EMA value.
pub const STATE_LOW: f64 = 0.40;

/// State machine: enter FOCUS at/above this EMA value.
pub const STATE_HIGH: f64 = 0.60;

/// Dwell time in TRANSITION_TO_REVIEW before REVIEW commits.
pub const DWELL_REVIEW_MS: u64 = 750;

/// Dwell time in TRANSITION_TO_FOCUS before FOCUS commits.
pub const DWELL_FOCUS_MS: u64 = 750;

/// Minimum wall-clock gap between two stable state commits.
pub const MIN_FLIP_GAP_MS: u64 = 1500;

/// Default, runtime-overridable confidence floor required to start or commit
/// a transition.
pub const CONF_MIN_DEFAULT: f64 = 0.65;

/// Lower bound of `proc_scale`.
pub const PROC_SCALE_MIN: f64 = 0.55;

/// Upper bound of `proc_scale`.
pub const PROC_SCALE_MAX: f64 = 0.90;

/// Default `proc_scale`.
pub const PROC_SCALE_DEFAULT: f64 = 0.75;

/// Amount `proc_scale` steps up by when quality is stepped up.
pub const PROC_SCALE_STEP: f64 = 0.03;

/// Amount `proc_scale` steps down by when quality is stepped down.
pub const PROC_SCALE_DOWN_STEP: f64 = 0.05;

/// Lower bound of `fd_stride`.
pub const FD_STRIDE_MIN: u32 = 1;

/// Upper bound of `fd_stride`.
pub const FD_STRIDE_MAX: u32 = 4;

/// Default `fd_stride`.
pub const FD_STRIDE_DEFAULT: u32 = 2;

/// Lower bound of `pose_stride`.
pub const POSE_STRIDE_MIN: u32 = 1;

/// Upper bound of `pose_stride`.
pub const POSE_STRIDE_MAX: u32 = 3;

/// Default `pose_stride`.
pub const POSE_STRIDE_DEFAULT: u32 = 2;

/// QoS controller runs at most this often.
pub const QOS_PERIOD_S: f64 = 1.0;

/// `avg_ms` over `frame_budget_ms` above which the pipeline is overloaded.
pub const OVERLOAD_RATIO: f64 = 1.10;

/// `avg_ms` under `frame_budget_ms` below which quality is stepped back up.
pub const UNDERLOAD_RATIO: f64 = 0.85;

/// `cpu_pct` at/above this also counts as overload, independent of latency.
pub const CPU_OVERLOAD_PCT: f64 = 85.0;

/// Heartbeat cadence while the pipeline is overloaded (Hz).
pub const HB_LOW_HZ: f64 = 2.0;

/// Heartbeat cadence while the pipeline is not overloaded (Hz).
pub const HB_BASE_HZ: f64 = 4.0;

/// Capacity of the rolling frame-latency window.
pub const ROLLING_LATENCY_CAPACITY: usize = 30;

/// Default duration of a single calibration phase's sampling window.
pub const CALIBRATION_PHASE_DURATION_S: f64 = 3.0;

/// Calibration sampling tick.
pub const CALIBRATION_TICK_MS: u64 = 50;

/// Minimum metric samples for a calibration phase to be considered `ok`.
pub const CALIBRATION_MIN_OK_SAMPLES: usize = 10;

/// Minimum sample count before a phase's mean/std are even computed.
pub const CALIBRATION_MIN_SUMMARY_SAMPLES: usize = 5;

/// Minimum pipeline confidence required for a sample to be appended during
/// calibration.
pub const CALIBRATION_MIN_CONFIDENCE: f64 = 0.5;

/// Floor on the derived threshold band.
pub const CALIBRATION_BAND_MIN: f64 = 0.8;

/// Ceiling on the derived threshold band.
pub const CALIBRATION_BAND_MAX: f64 = 3.0;

/// Fraction of `|review_mean - focus_mean|` used to size the band before
/// clamping.
pub const CALIBRATION_BAND_FRACTION: f64 = 0.2;

/// Default `dwell_ms` recorded into a freshly derived `CalibrationProfile`.
pub const CALIBRATION_DWELL_MS_DEFAULT: u64 = 750;

/// Floor on the stability threshold `m_std <= max(floor, fraction * |mean|)`.
pub const CALIBRATION_STABILITY_FLOOR: f64 = 0.6;

/// Fraction of `|mean|` used in the stability threshold.
pub const CALIBRATION_STABILITY_FRACTION: f64 = 0.05;

/// `eye_dist` above `1.3 * eye_near` or below `0.7 * eye_far` is `too_close_far`.
pub const TOO_CLOSE_RATIO: f64 = 1.3;

/// See [`TOO_CLOSE_RATIO`].
pub const TOO_FAR_RATIO: f64 = 0.7;

/// Server ping interval and ping timeout.
pub const WS_PING_INTERVAL_S: u64 = 10;

/// Idle polling cadence of the sender loop.
pub const SENDER_IDLE_POLL_MS: u64 = 20;
