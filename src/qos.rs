//! QoS controller: once per second, adjusts processing scale, stride
//! counters, and heartbeat cadence from rolling average frame latency and
//! optional CPU load.

use crate::{
    clock::RollingLatency,
    consts::{
        CPU_OVERLOAD_PCT, EMA_MIN_DT_S, FD_STRIDE_DEFAULT, FD_STRIDE_MAX, FD_STRIDE_MIN, HB_BASE_HZ,
        HB_LOW_HZ, OVERLOAD_RATIO, POSE_STRIDE_DEFAULT, POSE_STRIDE_MAX, POSE_STRIDE_MIN,
        PROC_SCALE_DEFAULT, PROC_SCALE_DOWN_STEP, PROC_SCALE_MAX, PROC_SCALE_MIN, PROC_SCALE_STEP,
        QOS_PERIOD_S, UNDERLOAD_RATIO,
    },
};
use serde::Serialize;
use std::time::Duration;

#[cfg(test)]
use mock_instant::Instant;
#[cfg(not(test))]
use std::time::Instant;

/// Best-effort CPU load sampler. Platform-specific, so the pipeline takes it
/// behind a trait object and tolerates its absence.
pub trait CpuSampler: Send {
    /// Returns the current CPU utilization percentage, or `None` if it could
    /// not be read.
    fn sample(&mut self) -> Option<f64>;
}

/// The self-tuning trio plus derived heartbeat cadence, published once at
/// startup (`cam_res`) and thereafter refreshed at most once a second.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct QoSState {
    /// Processing-resolution scale, `[0.55, 0.90]`.
    pub proc_scale: f64,
    /// Face-detector stride, `[1, 4]`.
    pub fd_stride: u32,
    /// Pose-detector stride, `[1, 3]`.
    pub pose_stride: u32,
    /// Rolling average frame latency, milliseconds.
    pub avg_ms: Option<f64>,
    /// Whether the pipeline is currently overloaded.
    pub overload: bool,
    /// Heartbeat interval, seconds.
    pub hb_interval_s: f64,
    /// Camera's configured resolution, published once at startup.
    pub cam_res: (u32, u32),
    /// Processing resolution derived from `cam_res` and `proc_scale`.
    pub proc_res: (u32, u32),
    /// Last CPU utilization sample, if available.
    pub cpu_pct: Option<f64>,
    /// Measured frames processed per second over the last control period.
    pub fps: f64,
}

impl QoSState {
    fn proc_res(cam_res: (u32, u32), proc_scale: f64) -> (u32, u32) {
        (
            (f64::from(cam_res.0) * proc_scale).round() as u32,
            (f64::from(cam_res.1) * proc_scale).round() as u32,
        )
    }
}

/// Drives [`QoSState`] from the rolling latency window and an optional CPU
/// sampler. Owned exclusively by the receiver task, which is the sole writer
/// of QoS overrides.
pub struct QosController {
    state: QoSState,
    latency: RollingLatency,
    cpu: Option<Box<dyn CpuSampler>>,
    frame_budget_ms: f64,
    last_run: Option<Instant>,
    frames_since_tick: u64,
}

impl QosController {
    /// Creates a controller with the default QoS state, publishing `cam_res`
    /// once.
    #[must_use]
    pub fn new(cam_res: (u32, u32), frame_budget_ms: f64, cpu: Option<Box<dyn CpuSampler>>) -> Self {
        let proc_scale = PROC_SCALE_DEFAULT;
        Self {
            state: QoSState {
                proc_scale,
                fd_stride: FD_STRIDE_DEFAULT,
                pose_stride: POSE_STRIDE_DEFAULT,
                avg_ms: None,
                overload: false,
                hb_interval_s: 1.0 / HB_BASE_HZ,
                cam_res,
                proc_res: QoSState::proc_res(cam_res, proc_scale),
                cpu_pct: None,
                fps: 0.0,
            },
            latency: RollingLatency::new(),
            cpu,
            frame_budget_ms,
            last_run: None,
            frames_since_tick: 0,
        }
    }

    /// Current QoS snapshot.
    #[must_use]
    pub fn state(&self) -> QoSState {
        self.state
    }

    /// Records one frame's processing duration into the rolling window.
    pub fn record_frame(&mut self, duration_ms: f64) {
        self.latency.push(duration_ms);
        self.frames_since_tick += 1;
    }

    /// Runs the control loop if at least [`QOS_PERIOD_S`] has passed since
    /// the last run. No-op otherwise.
    pub fn maybe_tick(&mut self, now: Instant) {
        let elapsed = self
            .last_run
            .map(|last| now.checked_duration_since(last).unwrap_or_default());
        if elapsed.is_some_and(|e| e < Duration::from_secs_f64(QOS_PERIOD_S)) {
            return;
        }
        let elapsed_s = elapsed.map_or(QOS_PERIOD_S, |e| e.as_secs_f64());
        self.last_run = Some(now);
        self.state.fps = self.frames_since_tick as f64 / elapsed_s.max(EMA_MIN_DT_S);
        self.frames_since_tick = 0;
        self.tick();
    }

    fn tick(&mut self) {
        let avg_ms = self.latency.avg_ms();
        let cpu_pct = self.cpu.as_mut().and_then(|c| c.sample());
        let overload = avg_ms.is_some_and(|avg| avg > OVERLOAD_RATIO * self.frame_budget_ms);

        self.state.avg_ms = avg_ms;
        self.state.cpu_pct = cpu_pct;
        self.state.overload = overload;
        self.state.hb_interval_s = if overload { 1.0 / HB_LOW_HZ } else { 1.0 / HB_BASE_HZ };

        if overload || cpu_pct.is_some_and(|pct| pct >= CPU_OVERLOAD_PCT) {
            self.step_down();
        } else if avg_ms.is_some_and(|avg| avg < UNDERLOAD_RATIO * self.frame_budget_ms) {
            self.step_up();
        }
        self.state.proc_res = QoSState::proc_res(self.state.cam_res, self.state.proc_scale);
    }

    /// One step down in quality: `pose_stride++` → `fd_stride++` →
    /// `proc_scale -= step`, each respecting its bound. Only one step per
    /// tick.
    fn step_down(&mut self) {
        if self.state.pose_stride < POSE_STRIDE_MAX {
            self.state.pose_stride += 1;
        } else if self.state.fd_stride < FD_STRIDE_MAX {
            self.state.fd_stride += 1;
        } else if self.state.proc_scale > PROC_SCALE_MIN {
            self.state.proc_scale = (self.state.proc_scale - PROC_SCALE_DOWN_STEP).max(PROC_SCALE_MIN);
        }
    }

    /// One step up in quality: `proc_scale += step` → `fd_stride--` →
    /// `pose_stride--`. Only one step per tick.
    fn step_up(&mut self) {
        if self.state.proc_scale < PROC_SCALE_MAX {
            self.state.proc_scale = (self.state.proc_scale + PROC_SCALE_STEP).min(PROC_SCALE_MAX);
        } else if self.state.fd_stride > FD_STRIDE_MIN {
            self.state.fd_stride -= 1;
        } else if self.state.pose_stride > POSE_STRIDE_MIN {
            self.state.pose_stride -= 1;
        }
    }

    /// Applies an external override (from `set_qos`), clamping each field to
    /// its bound.
    pub fn apply_override(
        &mut self,
        proc_scale: Option<f64>,
        fd_stride: Option<u32>,
        pose_stride: Option<u32>,
    ) {
        if let Some(v) = proc_scale {
            self.state.proc_scale = v.clamp(PROC_SCALE_MIN, PROC_SCALE_MAX);
        }
        if let Some(v) = fd_stride {
            self.state.fd_stride = v.clamp(FD_STRIDE_MIN, FD_STRIDE_MAX);
        }
        if let Some(v) = pose_stride {
            self.state.pose_stride = v.clamp(POSE_STRIDE_MIN, POSE_STRIDE_MAX);
        }
        self.state.proc_res = QoSState::proc_res(self.state.cam_res, self.state.proc_scale);
    }

    /// Updates the frame budget that overload/underload are measured
    /// against, in response to a `set_qos{target_fps}` override.
    pub fn set_frame_budget_ms(&mut self, frame_budget_ms: f64) {
        self.frame_budget_ms = frame_budget_ms;
    }
}

/// Best-effort [`CpuSampler`] backed by `sysinfo`, the crate's equivalent of
/// the original implementation's optional `psutil.cpu_percent()` reading.
pub struct SysinfoCpuSampler {
    system: sysinfo::System,
}

impl SysinfoCpuSampler {
    /// Creates a sampler with one initial refresh; its first real reading
    /// only becomes meaningful after a second refresh, same as `psutil`.
    #[must_use]
    pub fn new() -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_cpu();
        Self { system }
    }
}

impl Default for SysinfoCpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuSampler for SysinfoCpuSampler {
    fn sample(&mut self) -> Option<f64> {
        self.system.refresh_cpu();
        let cpus = self.system.cpus();
        if cpus.is_empty() {
            return None;
        }
        let avg = cpus.iter().map(|cpu| f64::from(cpu.cpu_usage())).sum::<f64>() / cpus.len() as f64;
        Some(avg)
    }
}

/// Whether, given two independent frame counters, a detector "runs" on frame
/// `n` per its stride.
#[must_use]
pub fn should_run(frame_index: u64, stride: u32) -> bool {
    frame_index % u64::from(stride.max(1)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use mock_instant::MockClock;

    fn advance(ms: u64) {
        MockClock::advance(Duration::from_millis(ms));
    }

    #[test]
    fn s5_qos_steps_down_in_order() {
        let mut qos = QosController::new((1280, 720), 50.0, None);
        for _ in 0..60 {
            qos.record_frame(80.0);
        }
        qos.maybe_tick(Instant::now());
        assert_eq!(qos.state().pose_stride, 3);
        assert_eq!(qos.state().fd_stride, 2);
        assert!((qos.state().proc_scale - 0.75).abs() < 1e-9);

        advance(1100);
        qos.maybe_tick(Instant::now());
        assert_eq!(qos.state().pose_stride, 3);
        assert_eq!(qos.state().fd_stride, 3);

        advance(1100);
        qos.maybe_tick(Instant::now());
        assert!((qos.state().proc_scale - 0.70).abs() < 1e-9);
    }

    #[test]
    fn bounds_never_exceeded() {
        let mut qos = QosController::new((1280, 720), 50.0, None);
        for round in 0..20 {
            for _ in 0..30 {
                qos.record_frame(if round % 2 == 0 { 1000.0 } else { 1.0 });
            }
            advance(1100);
            qos.maybe_tick(Instant::now());
            let s = qos.state();
            assert!((PROC_SCALE_MIN..=PROC_SCALE_MAX).contains(&s.proc_scale));
            assert!((FD_STRIDE_MIN..=FD_STRIDE_MAX).contains(&s.fd_stride));
            assert!((POSE_STRIDE_MIN..=POSE_STRIDE_MAX).contains(&s.pose_stride));
        }
    }

    #[test]
    fn override_is_clamped() {
        let mut qos = QosController::new((1280, 720), 50.0, None);
        qos.apply_override(Some(10.0), Some(100), Some(0));
        let s = qos.state();
        assert!((s.proc_scale - PROC_SCALE_MAX).abs() < 1e-9);
        assert_eq!(s.fd_stride, FD_STRIDE_MAX);
        assert_eq!(s.pose_stride, POSE_STRIDE_MIN);
    }

    #[test]
    fn stride_zero_never_panics() {
        assert!(should_run(5, 1));
        assert!(should_run(0, 3));
        assert!(!should_run(1, 3));
    }
}
