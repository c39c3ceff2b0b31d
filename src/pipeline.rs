//! Pipeline thread: the single dedicated worker that owns capture, feature
//! extraction, fusion, and the state machine. It is the sole writer of
//! [`crate::store::SharedStateStore`] and never blocks the server; the only
//! suspension point on this thread is the camera read.

use crate::{
    detectors::{best_detection, FaceDetector, PoseDetector},
    features::{frame_quality, FeatureExtractor, FrameQuality},
    fusion::FusionEngine,
    health::HealthMonitor,
    qos::should_run,
    shared::PipelineControl,
    state_machine::PostureState,
    store::SharedStateStore,
};
use dws_camera::CameraCapture;
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

/// Opens a camera by index. Boxed so the pipeline thread can reopen a
/// different index on a `switch_camera` request without depending on
/// `dws_camera::OpenCvCapture` directly.
pub type CameraOpener = Box<dyn Fn(i32) -> eyre::Result<Box<dyn CameraCapture>> + Send>;

/// Spawns the pipeline thread and returns its join handle.
pub fn spawn(
    camera_index: i32,
    open_camera: CameraOpener,
    face_detector: Box<dyn FaceDetector>,
    pose_detector: Box<dyn PoseDetector>,
    store: Arc<SharedStateStore>,
    control: Arc<PipelineControl>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("dws-sensor-pipeline".to_owned())
        .spawn(move || run(camera_index, &open_camera, face_detector, pose_detector, &store, &control))
        .expect("failed to spawn pipeline thread")
}

fn run(
    mut camera_index: i32,
    open_camera: &CameraOpener,
    mut face_detector: Box<dyn FaceDetector>,
    mut pose_detector: Box<dyn PoseDetector>,
    store: &SharedStateStore,
    control: &PipelineControl,
) {
    let mut camera = match open_camera(camera_index) {
        Ok(camera) => camera,
        Err(err) => {
            tracing::error!("failed to open initial camera {camera_index}: {err:?}");
            return;
        }
    };
    control.set_current_camera(camera_index);

    let mut extractor = FeatureExtractor::new();
    let mut fusion = FusionEngine::new();
    let mut health = HealthMonitor::new();
    let mut frame_index: u64 = 0;
    let mut camera_error = false;
    let mut last_tick: Option<Instant> = None;

    loop {
        if let Some(requested) = control.take_camera_switch() {
            match open_camera(requested) {
                Ok(new_camera) => {
                    camera = new_camera;
                    camera_index = requested;
                    control.set_current_camera(requested);
                    camera_error = false;
                    tracing::info!("switched to camera {requested}");
                }
                Err(err) => {
                    tracing::warn!("failed to open camera {requested}: {err:?}");
                    camera_error = true;
                }
            }
        }

        let tick_start = Instant::now();
        let frame = match camera.read() {
            Ok(frame) => {
                camera_error = false;
                frame
            }
            Err(err) => {
                tracing::warn!(camera_index, "camera read failed: {err:?}");
                camera_error = true;
                thread::sleep(Duration::from_millis(50));
                continue;
            }
        };

        let (proc_scale, fd_stride, pose_stride) = {
            let qos = control.qos.lock().expect("qos lock poisoned");
            let s = qos.state();
            (s.proc_scale, s.fd_stride, s.pose_stride)
        };

        let face_ran = should_run(frame_index, fd_stride);
        let pose_ran = should_run(frame_index, pose_stride);

        let face = face_ran
            .then(|| match face_detector.detect(&frame) {
                Ok(detections) => best_detection(&detections),
                Err(err) => {
                    tracing::debug!("face detector error: {err:?}");
                    None
                }
            })
            .flatten();
        let pose = pose_ran
            .then(|| match pose_detector.detect(&frame) {
                Ok(sample) => sample,
                Err(err) => {
                    tracing::debug!("pose detector error: {err:?}");
                    None
                }
            })
            .flatten();

        let features = extractor.extract(tick_start, face_ran, face, pose_ran, pose);
        let quality = frame_quality(&frame, proc_scale).unwrap_or_else(|err| {
            tracing::warn!("frame quality computation failed: {err:?}");
            FrameQuality { brightness: 0.0, blur_var: 0.0 }
        });

        let profile = control.profile();
        let dt = last_tick.map_or(Duration::from_millis(33), |prev| {
            tick_start.checked_duration_since(prev).unwrap_or_default()
        });
        last_tick = Some(tick_start);

        let (fused, confidence) = fusion.tick(&features, quality, &profile, dt);
        let (eye_near, eye_far) = profile.eye_anchors();
        let health_report =
            health.compute(&features, quality, camera_error, face_ran, pose_ran, eye_near, eye_far);

        let state: PostureState = {
            let mut state_machine = control.state_machine.lock().expect("state machine lock poisoned");
            state_machine.tick(fused.ema, confidence, health_report.status, tick_start);
            state_machine.state()
        };

        store.set_features(features);
        store.set_fused(fused);
        store.set_health(health_report);
        store.set_state(state);
        store.set_latest(features.metric_nose_z, confidence);

        let duration_ms = tick_start.elapsed().as_secs_f64() * 1000.0;
        {
            let mut qos = control.qos.lock().expect("qos lock poisoned");
            qos.record_frame(duration_ms);
            qos.maybe_tick(Instant::now());
            store.set_qos(qos.state());
        }

        frame_index = frame_index.wrapping_add(1);
    }
}
