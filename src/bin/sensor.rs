//! Process entry point: parses the CLI, opens the initial camera, wires up
//! the pipeline thread and the WebSocket server, and runs until killed.

use clap::Parser;
use dws_camera::{CameraCapture, OpenCvCapture};
use dws_sensor::{
    async_main,
    calibration::CalibrationProfile,
    cli::Cli,
    config::Config,
    detectors::{NullFaceDetector, NullPoseDetector},
    logger, pipeline,
    qos::{QosController, SysinfoCpuSampler},
    server,
    shared::PipelineControl,
    state_machine::PostureStateMachine,
    store::SharedStateStore,
};
use eyre::{Result, WrapErr};
use std::sync::Arc;

fn main() -> Result<()> {
    async_main(run(Cli::parse()))
}

async fn run(cli: Cli) -> Result<()> {
    logger::init();
    let config = Config::from(&cli);

    let index = config.camera_index;
    let cam_res = tokio::task::spawn_blocking(move || OpenCvCapture::open(index).map(|cap| cap.resolution()))
        .await
        .wrap_err("camera probe task panicked")?
        .wrap_err_with(|| format!("failed to open camera {index}"))?;

    let profile = CalibrationProfile::load_default()
        .await
        .wrap_err("failed to load persisted calibration profile")?
        .unwrap_or_else(CalibrationProfile::uncalibrated);

    let qos = QosController::new(cam_res, config.frame_budget_ms, Some(Box::new(SysinfoCpuSampler::new())));
    let state_machine = PostureStateMachine::new(std::time::Instant::now());
    let control = Arc::new(PipelineControl::new(profile, qos, state_machine, config.camera_index));
    let store = Arc::new(SharedStateStore::new());

    let open_camera: pipeline::CameraOpener =
        Box::new(|index| OpenCvCapture::open(index).map(|cap| Box::new(cap) as Box<dyn CameraCapture>));

    let _pipeline = pipeline::spawn(
        config.camera_index,
        open_camera,
        Box::new(NullFaceDetector),
        Box::new(NullPoseDetector),
        Arc::clone(&store),
        Arc::clone(&control),
    );

    server::run(config.port, store, control).await
}
