//! Command line interface.

use clap::StructOpt;

/// Realtime presence/attention sensor: derives a posture state from a webcam
/// feed and streams it to local clients over a WebSocket.
#[derive(StructOpt, Debug)]
#[clap(about, version = env!("GIT_VERSION"))]
pub struct Cli {
    /// Port to bind the WebSocket server on.
    #[structopt(long, default_value = "8765")]
    pub port: u16,
    /// Index of the camera to open at startup.
    #[structopt(long, default_value = "0")]
    pub camera: i32,
    /// Target processing rate in frames per second, clamped to [10, 30].
    #[structopt(long, default_value = "20")]
    pub fps: f64,
}

impl Cli {
    /// Clamps `fps` into the supported range. Called once at startup; kept
    /// separate from parsing so the clamp is visible in one place.
    #[must_use]
    pub fn clamped_fps(&self) -> f64 {
        self.fps.clamp(crate::consts::TARGET_FPS_MIN, crate::consts::TARGET_FPS_MAX)
    }
}
