//! Process-lifetime configuration derived from the CLI.

use crate::{cli::Cli, consts};

/// Settings that stay fixed for the life of the process. Everything that can
/// change at runtime (conf_min override, QoS overrides) lives on the state
/// machine and QoS controller instead, not here.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Port the WebSocket server binds on.
    pub port: u16,
    /// Index of the camera opened at startup.
    pub camera_index: i32,
    /// Target processing rate, already clamped to [10, 30].
    pub target_fps: f64,
    /// Frame budget in milliseconds, derived from `target_fps`.
    pub frame_budget_ms: f64,
}

impl From<&Cli> for Config {
    fn from(cli: &Cli) -> Self {
        let target_fps = cli.clamped_fps();
        Self {
            port: cli.port,
            camera_index: cli.camera,
            target_fps,
            frame_budget_ms: consts::MS_PER_SEC / target_fps,
        }
    }
}
