//! Wire message shapes exchanged with WebSocket clients.

use crate::{
    calibration::{CalibrationProfile, Phase, PhaseSummary},
    features::FeatureVector,
    fusion::FusedSample,
    health::HealthReport,
    qos::QoSState,
    state_machine::{PostureState, TransitionProgress},
};
use serde::{Deserialize, Serialize};

/// Schema version stamped on `state` messages; bumped whenever the wire
/// shape changes in a way clients need to branch on.
pub const WIRE_VERSION: u32 = 6;

/// Server-to-client messages.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Sent whenever the posture state changes.
    #[serde(rename = "state")]
    State {
        v: u32,
        state: PostureState,
        policy: &'static str,
    },
    /// Sent every `hb_interval_s`.
    #[serde(rename = "hb")]
    Heartbeat {
        fps: f64,
        metric_nose_z_x100: Option<f64>,
        confidence: Option<f64>,
        features: FeatureVector,
        fused: FusedSample,
        health: Option<HealthReport>,
        perf: Option<QoSState>,
        transition: Option<TransitionProgress>,
    },
    /// Reply to `cameras`.
    #[serde(rename = "cameras")]
    Cameras { list: Vec<i32>, current: i32 },
    /// Reply to any command.
    #[serde(rename = "ack")]
    Ack {
        what: &'static str,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        qos: Option<QoSState>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Sent while a calibration phase is sampling or has errored.
    #[serde(rename = "calib_status")]
    CalibStatus {
        phase: Phase,
        status: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Sent once a calibration phase's sampling window has elapsed.
    #[serde(rename = "calib_result_phase")]
    CalibResultPhase {
        #[serde(flatten)]
        summary: PhaseSummary,
    },
    /// Sent once `calibrate_finalize` succeeds and the profile is persisted.
    #[serde(rename = "calib_done")]
    CalibDone { saved: CalibrationProfile },
}

/// Client-to-server commands.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    /// Probe the default camera index range and report which ones opened.
    Cameras,
    /// Request a camera switch at the next frame boundary.
    SwitchCamera { index: i32 },
    /// Start (or restart) sampling one calibration phase.
    CalibratePhase {
        phase: Phase,
        #[serde(default)]
        duration_s: Option<f64>,
    },
    /// Derive and persist a profile from both sampled phases.
    CalibrateFinalize,
    /// Override the state machine's confidence floor.
    SetConfMin { value: f64 },
    /// Override one or more QoS knobs.
    SetQos {
        #[serde(default)]
        proc_scale: Option<f64>,
        #[serde(default)]
        fd_stride: Option<u32>,
        #[serde(default)]
        pose_stride: Option<u32>,
        #[serde(default)]
        target_fps: Option<f64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_command_is_ignored_not_rejected() {
        let parsed: Result<Command, _> = serde_json::from_str(r#"{"cmd":"frobnicate"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn switch_camera_parses_index() {
        let cmd: Command = serde_json::from_str(r#"{"cmd":"switch_camera","index":2}"#).unwrap();
        matches!(cmd, Command::SwitchCamera { index: 2 });
    }

    #[test]
    fn state_message_serializes_tagged() {
        let msg = ServerMessage::State { v: WIRE_VERSION, state: PostureState::Focus, policy: "fused_hysteresis_confidence" };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"state\""));
        assert!(json.contains("\"state\":\"FOCUS\""));
    }
}
