//! Cross-thread control surfaces that the pipeline thread and the server's
//! receiver tasks both touch: the active calibration profile, the QoS
//! controller, the state machine's confidence floor, and a pending
//! camera-switch request.
//!
//! These are distinct from [`crate::store::SharedStateStore`], which only
//! ever flows pipeline → server. Here the direction is mixed, so each cell
//! is a short-lived `Mutex`/`RwLock` critical section, never held across an
//! await point or I/O.

use crate::{calibration::CalibrationProfile, qos::QosController, state_machine::PostureStateMachine};
use std::sync::{Mutex, RwLock};

/// Everything the server's command handlers need to reach into the running
/// pipeline.
pub struct PipelineControl {
    /// Active profile; swapped wholesale by `calibrate_finalize`.
    pub profile: RwLock<CalibrationProfile>,
    /// Shared QoS controller: the pipeline thread ticks it every frame, the
    /// receiver applies `set_qos` overrides to it.
    pub qos: Mutex<QosController>,
    /// Shared state machine: the pipeline thread ticks it every frame, the
    /// receiver applies `set_conf_min` to it.
    pub state_machine: Mutex<PostureStateMachine>,
    /// Index the pipeline should switch to at the next frame boundary.
    pub pending_camera_switch: Mutex<Option<i32>>,
    /// Camera index currently open, published by the pipeline.
    pub current_camera: Mutex<i32>,
}

impl PipelineControl {
    /// Creates a control block wrapping the given profile, QoS controller,
    /// and state machine.
    #[must_use]
    pub fn new(
        profile: CalibrationProfile,
        qos: QosController,
        state_machine: PostureStateMachine,
        initial_camera: i32,
    ) -> Self {
        Self {
            profile: RwLock::new(profile),
            qos: Mutex::new(qos),
            state_machine: Mutex::new(state_machine),
            pending_camera_switch: Mutex::new(None),
            current_camera: Mutex::new(initial_camera),
        }
    }

    /// Copies out the active calibration profile.
    #[must_use]
    pub fn profile(&self) -> CalibrationProfile {
        self.profile.read().expect("profile lock poisoned").clone()
    }

    /// Replaces the active calibration profile.
    pub fn set_profile(&self, profile: CalibrationProfile) {
        *self.profile.write().expect("profile lock poisoned") = profile;
    }

    /// Requests a camera switch; the pipeline picks this up at the next
    /// frame boundary and clears it.
    pub fn request_camera_switch(&self, index: i32) {
        *self.pending_camera_switch.lock().expect("camera switch lock poisoned") = Some(index);
    }

    /// Takes and clears the pending camera switch, if any.
    pub fn take_camera_switch(&self) -> Option<i32> {
        self.pending_camera_switch.lock().expect("camera switch lock poisoned").take()
    }

    /// Current camera index, as last published by the pipeline.
    #[must_use]
    pub fn current_camera(&self) -> i32 {
        *self.current_camera.lock().expect("camera index lock poisoned")
    }

    /// Publishes the camera index now in use.
    pub fn set_current_camera(&self, index: i32) {
        *self.current_camera.lock().expect("camera index lock poisoned") = index;
    }
}
