//! Shared state store: concurrency-safe snapshots published by the pipeline
//! thread and read by the server.
//!
//! Four independently locked snapshot cells plus current state and a latest
//! `(metric, confidence)` pair. Reads copy out; writes replace entire
//! fields. No cross-cell invariants are required to hold simultaneously —
//! consumers treat heartbeats as loosely coupled snapshots. Locks are never
//! nested across entities and never held during I/O.

use crate::{
    features::FeatureVector, fusion::FusedSample, health::HealthReport, qos::QoSState,
    state_machine::PostureState,
};
use std::sync::RwLock;

/// The pipeline thread is the sole writer of every cell except `qos`, which
/// the receiver task (via [`crate::qos::QosController`]) also writes to
/// apply overrides.
#[derive(Default)]
pub struct SharedStateStore {
    features: RwLock<FeatureVector>,
    fused: RwLock<FusedSample>,
    health: RwLock<Option<HealthReport>>,
    qos: RwLock<Option<QoSState>>,
    state: RwLock<Option<PostureState>>,
    latest: RwLock<Option<(Option<f64>, f64)>>,
}

impl SharedStateStore {
    /// Creates an empty store; health/qos/state are `None` until the
    /// pipeline publishes its first snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the feature snapshot.
    pub fn set_features(&self, value: FeatureVector) {
        *self.features.write().expect("store lock poisoned") = value;
    }

    /// Copies out the feature snapshot.
    #[must_use]
    pub fn features(&self) -> FeatureVector {
        *self.features.read().expect("store lock poisoned")
    }

    /// Replaces the fused-sample snapshot.
    pub fn set_fused(&self, value: FusedSample) {
        *self.fused.write().expect("store lock poisoned") = value;
    }

    /// Copies out the fused-sample snapshot.
    #[must_use]
    pub fn fused(&self) -> FusedSample {
        *self.fused.read().expect("store lock poisoned")
    }

    /// Replaces the health snapshot.
    pub fn set_health(&self, value: HealthReport) {
        *self.health.write().expect("store lock poisoned") = Some(value);
    }

    /// Copies out the health snapshot.
    #[must_use]
    pub fn health(&self) -> Option<HealthReport> {
        *self.health.read().expect("store lock poisoned")
    }

    /// Replaces the QoS snapshot.
    pub fn set_qos(&self, value: QoSState) {
        *self.qos.write().expect("store lock poisoned") = Some(value);
    }

    /// Copies out the QoS snapshot.
    #[must_use]
    pub fn qos(&self) -> Option<QoSState> {
        *self.qos.read().expect("store lock poisoned")
    }

    /// Replaces the current posture state.
    pub fn set_state(&self, value: PostureState) {
        *self.state.write().expect("store lock poisoned") = Some(value);
    }

    /// Copies out the current posture state.
    #[must_use]
    pub fn state(&self) -> Option<PostureState> {
        *self.state.read().expect("store lock poisoned")
    }

    /// Replaces the `(metric, confidence)` pair consumed by calibration
    /// sampling. `None` until the pipeline has produced its first sample.
    pub fn set_latest(&self, metric: Option<f64>, confidence: f64) {
        *self.latest.write().expect("store lock poisoned") = Some((metric, confidence));
    }

    /// Copies out the `(metric, confidence)` pair, or `(None, None)` before
    /// the pipeline has published anything.
    #[must_use]
    pub fn latest(&self) -> (Option<f64>, Option<f64>) {
        match *self.latest.read().expect("store lock poisoned") {
            Some((metric, confidence)) => (metric, Some(confidence)),
            None => (None, None),
        }
    }
}
