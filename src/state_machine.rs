//! Posture state machine: a four-state, hysteretic, dwell-gated,
//! confidence-gated FSM driven by the fused EMA, overall confidence, and
//! health status.

use crate::{
    consts::{CONF_MIN_DEFAULT, DWELL_FOCUS_MS, DWELL_REVIEW_MS, MIN_FLIP_GAP_MS, STATE_HIGH, STATE_LOW},
    health::HealthStatus,
};
use serde::Serialize;
use std::time::Duration;

#[cfg(test)]
use mock_instant::Instant;
#[cfg(not(test))]
use std::time::Instant;

/// The four posture states. Only `Focus` and `Review` are stable terminal
/// states; the two `TransitionTo*` states are intermediate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostureState {
    /// Leaned-in; a stable terminal state.
    Focus,
    /// Leaned-back; a stable terminal state.
    Review,
    /// Intermediate: dwelling before committing to `Focus`.
    TransitionToFocus,
    /// Intermediate: dwelling before committing to `Review`.
    TransitionToReview,
}

/// In-progress transition, exposed to the heartbeat as `{target, elapsed_ms,
/// required_ms}`.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct TransitionProgress {
    /// The stable state this transition is dwelling towards.
    pub target: PostureState,
    /// Milliseconds elapsed since the transition started.
    pub elapsed_ms: u64,
    /// Milliseconds of dwell required before it can commit.
    pub required_ms: u64,
}

/// Drives the FSM. Owned exclusively by the pipeline thread.
pub struct PostureStateMachine {
    state: PostureState,
    transition_target: Option<PostureState>,
    transition_start_ts: Option<Instant>,
    last_stable_change_ts: Instant,
    /// Runtime-overridable confidence floor; see `set_conf_min`.
    conf_min: f64,
}

impl PostureStateMachine {
    /// Creates a machine in the initial `Focus` state.
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            state: PostureState::Focus,
            transition_target: None,
            transition_start_ts: None,
            last_stable_change_ts: now,
            conf_min: CONF_MIN_DEFAULT,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PostureState {
        self.state
    }

    /// Updates the runtime-overridable confidence floor, clamped to `[0, 1]`.
    pub fn set_conf_min(&mut self, value: f64) -> f64 {
        self.conf_min = value.clamp(0.0, 1.0);
        self.conf_min
    }

    /// The current confidence floor.
    #[must_use]
    pub fn conf_min(&self) -> f64 {
        self.conf_min
    }

    /// Progress of an in-flight transition, or `None` if in a stable state.
    #[must_use]
    pub fn transition_progress(&self, now: Instant) -> Option<TransitionProgress> {
        let target = self.transition_target?;
        let started_at = self.transition_start_ts?;
        let required_ms = match target {
            PostureState::Focus => DWELL_FOCUS_MS,
            PostureState::Review => DWELL_REVIEW_MS,
            _ => return None,
        };
        let elapsed_ms = now.checked_duration_since(started_at).unwrap_or_default().as_millis() as u64;
        Some(TransitionProgress { target, elapsed_ms, required_ms })
    }

    /// Evaluates one tick. `m` is the fused EMA (`None` if not yet seeded).
    pub fn tick(&mut self, m: Option<f64>, overall_conf: f64, health: HealthStatus, now: Instant) {
        if m.is_none() || health == HealthStatus::Paused {
            return;
        }
        let m = m.expect("checked above");
        let confident = overall_conf >= self.conf_min;
        let since_flip = now.checked_duration_since(self.last_stable_change_ts).unwrap_or_default();
        let min_flip_gap = Duration::from_millis(MIN_FLIP_GAP_MS);
        let dwell_review = Duration::from_millis(DWELL_REVIEW_MS);
        let dwell_focus = Duration::from_millis(DWELL_FOCUS_MS);

        match self.state {
            PostureState::Focus => {
                if m <= STATE_LOW && since_flip >= min_flip_gap && confident {
                    if self.transition_target != Some(PostureState::Review) {
                        self.start_transition(PostureState::TransitionToReview, PostureState::Review, now);
                    } else if self.dwell_elapsed(now, dwell_review) && confident {
                        self.commit(PostureState::Review, now);
                    }
                } else if self.transition_target == Some(PostureState::Review)
                    && (m > STATE_LOW || !confident)
                {
                    self.abort(PostureState::Focus);
                }
            }
            PostureState::Review => {
                if m >= STATE_HIGH && since_flip >= min_flip_gap && confident {
                    if self.transition_target != Some(PostureState::Focus) {
                        self.start_transition(PostureState::TransitionToFocus, PostureState::Focus, now);
                    } else if self.dwell_elapsed(now, dwell_focus) && confident {
                        self.commit(PostureState::Focus, now);
                    }
                } else if self.transition_target == Some(PostureState::Focus)
                    && (m < STATE_HIGH || !confident)
                {
                    self.abort(PostureState::Review);
                }
            }
            PostureState::TransitionToReview => {
                if m > STATE_LOW || overall_conf < self.conf_min {
                    self.abort(PostureState::Focus);
                } else if self.dwell_elapsed(now, dwell_review) {
                    self.commit(PostureState::Review, now);
                }
            }
            PostureState::TransitionToFocus => {
                if m < STATE_HIGH || overall_conf < self.conf_min {
                    self.abort(PostureState::Review);
                } else if self.dwell_elapsed(now, dwell_focus) {
                    self.commit(PostureState::Focus, now);
                }
            }
        }
    }

    fn start_transition(&mut self, intermediate: PostureState, target: PostureState, now: Instant) {
        self.state = intermediate;
        self.transition_start_ts = Some(now);
        self.transition_target = Some(target);
    }

    fn dwell_elapsed(&self, now: Instant, dwell: Duration) -> bool {
        self.transition_start_ts.is_some_and(|start| now.checked_duration_since(start).unwrap_or_default() >= dwell)
    }

    /// Commits to a stable state; refreshes `last_stable_change_ts`.
    fn commit(&mut self, target: PostureState, now: Instant) {
        self.state = target;
        self.transition_target = None;
        self.transition_start_ts = None;
        self.last_stable_change_ts = now;
    }

    /// Aborts an in-flight transition back to `fallback`. Does not refresh
    /// `last_stable_change_ts`, so `min_flip_gap` is unaffected.
    fn abort(&mut self, fallback: PostureState) {
        self.state = fallback;
        self.transition_target = None;
        self.transition_start_ts = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mock_instant::MockClock;

    fn advance(ms: u64) {
        MockClock::advance(Duration::from_millis(ms));
    }

    #[test]
    fn s1_focus_entry_from_review() {
        let mut sm = PostureStateMachine::new(Instant::now());
        // Force into REVIEW first via an existing commit for the test setup.
        sm.state = PostureState::Review;
        sm.last_stable_change_ts = Instant::now();
        advance(2000);
        sm.tick(Some(0.7), 0.9, HealthStatus::Ok, Instant::now());
        assert_eq!(sm.state(), PostureState::TransitionToFocus);
        advance(749);
        sm.tick(Some(0.7), 0.9, HealthStatus::Ok, Instant::now());
        assert_eq!(sm.state(), PostureState::TransitionToFocus);
        advance(2);
        sm.tick(Some(0.7), 0.9, HealthStatus::Ok, Instant::now());
        assert_eq!(sm.state(), PostureState::Focus);
    }

    #[test]
    fn s2_aborted_transition_never_commits() {
        let mut sm = PostureStateMachine::new(Instant::now());
        advance(2000);
        sm.tick(Some(0.35), 0.9, HealthStatus::Ok, Instant::now());
        assert_eq!(sm.state(), PostureState::TransitionToReview);
        advance(600);
        sm.tick(Some(0.55), 0.9, HealthStatus::Ok, Instant::now());
        assert_eq!(sm.state(), PostureState::Focus);
        advance(10_000);
        sm.tick(Some(0.55), 0.9, HealthStatus::Ok, Instant::now());
        assert_eq!(sm.state(), PostureState::Focus);
    }

    #[test]
    fn s3_confidence_gate_blocks_transition() {
        let mut sm = PostureStateMachine::new(Instant::now());
        advance(2000);
        for _ in 0..40 {
            sm.tick(Some(0.3), 0.4, HealthStatus::Ok, Instant::now());
            advance(50);
        }
        assert_eq!(sm.state(), PostureState::Focus);
    }

    #[test]
    fn s4_min_flip_gap_blocks_second_flip() {
        let mut sm = PostureStateMachine::new(Instant::now());
        advance(2000);
        sm.tick(Some(0.3), 0.9, HealthStatus::Ok, Instant::now());
        advance(750);
        sm.tick(Some(0.3), 0.9, HealthStatus::Ok, Instant::now());
        assert_eq!(sm.state(), PostureState::Review);

        // Second flip requested only 800ms after the first commit: blocked by
        // min_flip_gap (1500ms).
        advance(800);
        sm.tick(Some(0.7), 0.9, HealthStatus::Ok, Instant::now());
        assert_eq!(sm.state(), PostureState::Review);
    }

    #[test]
    fn paused_health_retains_state() {
        let mut sm = PostureStateMachine::new(Instant::now());
        advance(2000);
        sm.tick(Some(0.1), 0.9, HealthStatus::Paused, Instant::now());
        assert_eq!(sm.state(), PostureState::Focus);
    }

    #[test]
    fn short_excursion_never_commits() {
        let mut sm = PostureStateMachine::new(Instant::now());
        advance(2000);
        sm.tick(Some(0.3), 0.9, HealthStatus::Ok, Instant::now());
        assert_eq!(sm.state(), PostureState::TransitionToReview);
        advance(400); // < min(dwell_review, dwell_focus)
        sm.tick(Some(0.7), 0.9, HealthStatus::Ok, Instant::now());
        assert_eq!(sm.state(), PostureState::Focus);
    }
}
