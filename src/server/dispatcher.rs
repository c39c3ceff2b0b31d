//! Per-connection sender and receiver tasks.
//!
//! Both tasks share one outgoing channel: the sender loop pushes state
//! changes and heartbeats into it on its own cadence, and the receiver loop
//! pushes command replies into it as they're produced. A single writer task
//! drains the channel onto the socket, so message order on the wire matches
//! send order into the channel.

use super::protocol::{Command, ServerMessage, WIRE_VERSION};
use crate::{
    calibration::{CalibrationError, CalibrationService, Phase},
    consts::{CALIBRATION_TICK_MS, CAMERA_PROBE_RANGE, SENDER_IDLE_POLL_MS, WS_PING_INTERVAL_S},
    paths,
    shared::PipelineControl,
    store::SharedStateStore,
};
use futures::{SinkExt, StreamExt};
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::WebSocketStream;
use tungstenite::Message;

type OutTx = mpsc::UnboundedSender<Message>;

/// Milliseconds since this connection's liveness clock started, updated by
/// the receiver loop on every inbound frame (data or pong) and read by the
/// sender loop's ping/timeout check.
struct Liveness {
    started: tokio::time::Instant,
    last_seen_ms: AtomicI64,
}

impl Liveness {
    fn new() -> Self {
        Self { started: tokio::time::Instant::now(), last_seen_ms: AtomicI64::new(0) }
    }

    fn touch(&self) {
        self.last_seen_ms.store(self.started.elapsed().as_millis() as i64, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = self.last_seen_ms.load(Ordering::Relaxed);
        self.started.elapsed().saturating_sub(Duration::from_millis(last.max(0) as u64))
    }
}

/// One client connection: runs its sender and receiver concurrently, and
/// returns once either side terminates, per the "connection closes when
/// either task terminates" cancellation rule. Ping interval and timeout are
/// both [`WS_PING_INTERVAL_S`].
pub async fn serve_connection(
    stream: WebSocketStream<TcpStream>,
    store: Arc<SharedStateStore>,
    control: Arc<PipelineControl>,
) {
    let (mut sink, mut stream_in) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let liveness = Arc::new(Liveness::new());

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let sender_tx = tx.clone();
    let sender_store = Arc::clone(&store);
    let sender_control = Arc::clone(&control);
    let sender_liveness = Arc::clone(&liveness);
    let sender = tokio::spawn(async move {
        sender_loop(&sender_store, &sender_control, &sender_tx, &sender_liveness).await
    });

    let receiver =
        tokio::spawn(async move { receiver_loop(&mut stream_in, &store, &control, &tx, &liveness).await });

    tokio::select! {
        _ = sender => {}
        _ = receiver => {}
        _ = writer => {}
    }
}

fn send(tx: &OutTx, msg: &ServerMessage) {
    if let Ok(json) = serde_json::to_string(msg) {
        let _ = tx.send(Message::Text(json));
    }
}

/// Emits a `state` message on every change, a `hb` heartbeat every
/// `hb_interval_s`, and a ping every [`WS_PING_INTERVAL_S`]; closes the
/// connection if nothing has been heard from the peer for that same
/// timeout. Idle-polls at [`SENDER_IDLE_POLL_MS`]; state is always checked
/// before heartbeat so a change is never reported stale by one tick.
async fn sender_loop(store: &SharedStateStore, control: &PipelineControl, tx: &OutTx, liveness: &Liveness) {
    let mut last_sent_state = None;
    let mut last_hb = tokio::time::Instant::now() - Duration::from_secs(3600);
    let mut last_ping = tokio::time::Instant::now();
    let ping_interval = Duration::from_secs(WS_PING_INTERVAL_S);

    loop {
        if liveness.idle_for() > ping_interval * 2 {
            return;
        }

        if let Some(state) = store.state() {
            if Some(state) != last_sent_state {
                send(tx, &ServerMessage::State { v: WIRE_VERSION, state, policy: "fused_hysteresis_confidence" });
                last_sent_state = Some(state);
            }
        }

        let hb_interval_s = store.qos().map_or(0.25, |q| q.hb_interval_s);
        if last_hb.elapsed() >= Duration::from_secs_f64(hb_interval_s) {
            last_hb = tokio::time::Instant::now();
            let (metric, confidence) = store.latest();
            let transition = control
                .state_machine
                .lock()
                .expect("state machine lock poisoned")
                .transition_progress(Instant::now());
            send(
                tx,
                &ServerMessage::Heartbeat {
                    fps: store.qos().map_or(0.0, |q| q.fps),
                    metric_nose_z_x100: metric,
                    confidence,
                    features: store.features(),
                    fused: store.fused(),
                    health: store.health(),
                    perf: store.qos(),
                    transition,
                },
            );
        }

        if last_ping.elapsed() >= ping_interval {
            last_ping = tokio::time::Instant::now();
            if tx.send(Message::Ping(Vec::new())).is_err() {
                return;
            }
        }

        tokio::time::sleep(Duration::from_millis(SENDER_IDLE_POLL_MS)).await;
    }
}

/// Parses JSON command frames and dispatches them. Parse errors and unknown
/// commands are silently dropped; the connection stays open. Any inbound
/// frame, including a pong, counts as liveness.
async fn receiver_loop(
    stream: &mut (impl futures::Stream<Item = Result<Message, tungstenite::Error>> + Unpin),
    store: &SharedStateStore,
    control: &PipelineControl,
    tx: &OutTx,
    liveness: &Liveness,
) {
    let mut calibration = CalibrationService::new();

    while let Some(frame) = stream.next().await {
        let Ok(frame) = frame else { return };
        liveness.touch();
        let Message::Text(text) = frame else { continue };
        let Ok(command) = serde_json::from_str::<Command>(&text) else { continue };
        handle_command(command, store, control, &mut calibration, tx).await;
    }
}

async fn handle_command(
    command: Command,
    store: &SharedStateStore,
    control: &PipelineControl,
    calibration: &mut CalibrationService,
    tx: &OutTx,
) {
    match command {
        Command::Cameras => {
            let indices =
                tokio::task::spawn_blocking(|| dws_camera::probe_cameras(CAMERA_PROBE_RANGE)).await.unwrap_or_default();
            send(tx, &ServerMessage::Cameras { list: indices, current: control.current_camera() });
        }
        Command::SwitchCamera { index } => {
            let ok = tokio::task::spawn_blocking(move || dws_camera::can_open(index)).await.unwrap_or(false);
            if ok {
                control.request_camera_switch(index);
            }
            send(
                tx,
                &ServerMessage::Ack {
                    what: "switch_camera",
                    ok,
                    index: Some(index),
                    value: None,
                    qos: None,
                    reason: (!ok).then(|| "open_failed".to_owned()),
                },
            );
        }
        Command::CalibratePhase { phase, duration_s } => {
            send(tx, &ServerMessage::CalibStatus { phase, status: "sampling", reason: None });
            let duration =
                duration_s.map(Duration::from_secs_f64).unwrap_or_else(CalibrationService::default_phase_duration);
            calibration.start_phase(phase);
            let deadline = tokio::time::Instant::now() + duration;
            while tokio::time::Instant::now() < deadline {
                let (metric, confidence) = store.latest();
                let features = store.features();
                calibration.tick(
                    metric,
                    confidence.unwrap_or(0.0),
                    features.eyes_visible,
                    features.eye_dist,
                    features.has_face,
                    features.bbox_area,
                );
                tokio::time::sleep(Duration::from_millis(CALIBRATION_TICK_MS)).await;
            }
            match calibration.finish_phase() {
                Ok(summary) => send(tx, &ServerMessage::CalibResultPhase { summary }),
                Err(CalibrationError::InsufficientSamples { n, .. }) => send(
                    tx,
                    &ServerMessage::CalibStatus { phase, status: "error", reason: Some(format!("insufficient_samples:{n}")) },
                ),
                Err(err) => send(tx, &ServerMessage::CalibStatus { phase, status: "error", reason: Some(err.to_string()) }),
            }
        }
        Command::CalibrateFinalize => match calibration.finalize() {
            Ok(profile) => {
                let path = paths::calibration_file_path().unwrap_or_else(|_| std::path::PathBuf::from("calibration.json"));
                if let Err(err) = profile.store(&path).await {
                    tracing::warn!("failed to persist calibration profile: {err:?}");
                }
                control.set_profile(profile.clone());
                send(tx, &ServerMessage::CalibDone { saved: profile });
            }
            Err(err) => send(tx, &ServerMessage::CalibStatus { phase: Phase::Review, status: "error", reason: Some(err.to_string()) }),
        },
        Command::SetConfMin { value } => {
            let clamped = control.state_machine.lock().expect("state machine lock poisoned").set_conf_min(value);
            send(tx, &ServerMessage::Ack { what: "set_conf_min", ok: true, index: None, value: Some(clamped), qos: None, reason: None });
        }
        Command::SetQos { proc_scale, fd_stride, pose_stride, target_fps } => {
            let qos = {
                let mut qos = control.qos.lock().expect("qos lock poisoned");
                qos.apply_override(proc_scale, fd_stride, pose_stride);
                if let Some(fps) = target_fps {
                    let fps = fps.clamp(crate::consts::TARGET_FPS_MIN, crate::consts::TARGET_FPS_MAX);
                    qos.set_frame_budget_ms(crate::consts::MS_PER_SEC / fps);
                }
                qos.state()
            };
            send(tx, &ServerMessage::Ack { what: "set_qos", ok: true, index: None, value: None, qos: Some(qos), reason: None });
        }
    }
}
