//! Realtime presence/attention sensor.
//!
//! From a local video source this crate derives, per frame, a small feature
//! vector about a single user's face and body and fuses them into a single
//! scalar whose two ends correspond to two calibrated postures (REVIEW:
//! leaned back; FOCUS: leaned in). A hysteretic, dwell-gated, confidence-gated
//! state machine turns this scalar into a stable posture state that is
//! streamed to local clients over a WebSocket, together with telemetry and
//! health.
//!
//! # Architecture
//!
//! Capture → [`features`] → [`fusion`] → [`state_machine`]; the state machine
//! and fusion engine publish into the [`store`]; the [`server`] reads
//! snapshots and emits state/heartbeat messages, and its receiver writes into
//! [`calibration`] and [`qos`], which feed back into the [`pipeline`].
//!
//! # Guidelines
//!
//! The code should be formatted with Rustfmt using the project-level
//! `rustfmt.toml`. E.g. run from the command line: `cargo fmt`.
//!
//! The code should pass clippy lints in pedantic mode. E.g. run from the
//! command line: `cargo clippy`. It's fine to suppress some lint locally with
//! `#[allow(clippy:<lint>)]` attribute.

#![warn(missing_docs, unsafe_op_in_unsafe_fn)]
#![warn(clippy::pedantic)]
#![allow(clippy::doc_markdown, clippy::missing_errors_doc, clippy::module_name_repetitions)]

pub mod calibration;
pub mod clock;
pub mod cli;
pub mod config;
pub mod consts;
pub mod detectors;
pub mod features;
pub mod fusion;
pub mod health;
pub mod logger;
pub mod paths;
pub mod pipeline;
pub mod qos;
pub mod server;
pub mod shared;
pub mod state_machine;
pub mod store;

use eyre::Result;
use futures::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A wrapper for the main function, which runs common initialization routines
/// and takes a future to execute as the main function.
#[allow(clippy::missing_panics_doc)]
pub fn async_main<F: Future<Output = Result<()>>>(f: F) -> Result<()> {
    color_eyre::install()?;
    let future = async {
        let result = f.await;
        match result {
            Ok(()) => {
                // If we return from this function, other async tasks in this tokio
                // runtime will keep running. We are completely done by now, it's
                // safe to forcefully kill them.
                std::process::exit(0);
            }
            Err(err) => {
                tracing::error!("fatal error: {err:?}");
                std::process::exit(1);
            }
        }
    };
    tokio::runtime::Builder::new_multi_thread()
        .thread_name_fn(|| {
            static ATOMIC_ID: AtomicUsize = AtomicUsize::new(0);
            let id = ATOMIC_ID.fetch_add(1, Ordering::Relaxed);
            format!("dws-sensor-worker-{id}")
        })
        .enable_all()
        .build()
        .expect("failed to initialize async runtime")
        .block_on(future)
}
