//! Capture adapter: opens a camera by index and yields BGR frames.
//!
//! This is one of the out-of-scope external collaborators: the rest of the
//! sensor only depends on the [`CameraCapture`] trait, never on `opencv`
//! directly, so a different backend can be dropped in without touching the
//! pipeline.

use eyre::{eyre, Result};
use opencv::{core::Mat, prelude::*, videoio};
use std::{ops::RangeInclusive, time::Instant};

/// A single captured frame: a BGR pixel grid plus the instant it was read.
/// Transient; not retained across pipeline stages.
#[derive(Clone)]
pub struct Frame {
    /// Row-major BGR pixel data, three bytes per pixel.
    pub data: Vec<u8>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// When this frame was read off the device.
    pub timestamp: Instant,
}

/// Narrow interface around a video source: open by index, read BGR frames,
/// report the configured resolution, probe and switch.
pub trait CameraCapture: Send {
    /// Blocks until the next frame is available, or returns an error on a
    /// read miss (counted by the caller into the `camera_error` health flag).
    fn read(&mut self) -> Result<Frame>;

    /// The resolution the device is currently configured at.
    fn resolution(&self) -> (u32, u32);
}

/// `opencv::videoio`-backed [`CameraCapture`].
pub struct OpenCvCapture {
    inner: videoio::VideoCapture,
    width: u32,
    height: u32,
}

impl OpenCvCapture {
    /// Opens camera `index` using the platform's default backend.
    pub fn open(index: i32) -> Result<Self> {
        let inner = videoio::VideoCapture::new(index, videoio::CAP_ANY)?;
        if !videoio::VideoCapture::is_opened(&inner)? {
            return Err(eyre!("camera {index} did not open"));
        }
        let width = inner.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let height = inner.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
        Ok(Self { inner, width, height })
    }
}

impl CameraCapture for OpenCvCapture {
    fn read(&mut self) -> Result<Frame> {
        let mut mat = Mat::default();
        self.inner.read(&mut mat)?;
        if mat.empty() {
            return Err(eyre!("camera read returned an empty frame"));
        }
        let width = mat.cols() as u32;
        let height = mat.rows() as u32;
        let data = mat.data_bytes()?.to_vec();
        Ok(Frame { data, width, height, timestamp: Instant::now() })
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Tries to open each index in `range`, closing it immediately, and returns
/// the indices that opened successfully.
#[must_use]
pub fn probe_cameras(range: RangeInclusive<i32>) -> Vec<i32> {
    range.filter(|&index| can_open(index)).collect()
}

/// Whether camera `index` can be opened and yields at least one frame.
/// Closes the device immediately afterwards either way.
#[must_use]
pub fn can_open(index: i32) -> bool {
    let Ok(mut cap) = videoio::VideoCapture::new(index, videoio::CAP_ANY) else { return false };
    match videoio::VideoCapture::is_opened(&cap) {
        Ok(true) => {}
        _ => return false,
    }
    let mut mat = Mat::default();
    cap.read(&mut mat).unwrap_or(false) && !mat.empty()
}
