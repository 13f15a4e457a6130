//! Frame container and the single-slot delivery mailbox.
//!
//! - `Frame`: one captured image buffer plus metadata, produced at the
//!   device's native rate. Read-only to everything downstream.
//! - `FrameSlot`: latest-wins mailbox between the capture thread and the
//!   delivery thread. If the consumer is still busy when a new frame lands,
//!   the new frame replaces the pending one. Nothing is ever queued, so
//!   handler invocations can never back up unbounded.

use std::sync::{Condvar, Mutex};

/// Pixel layout of a captured frame.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// 32-bit BGRA, the capture default.
    Bgra32,
    /// 24-bit RGB, produced by some V4L2 devices.
    Rgb24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra32 => 4,
            PixelFormat::Rgb24 => 3,
        }
    }
}

/// Display orientation reported by the capture connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

/// Camera intrinsic parameters attached by some devices.
///
/// Focal lengths and principal point in pixel units. Optional: V4L2 devices
/// supply none, and downstream code must not depend on it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

/// One captured frame. Produced once per capture tick; discarded after the
/// dispatch call returns (the engine copies what it needs for async work).
#[derive(Clone, Debug)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub orientation: Orientation,
    /// Monotonically increasing per-source sequence number.
    pub sequence: u64,
    pub intrinsics: Option<CameraIntrinsics>,
}

impl Frame {
    /// Expected byte length for the declared dimensions and format.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel()
    }
}

// ----------------------------------------------------------------------------
// FrameSlot: single-slot latest-wins mailbox
// ----------------------------------------------------------------------------

#[derive(Default)]
struct SlotState {
    frame: Option<Frame>,
    published: u64,
    dropped: u64,
    closed: bool,
}

/// Single-slot mailbox between one producer and one consumer.
///
/// `publish` replaces any pending frame; `recv` blocks until a frame is
/// available or the slot is closed. This is the backpressure policy from the
/// capture contract: late frames are discarded, never buffered.
#[derive(Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
    available: Condvar,
}

/// Counters for observability; logged by the session health loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlotStats {
    pub published: u64,
    pub dropped: u64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a frame, replacing any frame the consumer has not taken yet.
    /// Returns false once the slot is closed.
    pub fn publish(&self, frame: Frame) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.closed {
            return false;
        }
        if state.frame.is_some() {
            state.dropped += 1;
        }
        state.frame = Some(frame);
        state.published += 1;
        self.available.notify_one();
        true
    }

    /// Block until a frame is available; returns None once the slot is closed
    /// and empty.
    pub fn recv(&self) -> Option<Frame> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(frame) = state.frame.take() {
                return Some(frame);
            }
            if state.closed {
                return None;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Non-blocking take.
    pub fn try_recv(&self) -> Option<Frame> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.frame.take()
    }

    /// Close the slot; a pending frame stays takeable, publishers are refused.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.closed = true;
        self.available.notify_all();
    }

    pub fn stats(&self) -> SlotStats {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        SlotStats {
            published: state.published,
            dropped: state.dropped,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
