//! Frame capture.
//!
//! This module owns the capture side of the pipeline:
//! - `CameraSource`: a capture device producing frames at its native rate
//!   (synthetic `stub://` backend always available, V4L2 behind the
//!   `capture-v4l2` feature)
//! - `CaptureSession`: the capture thread plus the dedicated delivery thread
//!   that hands frames to the single registered consumer
//!
//! Delivery is latest-wins: a frame that arrives while the consumer is still
//! processing the previous one replaces it. Failure to open a device or an
//! input is a fatal startup condition; there is no retry.

pub mod camera;
mod session;

pub use camera::{CameraConfig, CameraSource, CameraStats, ResolutionPreset};
pub use session::{CaptureSession, FrameConsumer, SessionStats};
