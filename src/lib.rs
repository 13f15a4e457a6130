//! camwatch: a live-camera analysis pipeline.
//!
//! Frames flow from a single camera source through a latest-wins delivery
//! slot into a dispatcher that submits a fixed set of analysis requests
//! (classification, rectangle detection, pose heatmaps) to a pluggable
//! engine. Results come back through per-request callbacks; the primary
//! classification drives a presenter-owned text label, everything else is
//! reported through the log.
//!
//! Layout:
//! - `frame`: frame representation and the single-slot mailbox
//! - `capture`: camera sources and the capture session threads
//! - `analyze`: request descriptors, dispatcher and engine backends
//! - `present`: the result presenter that owns the visible label
//! - `config`: file and environment configuration
//! - `app`: the wiring that assembles a running pipeline

pub mod analyze;
pub mod app;
pub mod capture;
pub mod config;
pub mod frame;
pub mod present;

pub use app::App;
pub use config::CamwatchConfig;
