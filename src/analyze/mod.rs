//! Frame analysis.
//!
//! This module holds the inference side of the pipeline:
//! - `AnalysisRequest` / `RequestSet`: immutable descriptors pairing a model
//!   or built-in detector with a completion callback, fixed at startup
//! - `AnalysisEngine`: the boundary trait for the external engine that
//!   executes a submitted batch and fires callbacks asynchronously
//! - `Dispatcher`: the per-frame fan-out that submits every descriptor
//!   against each delivered frame
//! - Backends: deterministic stub (always available) and tract-onnx
//!   (feature: backend-tract)
//!
//! The engine decides execution order and concurrency internally; nothing
//! here blocks on results, and no ordering is guaranteed across callbacks.

pub mod backends;
mod dispatcher;
mod engine;
mod observation;
mod request;

pub use backends::stub::StubEngine;
#[cfg(feature = "backend-tract")]
pub use backends::tract::TractEngine;
pub use dispatcher::{Dispatcher, DispatchStats};
pub use engine::AnalysisEngine;
pub use observation::{render_top_labels, Heatmap, LabelScore, Observation, Point, Quad};
pub use request::{AnalysisRequest, RequestKind, RequestSet, ResultCallback};
