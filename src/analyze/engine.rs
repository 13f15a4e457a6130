//! Analysis engine boundary.

use std::sync::Arc;

use anyhow::Result;

use crate::analyze::request::RequestSet;
use crate::frame::Frame;

/// The external analysis engine.
///
/// `submit` hands one frame together with the full ordered request batch to
/// the engine and returns once the batch is accepted; it never blocks on
/// results. The engine decides execution order and concurrency internally
/// and invokes each request's callback independently, at most once per
/// submitted frame, possibly on its own threads.
///
/// An error from `submit` means the whole batch was rejected; the caller
/// logs it and drops the frame. An engine whose worker is saturated may
/// accept a batch and discard it without firing any callback; it never
/// queues beyond one pending batch. There is no retry and no partial-result
/// recovery, and a request that hangs inside the engine simply never calls
/// back.
pub trait AnalysisEngine: Send + Sync {
    /// Engine identifier for logs.
    fn name(&self) -> &'static str;

    /// Submit one frame against the full request batch.
    fn submit(&self, frame: &Frame, requests: &Arc<RequestSet>) -> Result<()>;
}
