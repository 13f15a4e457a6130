//! Per-frame dispatch to the analysis engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::analyze::engine::AnalysisEngine;
use crate::analyze::request::RequestSet;
use crate::capture::FrameConsumer;
use crate::frame::Frame;

/// Counters for submitted and rejected batches.
#[derive(Clone, Copy, Debug, Default)]
pub struct DispatchStats {
    pub submitted: u64,
    pub rejected: u64,
}

/// The inference dispatcher.
///
/// Holds the startup-fixed request set and, for every delivered frame,
/// submits the whole batch to the engine in one call. A rejected batch is
/// logged and the frame dropped; the next frame is unaffected.
pub struct Dispatcher {
    engine: Arc<dyn AnalysisEngine>,
    requests: Arc<RequestSet>,
    submitted: AtomicU64,
    rejected: AtomicU64,
}

impl Dispatcher {
    pub fn new(engine: Arc<dyn AnalysisEngine>, requests: Arc<RequestSet>) -> Self {
        Self {
            engine,
            requests,
            submitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }
}

impl FrameConsumer for Dispatcher {
    fn handle_frame(&self, frame: &Frame) {
        if self.requests.is_empty() {
            return;
        }
        match self.engine.submit(frame, &self.requests) {
            Ok(()) => {
                self.submitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "{}: batch for frame {} rejected: {:#}",
                    self.engine.name(),
                    frame.sequence,
                    e
                );
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
