//! Stub analysis engine for tests and the demo binary.
//!
//! Deterministic: observations are derived from a digest of the frame bytes
//! and the model reference, so the same frame always yields the same ranked
//! labels. Callbacks run on an engine-owned worker thread, which keeps the
//! submission call non-blocking like the real engine boundary.
//!
//! Model reference conventions:
//! - `fail-load://name` fails at load time (surfaced startup error)
//! - `fail://name` loads, but every evaluation returns an error
//! - anything else yields canned observations

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Sender, TrySendError};
use sha2::{Digest, Sha256};

use crate::analyze::engine::AnalysisEngine;
use crate::analyze::observation::{Heatmap, LabelScore, Observation, Point, Quad};
use crate::analyze::request::{AnalysisRequest, RequestKind, RequestSet};
use crate::frame::Frame;

const STUB_VOCABULARY: [&str; 6] = [
    "tabby cat",
    "golden retriever",
    "street sign",
    "sports car",
    "park bench",
    "traffic light",
];

struct Job {
    frame: Frame,
    requests: Arc<RequestSet>,
}

/// Deterministic in-process analysis engine.
pub struct StubEngine {
    tx: Option<Sender<Job>>,
    discarded: AtomicU64,
    worker: Option<JoinHandle<()>>,
}

impl StubEngine {
    /// "Load" the referenced models and start the worker thread.
    ///
    /// Loading only validates the references, but a `fail-load://` reference
    /// errors here so startup failure paths stay testable.
    pub fn load(model_references: &[&str]) -> Result<Self> {
        for reference in model_references {
            if reference.starts_with("fail-load://") {
                return Err(anyhow!("model {} failed to load", reference));
            }
            log::debug!("StubEngine: loaded model {}", reference);
        }
        Self::start()
    }

    /// Start an engine without any model validation.
    pub fn start() -> Result<Self> {
        // One pending batch at most. A submission that finds both the worker
        // and the slot busy discards its frame instead of queueing.
        let (tx, rx) = crossbeam_channel::bounded::<Job>(1);
        let worker = std::thread::Builder::new()
            .name("analysis-worker".to_string())
            .spawn(move || {
                for job in rx {
                    for request in job.requests.iter() {
                        // Exactly one completion per request per frame. A
                        // failing request never suppresses the others.
                        request.complete(evaluate(request, &job.frame));
                    }
                }
            })
            .context("spawn analysis worker")?;

        Ok(Self {
            tx: Some(tx),
            discarded: AtomicU64::new(0),
            worker: Some(worker),
        })
    }

    /// Number of frames discarded because the worker was busy.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

impl AnalysisEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn submit(&self, frame: &Frame, requests: &Arc<RequestSet>) -> Result<()> {
        let tx = self.tx.as_ref().context("stub engine stopped")?;
        match tx.try_send(Job {
            frame: frame.clone(),
            requests: Arc::clone(requests),
        }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                log::debug!("stub: worker busy, frame {} discarded", job.frame.sequence);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(anyhow!("stub engine worker is gone")),
        }
    }
}

impl Drop for StubEngine {
    fn drop(&mut self) {
        // Disconnect the channel, then wait for in-flight callbacks.
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn evaluate(request: &AnalysisRequest, frame: &Frame) -> Result<Observation> {
    if let Some(model) = request.kind().model() {
        if model.starts_with("fail://") {
            return Err(anyhow!(
                "model {} rejected frame {}",
                model,
                frame.sequence
            ));
        }
    }

    match request.kind() {
        RequestKind::Classification { model } => {
            Ok(Observation::Labels(ranked_labels(model, frame)))
        }
        RequestKind::RectangleDetection => Ok(Observation::Rectangle(Some(Quad {
            top_left: Point::new(0.2, 0.2),
            top_right: Point::new(0.8, 0.2),
            bottom_left: Point::new(0.2, 0.8),
            bottom_right: Point::new(0.8, 0.8),
        }))),
        RequestKind::PoseHeatmap {
            channels,
            height,
            width,
            ..
        } => Ok(Observation::Heatmap(synthetic_heatmap(
            *channels, *height, *width,
        )?)),
    }
}

/// Ranked labels derived from a digest of the frame and model reference.
fn ranked_labels(model: &str, frame: &Frame) -> Vec<LabelScore> {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update(&frame.data);
    let digest: [u8; 32] = hasher.finalize().into();

    let raw: Vec<f32> = digest
        .iter()
        .take(STUB_VOCABULARY.len())
        .map(|&b| b as f32 + 1.0)
        .collect();
    let total: f32 = raw.iter().sum();

    let mut labels: Vec<LabelScore> = STUB_VOCABULARY
        .iter()
        .zip(raw.iter())
        .map(|(label, weight)| LabelScore::new(*label, weight / total))
        .collect();
    labels.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    labels
}

fn synthetic_heatmap(channels: usize, height: usize, width: usize) -> Result<Heatmap> {
    let values: Vec<f32> = (0..channels * height * width)
        .map(|idx| {
            let x = idx % width;
            let y = (idx / width) % height;
            let channel = idx / (width * height);
            ((x + y + channel) % 17) as f32 / 16.0
        })
        .collect();
    Heatmap::from_values(channels, height, width, values)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
