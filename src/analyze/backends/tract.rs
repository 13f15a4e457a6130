#![cfg(feature = "backend-tract")]

//! Tract-based analysis engine.
//!
//! Loads local ONNX model files for the classification and pose requests and
//! evaluates them on an engine-owned worker thread. Rectangle detection has
//! no model; it runs a built-in luminance detector on the CPU. No network
//! I/O and nothing is written to disk after model loading.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Sender, TrySendError};
use tract_onnx::prelude::*;

use crate::analyze::engine::AnalysisEngine;
use crate::analyze::observation::{Heatmap, LabelScore, Observation, Point, Quad};
use crate::analyze::request::{AnalysisRequest, RequestKind, RequestSet};
use crate::frame::{Frame, PixelFormat};

/// One ONNX model file to load, keyed by the reference descriptors use.
#[derive(Clone, Debug)]
pub struct ModelFile {
    pub reference: String,
    pub path: PathBuf,
    /// Network input dimensions (width, height).
    pub input: (u32, u32),
}

struct LoadedModel {
    plan: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_width: u32,
    input_height: u32,
}

struct Job {
    frame: Frame,
    requests: Arc<RequestSet>,
}

/// ONNX analysis engine (feature: backend-tract).
pub struct TractEngine {
    tx: Option<Sender<Job>>,
    discarded: AtomicU64,
    worker: Option<JoinHandle<()>>,
}

impl TractEngine {
    /// Load every referenced model and start the worker thread.
    ///
    /// A model that cannot be loaded fails startup here; there is no
    /// degraded mode that silently skips inference.
    pub fn load(models: &[ModelFile]) -> Result<Self> {
        let mut plans = HashMap::new();
        for model in models {
            let plan = build_plan(model)?;
            log::info!(
                "TractEngine: loaded {} from {}",
                model.reference,
                model.path.display()
            );
            plans.insert(
                model.reference.clone(),
                LoadedModel {
                    plan,
                    input_width: model.input.0,
                    input_height: model.input.1,
                },
            );
        }

        // One pending batch at most; inference slower than capture discards
        // frames at submission instead of queueing cloned buffers.
        let (tx, rx) = crossbeam_channel::bounded::<Job>(1);
        let worker = std::thread::Builder::new()
            .name("analysis-worker".to_string())
            .spawn(move || {
                for job in rx {
                    for request in job.requests.iter() {
                        request.complete(evaluate(&plans, request, &job.frame));
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

impl AnalysisEngine for TractEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn submit(&self, frame: &Frame, requests: &Arc<RequestSet>) -> Result<()> {
        let tx = self.tx.as_ref().context("tract engine stopped")?;
        match tx.try_send(Job {
            frame: frame.clone(),
            requests: Arc::clone(requests),
        }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                log::debug!("tract: worker busy, frame {} discarded", job.frame.sequence);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(anyhow!("tract engine worker is gone")),
        }
    }
}

impl Drop for TractEngine {
    fn drop(&mut self) {
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn build_plan(model: &ModelFile) -> Result<SimplePlan<TypedFact, Box<dyn TypedOp>>> {
    let (width, height) = model.input;
    tract_onnx::onnx()
        .model_for_path(&model.path)
        .with_context(|| format!("failed to load ONNX model from {}", model.path.display()))?
        .with_input_fact(
            0,
            InferenceFact::dt_shape(
                f32::datum_type(),
                tvec!(1, 3, height as usize, width as usize),
            ),
        )
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize ONNX model")?
        .into_runnable()
        .context("failed to build runnable ONNX model")
}

fn evaluate(
    plans: &HashMap<String, LoadedModel>,
    request: &AnalysisRequest,
    frame: &Frame,
) -> Result<Observation> {
    match request.kind() {
        RequestKind::Classification { model } => {
            let loaded = lookup(plans, model)?;
            let scores = run_model(loaded, frame)?;
            Ok(Observation::Labels(ranked_labels(&scores)))
        }
        RequestKind::PoseHeatmap {
            model,
            channels,
            height,
            width,
        } => {
            let loaded = lookup(plans, model)?;
            let values = run_model(loaded, frame)?;
            let map = Heatmap::from_values(*channels, *height, *width, values)
                .with_context(|| format!("model {} output shape mismatch", model))?;
            Ok(Observation::Heatmap(map))
        }
        RequestKind::RectangleDetection => Ok(Observation::Rectangle(detect_rectangle(frame))),
    }
}

fn lookup<'a>(plans: &'a HashMap<String, LoadedModel>, model: &str) -> Result<&'a LoadedModel> {
    plans
        .get(model)
        .ok_or_else(|| anyhow!("model {} is not loaded", model))
}

fn run_model(loaded: &LoadedModel, frame: &Frame) -> Result<Vec<f32>> {
    let input = preprocess(frame, loaded.input_width, loaded.input_height);
    let tensor = tract_ndarray::Array4::from_shape_vec(
        (
            1,
            3,
            loaded.input_height as usize,
            loaded.input_width as usize,
        ),
        input,
    )
    .context("build input tensor")?
    .into_tensor();

    let outputs = loaded
        .plan
        .run(tvec!(tensor.into()))
        .context("ONNX inference failed")?;
    let output = outputs.first().context("model produced no outputs")?;
    let view = output
        .to_array_view::<f32>()
        .context("model output tensor was not f32")?;
    Ok(view.iter().copied().collect())
}

/// Nearest-neighbor resize to the network input, normalized CHW floats.
fn preprocess(frame: &Frame, target_width: u32, target_height: u32) -> Vec<f32> {
    let bpp = frame.pixel_format.bytes_per_pixel();
    let (r_off, g_off, b_off) = match frame.pixel_format {
        PixelFormat::Bgra32 => (2, 1, 0),
        PixelFormat::Rgb24 => (0, 1, 2),
    };

    let channel_stride = (target_width * target_height) as usize;
    let mut output = vec![0.0f32; channel_stride * 3];
    let x_ratio = frame.width as f32 / target_width as f32;
    let y_ratio = frame.height as f32 / target_height as f32;

    for y in 0..target_height {
        for x in 0..target_width {
            let src_x = (x as f32 * x_ratio) as u32;
            let src_y = (y as f32 * y_ratio) as u32;
            let src = (src_y as usize * frame.width as usize + src_x as usize) * bpp;
            if src + bpp > frame.data.len() {
                continue;
            }
            let dst = (y * target_width + x) as usize;
            output[dst] = frame.data[src + r_off] as f32 / 255.0;
            output[channel_stride + dst] = frame.data[src + g_off] as f32 / 255.0;
            output[2 * channel_stride + dst] = frame.data[src + b_off] as f32 / 255.0;
        }
    }

    output
}

fn ranked_labels(scores: &[f32]) -> Vec<LabelScore> {
    // Softmax over raw scores, then rank. Label names are positional; the
    // models ship without a class-name sidecar.
    let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f32 = exps.iter().sum();

    let mut labels: Vec<LabelScore> = exps
        .iter()
        .enumerate()
        .map(|(idx, e)| LabelScore::new(format!("class_{}", idx), e / total.max(f32::MIN_POSITIVE)))
        .collect();
    labels.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    labels.truncate(10);
    labels
}

/// Built-in rectangle detector: bounding box of above-average luminance.
fn detect_rectangle(frame: &Frame) -> Option<Quad> {
    let bpp = frame.pixel_format.bytes_per_pixel();
    let (width, height) = (frame.width as usize, frame.height as usize);
    if width == 0 || height == 0 || frame.data.len() < width * height * bpp {
        return None;
    }

    let luma = |idx: usize| -> u32 {
        let p = &frame.data[idx..idx + 3];
        // Order does not matter for a threshold average.
        (p[0] as u32 + p[1] as u32 + p[2] as u32) / 3
    };

    let mut total: u64 = 0;
    for y in 0..height {
        for x in 0..width {
            total += luma((y * width + x) * bpp) as u64;
        }
    }
    let mean = (total / (width * height) as u64) as u32;
    let threshold = mean + mean / 4;

    let (mut min_x, mut min_y, mut max_x, mut max_y) = (width, height, 0usize, 0usize);
    let mut hits = 0usize;
    for y in 0..height {
        for x in 0..width {
            if luma((y * width + x) * bpp) > threshold {
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
                hits += 1;
            }
        }
    }

    let coverage = hits as f32 / (width * height) as f32;
    if hits == 0 || coverage > 0.9 {
        return None;
    }

    let nx = |x: usize| x as f32 / width as f32;
    let ny = |y: usize| y as f32 / height as f32;
    Some(Quad {
        top_left: Point::new(nx(min_x), ny(min_y)),
        top_right: Point::new(nx(max_x), ny(min_y)),
        bottom_left: Point::new(nx(min_x), ny(max_y)),
        bottom_right: Point::new(nx(max_x), ny(max_y)),
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Orientation;

    fn gray_frame(width: u32, height: u32) -> Frame {
        Frame {
            data: vec![64u8; (width * height * 3) as usize],
            width,
            height,
            pixel_format: PixelFormat::Rgb24,
            orientation: Orientation::Landscape,
            sequence: 1,
            intrinsics: None,
        }
    }

    #[test]
    fn rectangle_detector_finds_a_bright_patch() {
        let mut frame = gray_frame(10, 10);
        // Bright 4x4 block at (2,3)..(5,6).
        for y in 3..7usize {
            for x in 2..6usize {
                let idx = (y * 10 + x) * 3;
                frame.data[idx..idx + 3].copy_from_slice(&[250, 250, 250]);
            }
        }

        let quad = detect_rectangle(&frame).expect("rectangle");
        assert_eq!(quad.top_left, Point::new(0.2, 0.3));
        assert_eq!(quad.top_right, Point::new(0.5, 0.3));
        assert_eq!(quad.bottom_left, Point::new(0.2, 0.6));
        assert_eq!(quad.bottom_right, Point::new(0.5, 0.6));
    }

    #[test]
    fn rectangle_detector_rejects_flat_frames() {
        assert!(detect_rectangle(&gray_frame(8, 8)).is_none());
    }

    #[test]
    fn preprocess_produces_three_normalized_channels() {
        let frame = gray_frame(4, 4);
        let input = preprocess(&frame, 2, 2);
        assert_eq!(input.len(), 2 * 2 * 3);
        for value in input {
            assert!((value - 64.0 / 255.0).abs() < 1e-6);
        }
    }

    #[test]
    fn busy_worker_discards_frames_instead_of_queueing() -> Result<()> {
        use crate::analyze::request::{AnalysisRequest, RequestKind, RequestSet};
        use std::time::Duration;

        // No models needed; the rectangle detector is built in.
        let engine = TractEngine::load(&[])?;
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded::<()>();
        let (seen_tx, seen_rx) = crossbeam_channel::unbounded::<()>();

        let requests = Arc::new(RequestSet::new(vec![AnalysisRequest::new(
            "hold",
            RequestKind::RectangleDetection,
            move |_| {
                let _ = seen_tx.send(());
                let _ = gate_rx.recv();
            },
        )]));

        let frame = gray_frame(4, 4);
        engine.submit(&frame, &requests)?;
        seen_rx.recv_timeout(Duration::from_secs(5))?;

        for _ in 0..5 {
            engine.submit(&frame, &requests)?;
        }
        assert_eq!(engine.discarded(), 4);

        for _ in 0..2 {
            let _ = gate_tx.send(());
        }
        assert!(seen_rx.recv_timeout(Duration::from_secs(5)).is_ok());
        assert!(seen_rx.recv_timeout(Duration::from_millis(200)).is_err());
        Ok(())
    }

    #[test]
    fn ranked_labels_sum_to_one_and_are_sorted() {
        let labels = ranked_labels(&[0.1, 2.0, -1.0, 0.5]);
        assert_eq!(labels[0].label, "class_1");
        let total: f32 = labels.iter().map(|l| l.confidence).sum();
        assert!((total - 1.0).abs() < 1e-4);
        for pair in labels.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
    }
}
