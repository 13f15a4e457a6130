//! Application wiring.
//!
//! `App` owns the whole pipeline: the capture session, the analysis engine,
//! the dispatcher and the presenter. Construction order mirrors the runtime
//! data flow: presenter first (callbacks need its handle), then the engine
//! and the fixed request set, then the dispatcher, then the capture session
//! that starts frames moving.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::analyze::{
    AnalysisEngine, AnalysisRequest, Dispatcher, DispatchStats, Observation, RequestKind,
    RequestSet, StubEngine,
};
use crate::capture::{CameraSource, CaptureSession, SessionStats};
use crate::config::{CamwatchConfig, EngineKind, ModelSettings};
use crate::present::{Presenter, PresenterHandle};

/// The running application.
pub struct App {
    session: CaptureSession,
    dispatcher: Arc<Dispatcher>,
    presenter: Presenter,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App").finish_non_exhaustive()
    }
}

impl App {
    /// Build and start the pipeline described by the configuration.
    ///
    /// With `echo_labels` set, label updates are written to stdout; tests
    /// leave it off. Any model that fails to load aborts startup with an
    /// error; there is no degraded mode that runs without its requests.
    pub fn start(config: &CamwatchConfig, echo_labels: bool) -> Result<Self> {
        let engine = build_engine(config)?;
        Self::start_with_engine(config, engine, echo_labels)
    }

    /// Start with a caller-supplied engine. Used by tests and the demo
    /// binary to substitute engines without going through the config.
    pub fn start_with_engine(
        config: &CamwatchConfig,
        engine: Arc<dyn AnalysisEngine>,
        echo_labels: bool,
    ) -> Result<Self> {
        let presenter = Presenter::start(echo_labels)?;
        let handle = presenter.handle()?;

        let requests = Arc::new(build_request_set(&config.models, handle));
        let dispatcher = Arc::new(Dispatcher::new(engine, requests));

        let source = CameraSource::new(config.camera.clone())?;
        let session = CaptureSession::start(source, dispatcher.clone())
            .context("failed to start capture session")?;

        log::info!(
            "pipeline running: {} -> {} requests",
            session.device(),
            dispatcher.request_count()
        );

        Ok(Self {
            session,
            dispatcher,
            presenter,
        })
    }

    pub fn session_stats(&self) -> SessionStats {
        self.session.stats()
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    pub fn is_healthy(&self) -> bool {
        self.session.is_healthy()
    }

    /// Current presenter label text.
    pub fn label(&self) -> String {
        self.presenter.label()
    }

    /// Number of label updates applied so far.
    pub fn label_updates(&self) -> u64 {
        self.presenter.updates()
    }

    /// Stop capture, let in-flight callbacks drain, then stop the presenter.
    pub fn shutdown(&mut self) {
        self.session.stop();
        self.presenter.stop();
    }
}

fn build_engine(config: &CamwatchConfig) -> Result<Arc<dyn AnalysisEngine>> {
    match config.engine {
        EngineKind::Stub => {
            let engine = StubEngine::load(&[
                config.models.classifier_primary.as_str(),
                config.models.classifier_secondary.as_str(),
                config.models.pose_hourglass.as_str(),
                config.models.pose_cpm.as_str(),
            ])?;
            Ok(Arc::new(engine))
        }
        EngineKind::Tract => build_tract_engine(config),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract_engine(config: &CamwatchConfig) -> Result<Arc<dyn AnalysisEngine>> {
    use crate::analyze::backends::tract::{ModelFile, TractEngine};
    use std::path::PathBuf;

    let models = &config.models;
    let files = [
        ModelFile {
            reference: models.classifier_primary.clone(),
            path: PathBuf::from(&models.classifier_primary),
            input: (224, 224),
        },
        ModelFile {
            reference: models.classifier_secondary.clone(),
            path: PathBuf::from(&models.classifier_secondary),
            input: (224, 224),
        },
        ModelFile {
            reference: models.pose_hourglass.clone(),
            path: PathBuf::from(&models.pose_hourglass),
            input: (192, 192),
        },
        ModelFile {
            reference: models.pose_cpm.clone(),
            path: PathBuf::from(&models.pose_cpm),
            input: (192, 192),
        },
    ];
    Ok(Arc::new(TractEngine::load(&files)?))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract_engine(_config: &CamwatchConfig) -> Result<Arc<dyn AnalysisEngine>> {
    anyhow::bail!("engine 'tract' requires the backend-tract feature")
}

/// The five analysis requests registered at startup.
///
/// Only the primary classifier drives the visible label. The secondary
/// classifier's results are received and discarded at trace level, the
/// rectangle and pose requests report through the log.
pub fn build_request_set(models: &ModelSettings, handle: PresenterHandle) -> RequestSet {
    let requests = vec![
        AnalysisRequest::new(
            "classification",
            RequestKind::Classification {
                model: models.classifier_primary.clone(),
            },
            move |outcome| match outcome {
                Ok(Observation::Labels(labels)) => handle.show_classification(&labels),
                Ok(other) => log::warn!("classification: unexpected observation {:?}", other),
                Err(e) => log::warn!("classification failed: {:#}", e),
            },
        ),
        AnalysisRequest::new(
            "geo-classification",
            RequestKind::Classification {
                model: models.classifier_secondary.clone(),
            },
            |outcome| match outcome {
                // Received but unused: nothing downstream consumes the geo
                // labels yet.
                Ok(Observation::Labels(labels)) => {
                    log::trace!("geo-classification: {} labels", labels.len())
                }
                Ok(other) => log::warn!("geo-classification: unexpected observation {:?}", other),
                Err(e) => log::warn!("geo-classification failed: {:#}", e),
            },
        ),
        AnalysisRequest::new(
            "rectangle",
            RequestKind::RectangleDetection,
            |outcome| match outcome {
                Ok(Observation::Rectangle(Some(quad))) => {
                    log::info!("rectangle: {}", quad.describe())
                }
                Ok(Observation::Rectangle(None)) => log::debug!("rectangle: none detected"),
                Ok(other) => log::warn!("rectangle: unexpected observation {:?}", other),
                Err(e) => log::warn!("rectangle detection failed: {:#}", e),
            },
        ),
        AnalysisRequest::new(
            "pose-hourglass",
            RequestKind::PoseHeatmap {
                model: models.pose_hourglass.clone(),
                channels: 14,
                height: 48,
                width: 48,
            },
            |outcome| match outcome {
                Ok(Observation::Heatmap(map)) => {
                    let (channels, height, width) = map.shape();
                    log::debug!("pose-hourglass: heatmap {}x{}x{}", channels, height, width);
                }
                Ok(other) => log::warn!("pose-hourglass: unexpected observation {:?}", other),
                Err(e) => log::warn!("pose-hourglass failed: {:#}", e),
            },
        ),
        AnalysisRequest::new(
            "pose-cpm",
            RequestKind::PoseHeatmap {
                model: models.pose_cpm.clone(),
                channels: 14,
                height: 96,
                width: 96,
            },
            |outcome| match outcome {
                Ok(Observation::Heatmap(map)) => {
                    // Every cell is walked, matching the exhaustive dump the
                    // request was built for. Cell output is trace-gated so a
                    // default run only sees the summary.
                    let mut cells = 0usize;
                    for (channel, y, x, value) in map.cells() {
                        log::trace!("pose-cpm[{}][{}][{}] = {}", channel, y, x, value);
                        cells += 1;
                    }
                    log::debug!("pose-cpm: {} cells", cells);
                }
                Ok(other) => log::warn!("pose-cpm: unexpected observation {:?}", other),
                Err(e) => log::warn!("pose-cpm failed: {:#}", e),
            },
        ),
    ];
    RequestSet::new(requests)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
