//! End-to-end pipeline tests against the synthetic camera and stub engine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use camwatch::analyze::{
    AnalysisRequest, Dispatcher, Observation, RequestKind, RequestSet, StubEngine,
};
use camwatch::capture::{CameraConfig, CameraSource, CaptureSession, ResolutionPreset};
use camwatch::config::{CamwatchConfig, EngineKind, ModelSettings};
use camwatch::App;

fn stub_config(device: &str, fps: u32) -> CamwatchConfig {
    CamwatchConfig {
        engine: EngineKind::Stub,
        camera: CameraConfig {
            device: device.to_string(),
            resolution: ResolutionPreset::Low,
            target_fps: fps,
            ..CameraConfig::default()
        },
        models: ModelSettings {
            classifier_primary: "resnet50".to_string(),
            classifier_secondary: "rn1015k500".to_string(),
            pose_hourglass: "hourglass".to_string(),
            pose_cpm: "cpm".to_string(),
        },
    }
}

fn wait_until(deadline_ms: u64, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_millis(deadline_ms);
    while !done() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn label_updates_never_exceed_delivered_frames() -> Result<()> {
    let mut app = App::start(&stub_config("stub://pipeline", 100), false)?;

    wait_until(5_000, || app.label_updates() >= 3);
    app.shutdown();

    let stats = app.session_stats();
    assert!(stats.delivered > 0);
    assert!(
        app.label_updates() <= stats.delivered,
        "updates {} > delivered {}",
        app.label_updates(),
        stats.delivered
    );
    assert!(app.label_updates() >= 3, "updates {}", app.label_updates());
    Ok(())
}

#[test]
fn final_label_renders_at_most_five_lines() -> Result<()> {
    let mut app = App::start(&stub_config("stub://label_shape", 100), false)?;

    wait_until(5_000, || app.label_updates() >= 1);
    app.shutdown();

    let label = app.label();
    assert!(!label.is_empty());
    assert!(label.lines().count() <= 5);
    for line in label.lines() {
        let (_, score) = line.rsplit_once(' ').expect("label and score");
        let score: f32 = score.parse().expect("rounded percentage");
        assert!((0.0..=100.0).contains(&score));
    }
    Ok(())
}

#[test]
fn one_failing_model_leaves_the_rest_of_the_batch_running() -> Result<()> {
    let engine: Arc<dyn camwatch::analyze::AnalysisEngine> = Arc::new(StubEngine::start()?);
    let (tx, rx) = crossbeam_channel_pair();

    let requests = Arc::new(RequestSet::new(vec![
        AnalysisRequest::new(
            "broken",
            RequestKind::Classification {
                model: "fail://rn1015k500".to_string(),
            },
            sender(&tx, "broken"),
        ),
        AnalysisRequest::new("rectangle", RequestKind::RectangleDetection, sender(&tx, "rectangle")),
    ]));

    let dispatcher = Arc::new(Dispatcher::new(engine, requests));
    let source = CameraSource::new(CameraConfig {
        device: "stub://batch".to_string(),
        resolution: ResolutionPreset::Low,
        target_fps: 100,
        ..CameraConfig::default()
    })?;
    let mut session = CaptureSession::start(source, dispatcher.clone())?;

    let mut broken_failed = false;
    let mut rectangle_ok = false;
    let deadline = Instant::now() + Duration::from_secs(5);
    while (!broken_failed || !rectangle_ok) && Instant::now() < deadline {
        if let Ok((name, outcome)) = rx.recv_timeout(Duration::from_millis(200)) {
            match (name.as_str(), outcome) {
                ("broken", Err(_)) => broken_failed = true,
                ("rectangle", Ok(Observation::Rectangle(Some(_)))) => rectangle_ok = true,
                _ => {}
            }
        }
    }
    session.stop();

    assert!(broken_failed, "failing model never reported its error");
    assert!(rectangle_ok, "rectangle request was suppressed by the failing model");
    assert!(dispatcher.stats().submitted > 0);
    Ok(())
}

#[test]
fn model_load_failure_is_a_startup_error() {
    let mut config = stub_config("stub://load_failure", 30);
    config.models.classifier_secondary = "fail-load://rn1015k500".to_string();

    let err = App::start(&config, false).expect_err("load failure must abort startup");
    assert!(err.to_string().contains("fail-load://rn1015k500"));
}

type Outcome = (String, anyhow::Result<Observation>);

fn crossbeam_channel_pair() -> (
    crossbeam_channel::Sender<Outcome>,
    crossbeam_channel::Receiver<Outcome>,
) {
    crossbeam_channel::unbounded()
}

fn sender(
    tx: &crossbeam_channel::Sender<Outcome>,
    name: &str,
) -> impl Fn(anyhow::Result<Observation>) + Send + Sync + 'static {
    let tx = tx.clone();
    let name = name.to_string();
    move |outcome| {
        let _ = tx.send((name.clone(), outcome));
    }
}
