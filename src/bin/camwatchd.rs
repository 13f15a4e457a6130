//! camwatchd - live camera analysis daemon
//!
//! This daemon:
//! 1. Loads configuration from CAMWATCH_CONFIG and CAMWATCH_* overrides
//! 2. Starts the capture session against the configured device
//! 3. Submits every delivered frame to the fixed analysis request set
//! 4. Prints label updates from the primary classifier to stdout
//! 5. Logs session health on a fixed cadence until interrupted

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use camwatch::{App, CamwatchConfig};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = CamwatchConfig::load().context("failed to load configuration")?;
    log::info!(
        "camwatchd {} starting: device={} engine={:?} fps={}",
        env!("CARGO_PKG_VERSION"),
        config.camera.device,
        config.engine,
        config.camera.target_fps
    );

    // A model that cannot be loaded is fatal here, before any capture starts.
    let mut app = App::start(&config, true).context("failed to start pipeline")?;

    let running = Arc::new(AtomicBool::new(true));
    let ctrlc_running = running.clone();
    ctrlc::set_handler(move || {
        ctrlc_running.store(false, Ordering::SeqCst);
    })
    .context("failed to install signal handler")?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_secs(5));
        let session = app.session_stats();
        let dispatch = app.dispatch_stats();
        log::info!(
            "health={} captured={} delivered={} dropped={} submitted={} rejected={} label_updates={}",
            app.is_healthy(),
            session.captured,
            session.delivered,
            session.dropped,
            dispatch.submitted,
            dispatch.rejected,
            app.label_updates()
        );
    }

    log::info!("shutting down");
    app.shutdown();

    let session = app.session_stats();
    log::info!(
        "final: captured={} delivered={} dropped={} label_updates={}",
        session.captured,
        session.delivered,
        session.dropped,
        app.label_updates()
    );
    Ok(())
}
