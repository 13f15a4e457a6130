//! Capture session: the capture thread and the delivery thread.
//!
//! One dedicated thread pulls frames from the device at its native pace and
//! publishes them into the session's `FrameSlot`. A second dedicated thread
//! takes frames from the slot and hands each one to the single registered
//! consumer. The slot is latest-wins, so a consumer that falls behind sees
//! frames dropped rather than a growing queue.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::capture::camera::CameraSource;
use crate::frame::{Frame, FrameSlot};

/// The single consumer registered with a capture session.
///
/// `handle_frame` runs on the delivery thread, never concurrently with
/// itself. The frame does not outlive the call; implementations copy what
/// they need for asynchronous work.
pub trait FrameConsumer: Send + Sync {
    fn handle_frame(&self, frame: &Frame);
}

/// Counters reported by the session health loop.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionStats {
    pub captured: u64,
    pub delivered: u64,
    pub dropped: u64,
}

/// A running capture session. Stops and joins its threads on drop.
pub struct CaptureSession {
    slot: Arc<FrameSlot>,
    running: Arc<AtomicBool>,
    captured: Arc<AtomicU64>,
    delivered: Arc<AtomicU64>,
    healthy: Arc<AtomicBool>,
    device: String,
    capture_thread: Option<JoinHandle<()>>,
    delivery_thread: Option<JoinHandle<()>>,
}

impl CaptureSession {
    /// Open the source and start the capture and delivery threads.
    ///
    /// A device or input that cannot be opened is a fatal startup condition;
    /// the error is returned and no threads are spawned.
    pub fn start(mut source: CameraSource, consumer: Arc<dyn FrameConsumer>) -> Result<Self> {
        source.connect()?;

        let config = source.config().clone();
        if !config.drop_late_frames {
            // The slot has no queueing mode; the flag only exists so config
            // files can state the capture contract explicitly.
            log::warn!("drop_late_frames=false is ignored; late frames are always dropped");
        }

        let slot = Arc::new(FrameSlot::new());
        let running = Arc::new(AtomicBool::new(true));
        let captured = Arc::new(AtomicU64::new(0));
        let delivered = Arc::new(AtomicU64::new(0));
        let healthy = Arc::new(AtomicBool::new(true));

        let interval = if config.target_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(1000 / config.target_fps as u64)
        };

        let capture_slot = slot.clone();
        let capture_running = running.clone();
        let capture_count = captured.clone();
        let capture_healthy = healthy.clone();
        let capture_thread = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                while capture_running.load(Ordering::Acquire) {
                    match source.next_frame() {
                        Ok(frame) => {
                            capture_count.fetch_add(1, Ordering::Relaxed);
                            capture_healthy.store(source.is_healthy(), Ordering::Release);
                            if !capture_slot.publish(frame) {
                                break;
                            }
                        }
                        Err(e) => {
                            log::warn!("capture error: {:#}", e);
                            capture_healthy.store(false, Ordering::Release);
                            std::thread::sleep(Duration::from_millis(10));
                        }
                    }
                    if !interval.is_zero() {
                        std::thread::sleep(interval);
                    }
                }
                capture_slot.close();
                log::info!("capture thread stopped");
            })
            .context("spawn capture thread")?;

        let delivery_slot = slot.clone();
        let delivery_count = delivered.clone();
        let delivery_thread = std::thread::Builder::new()
            .name("frame-delivery".to_string())
            .spawn(move || {
                // Sequential by construction: the next frame is not taken
                // until the consumer returns.
                while let Some(frame) = delivery_slot.recv() {
                    consumer.handle_frame(&frame);
                    delivery_count.fetch_add(1, Ordering::Relaxed);
                }
                log::info!("delivery thread stopped");
            })
            .context("spawn delivery thread")?;

        Ok(Self {
            slot,
            running,
            captured,
            delivered,
            healthy,
            device: config.device,
            capture_thread: Some(capture_thread),
            delivery_thread: Some(delivery_thread),
        })
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            captured: self.captured.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.slot.stats().dropped,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Stop both threads and wait for them to finish.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.slot.close();
        if let Some(handle) = self.capture_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.delivery_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::camera::{CameraConfig, ResolutionPreset};
    use std::time::Instant;

    struct CountingConsumer {
        seen: AtomicU64,
        delay: Duration,
    }

    impl FrameConsumer for CountingConsumer {
        fn handle_frame(&self, _frame: &Frame) {
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            self.seen.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn stub_source(fps: u32) -> CameraSource {
        CameraSource::new(CameraConfig {
            device: "stub://session_test".to_string(),
            resolution: ResolutionPreset::Low,
            target_fps: fps,
            ..CameraConfig::default()
        })
        .expect("stub source")
    }

    fn wait_until(deadline_ms: u64, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while !done() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn session_delivers_frames_to_consumer() -> Result<()> {
        let consumer = Arc::new(CountingConsumer {
            seen: AtomicU64::new(0),
            delay: Duration::ZERO,
        });
        let mut session = CaptureSession::start(stub_source(100), consumer.clone())?;

        wait_until(2_000, || consumer.seen.load(Ordering::Relaxed) >= 3);
        session.stop();

        let stats = session.stats();
        assert!(stats.delivered >= 3, "delivered {}", stats.delivered);
        assert_eq!(consumer.seen.load(Ordering::Relaxed), stats.delivered);
        Ok(())
    }

    #[test]
    fn deliveries_never_exceed_captures() -> Result<()> {
        let consumer = Arc::new(CountingConsumer {
            seen: AtomicU64::new(0),
            delay: Duration::from_millis(15),
        });
        let mut session = CaptureSession::start(stub_source(200), consumer.clone())?;

        wait_until(2_000, || consumer.seen.load(Ordering::Relaxed) >= 5);
        session.stop();

        let stats = session.stats();
        assert!(stats.delivered <= stats.captured);
        Ok(())
    }

    #[test]
    fn slow_consumer_drops_frames_instead_of_queueing() -> Result<()> {
        let consumer = Arc::new(CountingConsumer {
            seen: AtomicU64::new(0),
            delay: Duration::from_millis(40),
        });
        // Capture far faster than the consumer drains.
        let mut session = CaptureSession::start(stub_source(0), consumer.clone())?;

        wait_until(2_000, || session.stats().dropped > 0);
        session.stop();

        let stats = session.stats();
        assert!(stats.dropped > 0, "expected drops, got {:?}", stats);
        assert!(stats.delivered <= stats.captured);
        Ok(())
    }
}
