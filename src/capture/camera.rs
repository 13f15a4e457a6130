//! Camera frame source.
//!
//! `CameraSource` owns one capture device and one logical video output. It is
//! responsible for:
//! - Opening the device and negotiating the configured format
//! - Producing `Frame` instances with sequence numbers and orientation
//! - Reporting health and capture statistics
//!
//! Real devices are read through V4L2 (feature: capture-v4l2). `stub://`
//! device paths select a synthetic backend that generates a slowly changing
//! test scene, used by tests and the demo binary.

use anyhow::Result;
#[cfg(feature = "capture-v4l2")]
use anyhow::Context;
#[cfg(feature = "capture-v4l2")]
use ouroboros::self_referencing;
#[cfg(feature = "capture-v4l2")]
use std::time::{Duration, Instant};

use crate::frame::{CameraIntrinsics, Frame, Orientation, PixelFormat};

/// Capture resolution preset, resolved to concrete dimensions at startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResolutionPreset {
    /// 1280x720, the session default.
    #[default]
    High,
    /// 640x480.
    Medium,
    /// 320x240.
    Low,
}

impl ResolutionPreset {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            ResolutionPreset::High => (1280, 720),
            ResolutionPreset::Medium => (640, 480),
            ResolutionPreset::Low => (320, 240),
        }
    }
}

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g. "/dev/video0") or "stub://name" for the synthetic
    /// backend.
    pub device: String,
    pub resolution: ResolutionPreset,
    pub pixel_format: PixelFormat,
    pub orientation: Orientation,
    /// Target frame rate. The session paces capture to this rate.
    pub target_fps: u32,
    /// Late frames are always discarded; false is accepted but ignored
    /// because the delivery slot never queues.
    pub drop_late_frames: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "stub://front_camera".to_string(),
            resolution: ResolutionPreset::High,
            pixel_format: PixelFormat::Bgra32,
            orientation: Orientation::Portrait,
            target_fps: 30,
            drop_late_frames: true,
        }
    }
}

/// Camera frame source.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCameraSource),
    #[cfg(feature = "capture-v4l2")]
    V4l2(V4l2CameraSource),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.device.starts_with("stub://") {
            Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCameraSource::new(config)),
            })
        } else {
            #[cfg(feature = "capture-v4l2")]
            {
                Ok(Self {
                    backend: CameraBackend::V4l2(V4l2CameraSource::new(config)?),
                })
            }
            #[cfg(not(feature = "capture-v4l2"))]
            {
                anyhow::bail!("device capture requires the capture-v4l2 feature")
            }
        }
    }

    /// Open the device and the video input. Fatal on failure; no retry.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::V4l2(source) => source.connect(),
        }
    }

    /// Capture the next frame at the device's native pace.
    pub fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::V4l2(source) => source.next_frame(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.is_healthy(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::V4l2(source) => source.is_healthy(),
        }
    }

    pub fn stats(&self) -> CameraStats {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::V4l2(source) => source.stats(),
        }
    }

    pub fn config(&self) -> &CameraConfig {
        match &self.backend {
            CameraBackend::Synthetic(source) => &source.config,
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::V4l2(source) => &source.config,
        }
    }
}

/// Statistics for a camera source.
#[derive(Clone, Debug)]
pub struct CameraStats {
    pub frames_captured: u64,
    pub device: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests and the demo
// ----------------------------------------------------------------------------

struct SyntheticCameraSource {
    config: CameraConfig,
    width: u32,
    height: u32,
    sequence: u64,
    /// Simulated scene state; bumps periodically so classifiers see change.
    scene_state: u8,
}

impl SyntheticCameraSource {
    fn new(config: CameraConfig) -> Self {
        let (width, height) = config.resolution.dimensions();
        // Portrait sessions report swapped dimensions, like a rotated
        // capture connection would.
        let (width, height) = match config.orientation {
            Orientation::Portrait => (height, width),
            Orientation::Landscape => (width, height),
        };
        Self {
            config,
            width,
            height,
            sequence: 0,
            scene_state: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        log::info!(
            "CameraSource: opened {} (synthetic, {}x{} {:?})",
            self.config.device,
            self.width,
            self.height,
            self.config.pixel_format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.sequence += 1;
        let data = self.generate_scene_pixels();

        Ok(Frame {
            data,
            width: self.width,
            height: self.height,
            pixel_format: self.config.pixel_format,
            orientation: self.config.orientation,
            sequence: self.sequence,
            intrinsics: Some(CameraIntrinsics {
                fx: self.width as f32,
                fy: self.width as f32,
                cx: self.width as f32 / 2.0,
                cy: self.height as f32 / 2.0,
            }),
        })
    }

    /// Generate a deterministic gradient scene with per-frame sensor noise.
    /// The scene shifts every 50 frames so downstream requests see change.
    fn generate_scene_pixels(&mut self) -> Vec<u8> {
        let pixel_count =
            self.width as usize * self.height as usize * self.config.pixel_format.bytes_per_pixel();

        if self.sequence % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let noise: u8 = rand::random::<u8>() & 0x07;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.sequence + self.scene_state as u64 + noise as u64) % 256)
                as u8;
        }
        pixels
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.sequence,
            device: self.config.device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// V4L2 device source
// ----------------------------------------------------------------------------

#[cfg(feature = "capture-v4l2")]
struct V4l2CameraSource {
    config: CameraConfig,
    state: Option<V4l2State>,
    sequence: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
    active_format: PixelFormat,
}

#[cfg(feature = "capture-v4l2")]
#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "capture-v4l2")]
impl V4l2CameraSource {
    fn new(config: CameraConfig) -> Result<Self> {
        let (width, height) = config.resolution.dimensions();
        Ok(Self {
            active_width: width,
            active_height: height,
            active_format: config.pixel_format,
            config,
            state: None,
            sequence: 0,
            last_frame_at: None,
            last_error: None,
        })
    }

    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open capture device {}", self.config.device))?;

        let (width, height) = self.config.resolution.dimensions();
        let mut format = device.format().context("read device format")?;
        format.width = width;
        format.height = height;
        format.fourcc = match self.config.pixel_format {
            PixelFormat::Bgra32 => v4l::FourCC::new(b"BA24"),
            PixelFormat::Rgb24 => v4l::FourCC::new(b"RGB3"),
        };

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "CameraSource: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device.format().context("read format after set failure")?
            }
        };

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "CameraSource: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.active_format = if &format.fourcc.repr == b"BA24" {
            PixelFormat::Bgra32
        } else {
            PixelFormat::Rgb24
        };
        self.last_error = None;

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create capture stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "CameraSource: opened {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.active_format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("capture device not opened")?;
        let (buf, _meta) = state
            .with_mut(|fields| fields.stream.next())
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(err).context("capture frame")
            })?;

        self.sequence += 1;
        self.last_frame_at = Some(Instant::now());

        Ok(Frame {
            data: buf.to_vec(),
            width: self.active_width,
            height: self.active_height,
            pixel_format: self.active_format,
            orientation: self.config.orientation,
            sequence: self.sequence,
            // V4L2 does not expose intrinsics.
            intrinsics: None,
        })
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.sequence,
            device: self.config.device.clone(),
        }
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
