use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::capture::{CameraConfig, ResolutionPreset};
use crate::frame::{Orientation, PixelFormat};

const DEFAULT_DEVICE: &str = "stub://front_camera";
const DEFAULT_RESOLUTION: &str = "high";
const DEFAULT_PIXEL_FORMAT: &str = "bgra32";
const DEFAULT_ORIENTATION: &str = "portrait";
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_ENGINE: &str = "stub";
const DEFAULT_CLASSIFIER_PRIMARY: &str = "resnet50";
const DEFAULT_CLASSIFIER_SECONDARY: &str = "rn1015k500";
const DEFAULT_POSE_HOURGLASS: &str = "hourglass";
const DEFAULT_POSE_CPM: &str = "cpm";

#[derive(Debug, Deserialize, Default)]
struct CamwatchConfigFile {
    engine: Option<String>,
    camera: Option<CameraConfigFile>,
    models: Option<ModelsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    resolution: Option<String>,
    pixel_format: Option<String>,
    orientation: Option<String>,
    target_fps: Option<u32>,
    drop_late_frames: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelsConfigFile {
    classifier_primary: Option<String>,
    classifier_secondary: Option<String>,
    pose_hourglass: Option<String>,
    pose_cpm: Option<String>,
}

/// Which analysis engine backend to construct.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineKind {
    Stub,
    Tract,
}

/// The four pretrained model references. Names for the stub engine, file
/// paths for the tract engine.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub classifier_primary: String,
    pub classifier_secondary: String,
    pub pose_hourglass: String,
    pub pose_cpm: String,
}

#[derive(Debug, Clone)]
pub struct CamwatchConfig {
    pub engine: EngineKind,
    pub camera: CameraConfig,
    pub models: ModelSettings,
}

impl CamwatchConfig {
    /// Load from the file named by CAMWATCH_CONFIG (TOML, optional), then
    /// apply CAMWATCH_* environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CAMWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CamwatchConfigFile) -> Result<Self> {
        let engine = parse_engine(file.engine.as_deref().unwrap_or(DEFAULT_ENGINE))?;

        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraConfig {
            device: camera_file
                .device
                .unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            resolution: parse_resolution(
                camera_file.resolution.as_deref().unwrap_or(DEFAULT_RESOLUTION),
            )?,
            pixel_format: parse_pixel_format(
                camera_file
                    .pixel_format
                    .as_deref()
                    .unwrap_or(DEFAULT_PIXEL_FORMAT),
            )?,
            orientation: parse_orientation(
                camera_file
                    .orientation
                    .as_deref()
                    .unwrap_or(DEFAULT_ORIENTATION),
            )?,
            target_fps: camera_file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            drop_late_frames: camera_file.drop_late_frames.unwrap_or(true),
        };

        let models_file = file.models.unwrap_or_default();
        let models = ModelSettings {
            classifier_primary: models_file
                .classifier_primary
                .unwrap_or_else(|| DEFAULT_CLASSIFIER_PRIMARY.to_string()),
            classifier_secondary: models_file
                .classifier_secondary
                .unwrap_or_else(|| DEFAULT_CLASSIFIER_SECONDARY.to_string()),
            pose_hourglass: models_file
                .pose_hourglass
                .unwrap_or_else(|| DEFAULT_POSE_HOURGLASS.to_string()),
            pose_cpm: models_file
                .pose_cpm
                .unwrap_or_else(|| DEFAULT_POSE_CPM.to_string()),
        };

        Ok(Self {
            engine,
            camera,
            models,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("CAMWATCH_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(engine) = std::env::var("CAMWATCH_ENGINE") {
            if !engine.trim().is_empty() {
                self.engine = parse_engine(&engine)?;
            }
        }
        if let Ok(fps) = std::env::var("CAMWATCH_FPS") {
            let fps: u32 = fps
                .parse()
                .map_err(|_| anyhow!("CAMWATCH_FPS must be an integer frame rate"))?;
            self.camera.target_fps = fps;
        }
        if let Ok(resolution) = std::env::var("CAMWATCH_RESOLUTION") {
            if !resolution.trim().is_empty() {
                self.camera.resolution = parse_resolution(&resolution)?;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if self.camera.target_fps > 240 {
            return Err(anyhow!("target_fps {} is not plausible", self.camera.target_fps));
        }
        for (name, reference) in [
            ("classifier_primary", &self.models.classifier_primary),
            ("classifier_secondary", &self.models.classifier_secondary),
            ("pose_hourglass", &self.models.pose_hourglass),
            ("pose_cpm", &self.models.pose_cpm),
        ] {
            if reference.trim().is_empty() {
                return Err(anyhow!("model reference {} must not be empty", name));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<CamwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn parse_engine(value: &str) -> Result<EngineKind> {
    match value.to_ascii_lowercase().as_str() {
        "stub" => Ok(EngineKind::Stub),
        "tract" => Ok(EngineKind::Tract),
        other => Err(anyhow!("unknown engine '{}' (expected stub or tract)", other)),
    }
}

fn parse_resolution(value: &str) -> Result<ResolutionPreset> {
    match value.to_ascii_lowercase().as_str() {
        "high" => Ok(ResolutionPreset::High),
        "medium" => Ok(ResolutionPreset::Medium),
        "low" => Ok(ResolutionPreset::Low),
        other => Err(anyhow!(
            "unknown resolution preset '{}' (expected high, medium or low)",
            other
        )),
    }
}

fn parse_pixel_format(value: &str) -> Result<PixelFormat> {
    match value.to_ascii_lowercase().as_str() {
        "bgra32" => Ok(PixelFormat::Bgra32),
        "rgb24" => Ok(PixelFormat::Rgb24),
        other => Err(anyhow!(
            "unknown pixel format '{}' (expected bgra32 or rgb24)",
            other
        )),
    }
}

fn parse_orientation(value: &str) -> Result<Orientation> {
    match value.to_ascii_lowercase().as_str() {
        "portrait" => Ok(Orientation::Portrait),
        "landscape" => Ok(Orientation::Landscape),
        other => Err(anyhow!(
            "unknown orientation '{}' (expected portrait or landscape)",
            other
        )),
    }
}
