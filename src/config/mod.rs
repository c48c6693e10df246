//! Configuration management
//!
//! TOML-backed application configuration. Every section has sensible
//! defaults so a partial file (or no file at all) still yields a runnable
//! configuration; `validate()` rejects values that would misbehave at
//! runtime.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{VigilError, VigilResult};

/// Ring buffer and frame pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Seconds of pre-trigger video kept per camera
    pub preroll_seconds: u32,
    /// Nominal capture/record framerate
    pub fps: u32,
    /// Extra pooled frames beyond the ring capacity, for in-flight handles
    pub pool_headroom: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            preroll_seconds: 5,
            fps: 10,
            pool_headroom: 30,
        }
    }
}

impl BufferConfig {
    /// Effective framerate; zero falls back to 10
    pub fn effective_fps(&self) -> u32 {
        if self.fps == 0 {
            10
        } else {
            self.fps
        }
    }

    /// Ring capacity in frames; zero-sized configurations fall back to 75
    pub fn ring_capacity(&self) -> usize {
        let cap = (self.preroll_seconds * self.effective_fps()) as usize;
        if cap == 0 {
            75
        } else {
            cap
        }
    }

    /// Pool size: ring capacity plus headroom (headroom floor of 30)
    pub fn pool_capacity(&self) -> usize {
        self.ring_capacity() + self.pool_headroom.max(30)
    }
}

/// Object detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Path to the ONNX model file
    pub model_path: PathBuf,
    /// Global confidence threshold for detections
    pub confidence_threshold: f32,
    /// IoU threshold for per-class suppression
    pub iou_threshold: f32,
    /// Class allow-list; empty accepts all classes
    pub classes: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/yolov8n.onnx"),
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            classes: Vec::new(),
        }
    }
}

/// Output directories for event artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub events_dir: PathBuf,
    pub snapshots_dir: PathBuf,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            events_dir: PathBuf::from("events"),
            snapshots_dir: PathBuf::from("snapshots"),
        }
    }
}

/// MQTT broker connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub topic_prefix: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "127.0.0.1".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            topic_prefix: "vigil".to_string(),
        }
    }
}

/// Relational store location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("vigil.db"),
        }
    }
}

/// Vision-language model collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub enabled: bool,
    /// Base URL of the model server, e.g. http://127.0.0.1:11434
    pub endpoint: String,
    pub model: String,
    pub timeout_seconds: u64,
    /// `{max_words}` substitution value in prompt templates
    pub max_words: u32,
    /// Fallback prompt when no template matches the camera or "default"
    pub default_prompt: String,
    /// Per-camera prompt templates; key "default" applies to all cameras
    pub prompts: BTreeMap<String, String>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://127.0.0.1:11434".to_string(),
            model: "llava:7b".to_string(),
            timeout_seconds: 30,
            max_words: 25,
            default_prompt: "Describe the {class} in this security camera image \
                             in at most {max_words} words."
                .to_string(),
            prompts: BTreeMap::new(),
        }
    }
}

/// Address the (external) HTTP surface is reachable at; used only to build
/// absolute artifact URLs in published messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL override, e.g. "http://192.168.1.10:8080".
    /// Needed when `host` is a wildcard bind address.
    pub public_url: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            public_url: None,
        }
    }
}

impl ApiConfig {
    /// Base URL for snapshot/recording links in published payloads
    pub fn base_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }
}

/// Per-camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Display name
    pub name: String,
    /// Stream URL (rtsp:// for live cameras)
    pub url: String,
    pub enabled: bool,
    /// Camera-specific class allow-list; empty inherits [detection].classes
    pub classes: Vec<String>,
    /// Camera-specific confidence threshold; unset inherits the global one
    pub confidence_threshold: Option<f32>,
    /// Minimum best-detection confidence before the vision task is launched
    pub early_notify_confidence: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: String::new(),
            enabled: true,
            classes: Vec::new(),
            confidence_threshold: None,
            early_notify_confidence: 0.70,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub buffer: BufferConfig,
    pub detection: DetectionConfig,
    pub recording: RecordingConfig,
    pub mqtt: MqttConfig,
    pub database: DatabaseConfig,
    pub vision: VisionConfig,
    pub api: ApiConfig,
    pub cameras: BTreeMap<String, CameraConfig>,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> VigilResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| VigilError::ConfigRead(path.to_path_buf()))?;

        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> VigilResult<()> {
        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(VigilError::InvalidConfigValue {
                field: "detection.confidence_threshold".to_string(),
                value: self.detection.confidence_threshold.to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.detection.iou_threshold) {
            return Err(VigilError::InvalidConfigValue {
                field: "detection.iou_threshold".to_string(),
                value: self.detection.iou_threshold.to_string(),
            });
        }

        if self.buffer.fps > 120 {
            return Err(VigilError::InvalidConfigValue {
                field: "buffer.fps".to_string(),
                value: self.buffer.fps.to_string(),
            });
        }

        for (id, cam) in &self.cameras {
            if let Some(t) = cam.confidence_threshold {
                if !(0.0..=1.0).contains(&t) {
                    return Err(VigilError::InvalidConfigValue {
                        field: format!("cameras.{}.confidence_threshold", id),
                        value: t.to_string(),
                    });
                }
            }
            if cam.enabled && cam.url.is_empty() {
                return Err(VigilError::InvalidConfigValue {
                    field: format!("cameras.{}.url", id),
                    value: "<empty>".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Effective confidence threshold for a camera
    pub fn confidence_for(&self, camera_id: &str) -> f32 {
        self.cameras
            .get(camera_id)
            .and_then(|c| c.confidence_threshold)
            .unwrap_or(self.detection.confidence_threshold)
    }

    /// Effective class allow-list for a camera
    pub fn classes_for(&self, camera_id: &str) -> Vec<String> {
        match self.cameras.get(camera_id) {
            Some(c) if !c.classes.is_empty() => c.classes.clone(),
            _ => self.detection.classes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.buffer.fps, 10);
        assert_eq!(config.buffer.ring_capacity(), 50);
        assert_eq!(config.buffer.pool_capacity(), 80);
    }

    #[test]
    fn test_zero_fps_fallbacks() {
        let buffer = BufferConfig {
            preroll_seconds: 0,
            fps: 0,
            pool_headroom: 0,
        };
        assert_eq!(buffer.effective_fps(), 10);
        assert_eq!(buffer.ring_capacity(), 75);
        assert_eq!(buffer.pool_capacity(), 105);
    }

    #[test]
    fn test_invalid_confidence_threshold() {
        let mut config = AppConfig::default();
        config.detection.confidence_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(VigilError::InvalidConfigValue { .. })
        ));
    }

    #[test]
    fn test_enabled_camera_requires_url() {
        let mut config = AppConfig::default();
        config
            .cameras
            .insert("front".to_string(), CameraConfig::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[buffer]
preroll_seconds = 3
fps = 15

[detection]
confidence_threshold = 0.6

[cameras.patio]
name = "Patio"
url = "rtsp://10.0.0.5/stream1"
classes = ["person", "dog"]
confidence_threshold = 0.4
"#
        )
        .unwrap();

        let config = AppConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.buffer.ring_capacity(), 45);
        assert_eq!(config.confidence_for("patio"), 0.4);
        assert_eq!(config.confidence_for("unknown"), 0.6);
        assert_eq!(config.classes_for("patio"), vec!["person", "dog"]);
        assert!(config.classes_for("unknown").is_empty());
    }

    #[test]
    fn test_base_url() {
        let mut api = ApiConfig::default();
        assert_eq!(api.base_url(), "http://0.0.0.0:8080");
        api.public_url = Some("http://cam.local:8080/".to_string());
        assert_eq!(api.base_url(), "http://cam.local:8080");
    }
}
