//! Camera service
//!
//! Wires one frame pool, ring buffer and capture per enabled camera, owns
//! the shared detection engine, and exposes the frame/stat accessors other
//! subsystems consume.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::capture::{Capture, CaptureStats};
use crate::config::{AppConfig, CameraConfig};
use crate::detect::DetectionEngine;
use crate::frame::{FramePool, PooledFrame};
use crate::ring::RingBuffer;

/// Process-lifetime state for one camera
pub struct CameraEntry {
    pub name: String,
    pub config: CameraConfig,
    pub pool: Arc<FramePool>,
    pub ring: Arc<RingBuffer>,
    pub capture: Capture,
}

/// Per-camera stats combined with buffer occupancy
#[derive(Debug, Clone)]
pub struct CameraStats {
    pub camera_id: String,
    pub camera_name: String,
    pub buffer_size: usize,
    pub buffer_capacity: usize,
    pub capture: CaptureStats,
    pub healthy: bool,
}

/// Owns capture pipelines and ring buffers for all configured cameras
pub struct CameraService {
    cameras: HashMap<String, CameraEntry>,
    engine: Option<Arc<DetectionEngine>>,
}

impl CameraService {
    pub fn new(config: &AppConfig) -> Self {
        let mut cameras = HashMap::new();

        for (id, cam_cfg) in &config.cameras {
            if !cam_cfg.enabled {
                info!("[{}] Camera disabled, skipping", id);
                continue;
            }

            let ring_capacity = config.buffer.ring_capacity();
            let pool_capacity = config.buffer.pool_capacity();

            let pool = Arc::new(FramePool::new(pool_capacity));
            let ring = Arc::new(RingBuffer::new(ring_capacity));
            let capture = Capture::new(
                id.clone(),
                cam_cfg.url.clone(),
                Arc::clone(&pool),
                Arc::clone(&ring),
            );

            info!(
                "[{}] Configured: pool={}, buffer={}",
                id, pool_capacity, ring_capacity
            );

            cameras.insert(
                id.clone(),
                CameraEntry {
                    name: cam_cfg.name.clone(),
                    config: cam_cfg.clone(),
                    pool,
                    ring,
                    capture,
                },
            );
        }

        Self {
            cameras,
            engine: None,
        }
    }

    /// Load the shared detection model. A missing model leaves detection
    /// disabled; events still record.
    pub fn load_detection_model(&mut self, config: &AppConfig) {
        let path = &config.detection.model_path;
        if !path.exists() {
            warn!(
                "Detection model not found at '{}', detection disabled",
                path.display()
            );
            return;
        }

        let engine = DetectionEngine::new(path);
        if engine.is_loaded() {
            self.engine = Some(Arc::new(engine));
            info!("Detection enabled with model '{}'", path.display());
        }
    }

    pub fn engine(&self) -> Option<Arc<DetectionEngine>> {
        self.engine.clone()
    }

    pub fn start_all(&self) {
        info!("Starting capture for {} camera(s)", self.cameras.len());
        for entry in self.cameras.values() {
            entry.capture.start();
        }
    }

    pub fn stop_all(&self) {
        info!("Stopping all captures");
        for entry in self.cameras.values() {
            entry.capture.stop();
        }
    }

    pub fn camera(&self, camera_id: &str) -> Option<&CameraEntry> {
        self.cameras.get(camera_id)
    }

    pub fn ring(&self, camera_id: &str) -> Option<Arc<RingBuffer>> {
        self.cameras.get(camera_id).map(|c| Arc::clone(&c.ring))
    }

    pub fn latest_frame(&self, camera_id: &str) -> Option<Arc<PooledFrame>> {
        self.cameras.get(camera_id).and_then(|c| c.ring.latest())
    }

    pub fn camera_ids(&self) -> Vec<String> {
        self.cameras.keys().cloned().collect()
    }

    pub fn all_stats(&self) -> Vec<CameraStats> {
        self.cameras
            .iter()
            .map(|(id, entry)| {
                let capture = entry.capture.stats();
                let buffer_size = entry.ring.len();
                CameraStats {
                    camera_id: id.clone(),
                    camera_name: entry.name.clone(),
                    buffer_size,
                    buffer_capacity: entry.ring.capacity(),
                    healthy: capture.connected && buffer_size > 0,
                    capture,
                }
            })
            .collect()
    }

    /// True when at least one camera is connected and has buffered frames
    pub fn is_healthy(&self) -> bool {
        self.cameras.values().any(|entry| {
            entry.capture.stats().connected && !entry.ring.is_empty()
        })
    }
}
