//! Health snapshot for external surfaces
//!
//! The service is "degraded" when no camera is both connected and holding
//! frames, or when the message bus is down. Individual event failures do
//! not change the health state.

use serde::Serialize;

use crate::bus::MessageBus;
use crate::service::CameraService;

#[derive(Debug, Clone, Serialize)]
pub struct CameraHealth {
    pub camera_id: String,
    pub name: String,
    pub connected: bool,
    pub healthy: bool,
    pub buffer_size: usize,
    pub buffer_capacity: usize,
    pub frames_captured: u64,
    pub reconnect_count: u64,
    pub frame_width: u32,
    pub frame_height: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: String,
    pub bus_connected: bool,
    pub cameras: Vec<CameraHealth>,
}

/// Combine camera and bus state into one reportable snapshot
pub fn snapshot(service: &CameraService, bus: &dyn MessageBus) -> HealthSnapshot {
    let cameras: Vec<CameraHealth> = service
        .all_stats()
        .into_iter()
        .map(|s| CameraHealth {
            camera_id: s.camera_id,
            name: s.camera_name,
            connected: s.capture.connected,
            healthy: s.healthy,
            buffer_size: s.buffer_size,
            buffer_capacity: s.buffer_capacity,
            frames_captured: s.capture.frames_captured,
            reconnect_count: s.capture.reconnect_count,
            frame_width: s.capture.width,
            frame_height: s.capture.height,
        })
        .collect();

    let bus_connected = bus.is_connected();
    let any_camera_healthy = cameras.iter().any(|c| c.healthy);
    let status = if any_camera_healthy && bus_connected {
        "ok"
    } else {
        "degraded"
    };

    HealthSnapshot {
        status: status.to_string(),
        bus_connected,
        cameras,
    }
}
