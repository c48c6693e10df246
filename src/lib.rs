//! Vigil — event-driven security camera detection core
//!
//! Continuously decodes camera streams into per-camera ring buffers and,
//! on motion triggers from the message bus, runs the detection pipeline:
//! pre-roll-extended MP4 recording, annotated snapshot, vision-language
//! scene description, and structured event records published over the bus
//! and persisted to the store.

pub mod bus;
pub mod capture;
pub mod config;
pub mod detect;
pub mod error;
pub mod event;
pub mod frame;
pub mod health;
pub mod record;
pub mod ring;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod vision;

// Re-export commonly used types
pub use bus::{MessageBus, MqttBus};
pub use config::AppConfig;
pub use detect::{Detection, DetectionEngine, COCO_CLASSES};
pub use error::{VigilError, VigilResult};
pub use event::EventOrchestrator;
pub use frame::{Frame, FramePool, PooledFrame};
pub use record::EventRecorder;
pub use ring::RingBuffer;
pub use service::CameraService;
pub use store::EventStore;
pub use vision::{VisionClient, VisionResult};

/// Current version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
