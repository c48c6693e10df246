//! Event orchestration
//!
//! The per-camera state machine driven by motion triggers on the bus. A
//! motion start spawns one event thread that drains the pre-roll, records,
//! samples detections, raises the early notification, finalizes the
//! recording, writes the snapshot and publishes/persists the results.
//! Collaborator failures (bus, store, vision) are logged and never abort
//! the event.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::SecondsFormat;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::bus::MessageBus;
use crate::config::AppConfig;
use crate::detect::{Detection, DetectionEngine};
use crate::frame::Frame;
use crate::record::EventRecorder;
use crate::ring::RingBuffer;
use crate::service::CameraService;
use crate::snapshot;
use crate::store::{AiContextRecord, EventStore};
use crate::vision::{VisionClient, VisionResult};

const MOTION_START_TOPIC: &str = "camera/event/motion/start";
const MOTION_STOP_TOPIC: &str = "camera/event/motion/stop";

/// Run detection on every N-th recorded frame
const DETECTION_SAMPLE_INTERVAL: u32 = 3;

const DEFAULT_POST_ROLL_SECS: u64 = 5;

struct ActiveEvent {
    event_id: String,
    stop_requested: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Mutable state accumulated over one event's live and post-roll phases
#[derive(Default)]
struct EventState {
    all_detections: Vec<Detection>,
    best_confidence: f32,
    /// Owned copy of the frame behind the best detection; never a pool ref
    best_frame: Option<Frame>,
    /// Detection list of the best frame
    best_detections: Vec<Detection>,
    /// One-shot latch for the early notification
    early_sent: bool,
    early_snapshot: Option<PathBuf>,
    vision_handle: Option<JoinHandle<VisionResult>>,
    inference_count: u32,
}

/// Orchestrates motion-triggered detection events across all cameras
pub struct EventOrchestrator {
    service: Arc<CameraService>,
    bus: Arc<dyn MessageBus>,
    store: Option<Arc<EventStore>>,
    config: AppConfig,
    running: AtomicBool,
    active: Mutex<HashMap<String, ActiveEvent>>,
    orphans: Mutex<Vec<JoinHandle<()>>>,
}

impl EventOrchestrator {
    pub fn new(
        service: Arc<CameraService>,
        bus: Arc<dyn MessageBus>,
        store: Option<Arc<EventStore>>,
        config: AppConfig,
    ) -> Self {
        Self {
            service,
            bus,
            store,
            config,
            running: AtomicBool::new(false),
            active: Mutex::new(HashMap::new()),
            orphans: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to the motion trigger topics
    pub fn start(this: &Arc<Self>) {
        this.running.store(true, Ordering::SeqCst);

        let weak = Arc::downgrade(this);
        this.bus.subscribe(
            &[
                MOTION_START_TOPIC.to_string(),
                MOTION_STOP_TOPIC.to_string(),
            ],
            Box::new(move |topic, payload| {
                let Some(orchestrator) = weak.upgrade() else {
                    return;
                };
                if !orchestrator.running.load(Ordering::SeqCst) {
                    return;
                }
                Self::handle_trigger(&orchestrator, topic, payload);
            }),
        );

        info!("Event orchestrator started, listening for motion events");
    }

    /// Signal every active event to abort and wait for them to drain
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        let mut handles = Vec::new();
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            for event in active.values_mut() {
                event.stop_requested.store(true, Ordering::SeqCst);
                if let Some(handle) = event.handle.take() {
                    handles.push(handle);
                }
            }
            active.clear();
        }
        {
            let mut orphans = self.orphans.lock().unwrap_or_else(|e| e.into_inner());
            handles.append(&mut orphans);
        }

        for handle in handles {
            let _ = handle.join();
        }
        info!("Event orchestrator stopped");
    }

    pub fn active_event_count(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn handle_trigger(this: &Arc<Self>, topic: &str, payload: &str) {
        let parsed: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!("Invalid trigger payload on {}: {}", topic, e);
                return;
            }
        };

        let Some(camera_id) = parsed
            .get("camera_id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
        else {
            warn!("Trigger with no camera_id on {}", topic);
            return;
        };

        match topic {
            MOTION_START_TOPIC => {
                let post_roll = parsed
                    .get("post_roll_seconds")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(DEFAULT_POST_ROLL_SECS);
                Self::on_motion_start(this, camera_id, post_roll);
            }
            MOTION_STOP_TOPIC => this.on_motion_stop(camera_id),
            _ => {}
        }
    }

    fn on_motion_start(this: &Arc<Self>, camera_id: &str, post_roll_seconds: u64) {
        if this.service.camera(camera_id).is_none() {
            warn!("Motion start for unknown camera {}", camera_id);
            return;
        }

        this.reap_orphans();

        let mut active = this.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = active.get(camera_id) {
            info!(
                "Ignoring motion start for {} (event {} already active)",
                camera_id, existing.event_id
            );
            return;
        }

        let event_id = generate_event_id();
        let stop_requested = Arc::new(AtomicBool::new(false));

        let orchestrator = Arc::clone(this);
        let cam = camera_id.to_string();
        let eid = event_id.clone();
        let stop = Arc::clone(&stop_requested);
        let handle = std::thread::Builder::new()
            .name(format!("event-{}", camera_id))
            .spawn(move || {
                orchestrator.process_event(&cam, post_roll_seconds, &eid, &stop);
                orchestrator.finish_event(&cam);
            });

        match handle {
            Ok(handle) => {
                active.insert(
                    camera_id.to_string(),
                    ActiveEvent {
                        event_id,
                        stop_requested,
                        handle: Some(handle),
                    },
                );
                info!("Motion start for {}", camera_id);
            }
            Err(e) => error!("Failed to spawn event thread for {}: {}", camera_id, e),
        }
    }

    fn on_motion_stop(&self, camera_id: &str) {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(event) = active.get(camera_id) {
            event.stop_requested.store(true, Ordering::SeqCst);
            info!("Motion stop for {}", camera_id);
        }
    }

    /// Remove a completed event and park its thread handle for later reaping
    fn finish_event(&self, camera_id: &str) {
        let handle = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.remove(camera_id).and_then(|mut ev| ev.handle.take())
        };
        if let Some(handle) = handle {
            self.orphans
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(handle);
        }
    }

    /// Join finished orphan threads, detach the rest. Every external call
    /// inside an event is time-bounded, so detaching is safe.
    fn reap_orphans(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut orphans = self.orphans.lock().unwrap_or_else(|e| e.into_inner());
            orphans.drain(..).collect()
        };
        for handle in handles {
            if handle.is_finished() {
                let _ = handle.join();
            }
            // Unfinished handles are dropped, which detaches the thread.
        }
    }

    fn process_event(
        &self,
        camera_id: &str,
        post_roll_seconds: u64,
        event_id: &str,
        stop: &AtomicBool,
    ) {
        let prefix = self.bus.prefix().to_string();
        info!("Processing event {} for {}", event_id, camera_id);

        self.publish_json(
            &format!("{}/{}/detection", prefix, camera_id),
            &json!({
                "status": "started",
                "timestamp": now_iso8601(),
                "camera_id": camera_id,
            }),
        );

        let Some(ring) = self.service.ring(camera_id) else {
            error!("No ring buffer for camera {}", camera_id);
            return;
        };
        let engine = self.service.engine();

        // Pre-roll: deep-copy pixels and release the pooled handles at
        // once. Holding ring snapshots across the event would starve the
        // capture thread's pool.
        let preroll = drain_preroll(&ring);
        info!("{} preroll frames for {}", preroll.len(), camera_id);

        let (mut width, mut height) = preroll
            .iter()
            .find(|f| f.width > 0)
            .map(|f| (f.width, f.height))
            .unwrap_or((0, 0));
        if width == 0 {
            if let Some(latest) = ring.latest() {
                width = latest.width;
                height = latest.height;
            }
        }
        if width == 0 {
            error!("No frames available for {}", camera_id);
            return;
        }

        let fps = self.config.buffer.effective_fps();
        let mut recorder = EventRecorder::new();
        if let Err(e) = recorder.start(
            camera_id,
            &preroll,
            width,
            height,
            fps,
            &self.config.recording.events_dir,
        ) {
            error!("Failed to start recorder for {}: {}", camera_id, e);
            return;
        }
        drop(preroll);

        let conf_threshold = self.config.confidence_for(camera_id);
        let iou_threshold = self.config.detection.iou_threshold;
        let filter_classes = self.config.classes_for(camera_id);

        let started = Instant::now();
        let frame_interval = Duration::from_millis(1000 / fps as u64);
        let mut state = EventState::default();
        let mut frames_since_detection = 0u32;

        info!("[{}] Live phase started", camera_id);

        while !stop.load(Ordering::SeqCst) && !recorder.is_max_duration_reached() {
            let Some(frame) = ring.latest() else {
                std::thread::sleep(Duration::from_millis(30));
                continue;
            };
            if frame.width != width {
                drop(frame);
                std::thread::sleep(Duration::from_millis(30));
                continue;
            }

            if let Err(e) = recorder.write(&frame) {
                warn!("[{}] Recorder write failed: {}", camera_id, e);
            }

            frames_since_detection += 1;
            if let Some(engine) = engine.as_deref() {
                if frames_since_detection >= DETECTION_SAMPLE_INTERVAL {
                    frames_since_detection = 0;
                    self.sample_frame(
                        &mut state,
                        engine,
                        &frame,
                        conf_threshold,
                        iou_threshold,
                        &filter_classes,
                        camera_id,
                        started,
                    );
                }
            }

            // Release the pool ref before sleeping.
            drop(frame);
            std::thread::sleep(frame_interval);
        }

        info!(
            "[{}] Post-roll started ({}s), {} inferences so far, {} detections",
            camera_id,
            post_roll_seconds,
            state.inference_count,
            state.all_detections.len()
        );
        recorder.request_stop(post_roll_seconds);

        while !stop.load(Ordering::SeqCst)
            && !recorder.post_roll_complete()
            && !recorder.is_max_duration_reached()
        {
            if let Some(frame) = ring.latest() {
                if frame.width == width {
                    if let Err(e) = recorder.write(&frame) {
                        warn!("[{}] Recorder write failed: {}", camera_id, e);
                    }

                    frames_since_detection += 1;
                    if let Some(engine) = engine.as_deref() {
                        if frames_since_detection >= DETECTION_SAMPLE_INTERVAL {
                            frames_since_detection = 0;
                            self.sample_frame(
                                &mut state,
                                engine,
                                &frame,
                                conf_threshold,
                                iou_threshold,
                                &filter_classes,
                                camera_id,
                                started,
                            );
                        }
                    }
                }
                drop(frame);
            }
            std::thread::sleep(frame_interval);
        }

        if let Err(e) = recorder.finalize() {
            error!("[{}] Recorder finalize failed: {}", camera_id, e);
        }

        // The early snapshot is the event snapshot; save a final one only
        // when no early one exists.
        let mut snapshot_path = state.early_snapshot.clone();
        if snapshot_path.is_none() && !state.best_detections.is_empty() {
            if let Some(frame) = &state.best_frame {
                match snapshot::save(
                    frame,
                    &state.best_detections,
                    camera_id,
                    &self.config.recording.snapshots_dir,
                ) {
                    Ok(path) => snapshot_path = Some(path),
                    Err(e) => error!("[{}] Snapshot failed: {}", camera_id, e),
                }
            }
        }

        let duration_seconds = started.elapsed().as_secs_f64();
        let unique = dedup_by_class(&state.all_detections);

        let mut class_counts: HashMap<String, usize> = HashMap::new();
        for det in &state.all_detections {
            *class_counts.entry(det.class_name.clone()).or_default() += 1;
        }
        let unique_classes: Vec<String> = class_counts.keys().cloned().collect();
        let message = detection_message(&unique_classes);

        let base_url = self.config.api.base_url();
        let snapshot_filename = snapshot_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let recording_filename = recorder.file_name();

        let dets_json: Vec<Value> = unique
            .values()
            .map(|d| {
                json!({
                    "class": d.class_name,
                    "class_id": d.class_id,
                    "confidence": round3(d.confidence),
                    "bbox": {
                        "x1": d.x1 as i64,
                        "y1": d.y1 as i64,
                        "x2": d.x2 as i64,
                        "y2": d.y2 as i64,
                    },
                })
            })
            .collect();

        let result_msg = json!({
            "camera_id": camera_id,
            "timestamp": now_iso8601(),
            "detections": dets_json,
            "detection_count": state.all_detections.len(),
            "unique_classes": unique_classes,
            "class_counts": class_counts,
            "detected_objects": message,
            "detection_message": message,
            "frames_processed": recorder.frames_written(),
            "processing_time_seconds": round2(duration_seconds),
            "snapshot_url": url_or_null(&base_url, "snapshots", &snapshot_filename),
            "recording_url": url_or_null(&base_url, "events", &recording_filename),
            "recording_filename": recording_filename,
            "phase": "final",
        });
        self.publish_json(&format!("{}/{}/result", prefix, camera_id), &result_msg);

        if !state.early_sent {
            let detected = if state.all_detections.is_empty() { "OFF" } else { "ON" };
            self.bus
                .publish(&format!("{}/{}/detected", prefix, camera_id), detected, 0, false);
        }

        self.publish_json(
            &format!("{}/{}/detection", prefix, camera_id),
            &json!({
                "status": "completed",
                "timestamp": now_iso8601(),
                "camera_id": camera_id,
            }),
        );

        // Reset the binary state a moment after the final result.
        if !state.all_detections.is_empty() {
            std::thread::sleep(Duration::from_secs(2));
            self.bus
                .publish(&format!("{}/{}/detected", prefix, camera_id), "OFF", 0, false);
        }

        if let Some(store) = &self.store {
            let unique_vec: Vec<Detection> = unique.values().cloned().collect();
            if let Err(e) =
                store.create_event(event_id, camera_id, &recording_filename, &snapshot_filename)
            {
                error!("Store create_event failed for {}: {}", camera_id, e);
            }
            if let Err(e) = store.log_detections(event_id, &unique_vec) {
                error!("Store log_detections failed for {}: {}", camera_id, e);
            }
            if let Err(e) = store.complete_event(
                event_id,
                duration_seconds,
                recorder.frames_written(),
                state.all_detections.len(),
            ) {
                error!("Store complete_event failed for {}: {}", camera_id, e);
            }
        }

        self.finish_vision(
            &mut state,
            camera_id,
            event_id,
            &unique_classes,
            &base_url,
            &recording_filename,
            &snapshot_filename,
            snapshot_path.as_deref(),
        );

        info!(
            "Event {} completed for {} ({:.1}s, {} frames, {} detections)",
            event_id,
            camera_id,
            duration_seconds,
            recorder.frames_written(),
            state.all_detections.len()
        );
    }

    /// Run one detection pass and fold the results into the event state
    #[allow(clippy::too_many_arguments)]
    fn sample_frame(
        &self,
        state: &mut EventState,
        engine: &DetectionEngine,
        frame: &Frame,
        conf_threshold: f32,
        iou_threshold: f32,
        filter_classes: &[String],
        camera_id: &str,
        started: Instant,
    ) {
        let t = Instant::now();
        let dets = match engine.detect(frame, conf_threshold, iou_threshold, filter_classes) {
            Ok(dets) => dets,
            Err(e) => {
                error!("[{}] Inference failed: {}", camera_id, e);
                return;
            }
        };
        state.inference_count += 1;

        if state.inference_count <= 3 || !dets.is_empty() {
            info!(
                "[{}] Inference #{}: {:.0}ms, {} detections",
                camera_id,
                state.inference_count,
                t.elapsed().as_secs_f64() * 1000.0,
                dets.len()
            );
        }

        for det in &dets {
            if det.confidence > state.best_confidence {
                state.best_confidence = det.confidence;
                state.best_frame = Some(frame.clone());
                state.best_detections = dets.clone();
            }
        }
        state.all_detections.extend(dets.iter().cloned());

        if !dets.is_empty() && !state.early_sent {
            self.send_early_notification(state, &dets, camera_id, started);
        }
    }

    /// First confident detection of the event: publish the early result and
    /// the ON state, save the early snapshot and launch the parallel vision
    /// task if it clears the camera's gate.
    fn send_early_notification(
        &self,
        state: &mut EventState,
        dets: &[Detection],
        camera_id: &str,
        started: Instant,
    ) {
        let prefix = self.bus.prefix();
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let early_dets: Vec<Value> = dets
            .iter()
            .map(|d| json!({"class": d.class_name, "confidence": round3(d.confidence)}))
            .collect();

        self.publish_json(
            &format!("{}/{}/result", prefix, camera_id),
            &json!({
                "camera_id": camera_id,
                "timestamp": now_iso8601(),
                "detections": early_dets,
                "detection_count": dets.len(),
                "detected_objects": dets[0].class_name,
                "phase": "early",
            }),
        );
        self.bus
            .publish(&format!("{}/{}/detected", prefix, camera_id), "ON", 0, false);

        info!(
            "[{}] Early notification sent at {:.0}ms (first detection: {} @ {:.1}%)",
            camera_id,
            elapsed_ms,
            dets[0].class_name,
            dets[0].confidence * 100.0
        );
        state.early_sent = true;

        if let Some(frame) = &state.best_frame {
            match snapshot::save(
                frame,
                &state.best_detections,
                camera_id,
                &self.config.recording.snapshots_dir,
            ) {
                Ok(path) => {
                    info!(
                        "[{}] Early snapshot saved at {:.0}ms: {}",
                        camera_id,
                        elapsed_ms,
                        path.display()
                    );
                    state.early_snapshot = Some(path);
                }
                Err(e) => error!("[{}] Early snapshot failed: {}", camera_id, e),
            }
        }

        if !self.config.vision.enabled {
            return;
        }
        let Some(snapshot_path) = state.early_snapshot.clone() else {
            return;
        };

        let best_conf = state
            .best_detections
            .first()
            .map(|d| d.confidence)
            .unwrap_or(0.0);
        if best_conf < self.early_gate(camera_id) {
            return;
        }

        let classes: Vec<String> = dets.iter().map(|d| d.class_name.clone()).collect();
        let primary_class = VisionClient::select_primary_class(&classes);
        let vision_config = self.config.vision.clone();
        let cam = camera_id.to_string();

        let handle = std::thread::Builder::new()
            .name(format!("vision-{}", camera_id))
            .spawn(move || match VisionClient::new(&vision_config) {
                Ok(mut client) => client.analyze(&snapshot_path, &cam, &primary_class),
                Err(e) => {
                    error!("Vision client init failed for {}: {}", cam, e);
                    VisionResult::default()
                }
            });

        match handle {
            Ok(handle) => {
                state.vision_handle = Some(handle);
                info!("[{}] Vision task launched in parallel at {:.0}ms", camera_id, elapsed_ms);
            }
            Err(e) => error!("[{}] Failed to spawn vision task: {}", camera_id, e),
        }
    }

    /// Join the parallel vision task, or run the call synchronously when
    /// the event finished without an early notification.
    #[allow(clippy::too_many_arguments)]
    fn finish_vision(
        &self,
        state: &mut EventState,
        camera_id: &str,
        event_id: &str,
        unique_classes: &[String],
        base_url: &str,
        recording_filename: &str,
        snapshot_filename: &str,
        snapshot_path: Option<&std::path::Path>,
    ) {
        if let Some(handle) = state.vision_handle.take() {
            info!("[{}] Waiting for vision task...", camera_id);
            match handle.join() {
                Ok(result) if result.is_valid => {
                    self.publish_context(
                        camera_id,
                        &result.context,
                        base_url,
                        recording_filename,
                        snapshot_filename,
                    );
                    // The prompt lives inside the joined task and is not
                    // recoverable here.
                    self.persist_context(
                        event_id,
                        camera_id,
                        &result.context,
                        unique_classes,
                        "",
                        0.0,
                    );
                }
                Ok(_) => {}
                Err(_) => error!("[{}] Vision task panicked", camera_id),
            }
            return;
        }

        if !self.config.vision.enabled || state.early_sent || state.best_detections.is_empty() {
            return;
        }
        let Some(snapshot_path) = snapshot_path else {
            return;
        };

        let best_conf = state.best_detections[0].confidence;
        if best_conf < self.early_gate(camera_id) {
            return;
        }

        let primary_class = VisionClient::select_primary_class(unique_classes);
        let mut client = match VisionClient::new(&self.config.vision) {
            Ok(client) => client,
            Err(e) => {
                error!("Vision client init failed for {}: {}", camera_id, e);
                return;
            }
        };

        let result = client.analyze(snapshot_path, camera_id, &primary_class);
        if result.is_valid {
            self.publish_context(
                camera_id,
                &result.context,
                base_url,
                recording_filename,
                snapshot_filename,
            );
            self.persist_context(
                event_id,
                camera_id,
                &result.context,
                unique_classes,
                client.last_prompt(),
                result.response_time_seconds,
            );
        }
    }

    fn publish_context(
        &self,
        camera_id: &str,
        context: &str,
        base_url: &str,
        recording_filename: &str,
        snapshot_filename: &str,
    ) {
        let prefix = self.bus.prefix();
        self.publish_json(
            &format!("{}/{}/context", prefix, camera_id),
            &json!({
                "camera_id": camera_id,
                "timestamp": now_iso8601(),
                "context": context,
                "recording_url": url_or_null(base_url, "events", recording_filename),
                "recording_filename": recording_filename,
                "snapshot_url": url_or_null(base_url, "snapshots", snapshot_filename),
                "source": "llava",
            }),
        );
        info!("Published vision context for {}: {}", camera_id, context);
    }

    fn persist_context(
        &self,
        event_id: &str,
        camera_id: &str,
        context: &str,
        unique_classes: &[String],
        prompt_used: &str,
        response_time_seconds: f64,
    ) {
        let Some(store) = &self.store else {
            return;
        };
        let record = AiContextRecord {
            context_text: context.to_string(),
            detected_classes: unique_classes.to_vec(),
            source_model: self.config.vision.model.clone(),
            prompt_used: prompt_used.to_string(),
            response_time_seconds,
            is_valid: true,
        };
        if let Err(e) = store.log_ai_context(event_id, camera_id, &record) {
            error!("Store log_ai_context failed for {}: {}", camera_id, e);
        }
    }

    fn early_gate(&self, camera_id: &str) -> f32 {
        self.config
            .cameras
            .get(camera_id)
            .map(|c| c.early_notify_confidence)
            .unwrap_or(0.70)
    }

    fn publish_json(&self, topic: &str, value: &Value) {
        self.bus.publish(topic, &value.to_string(), 0, false);
    }
}

/// Deep-copy the ring buffer contents into owned frames, releasing every
/// pooled handle before returning.
fn drain_preroll(ring: &RingBuffer) -> Vec<Frame> {
    let snapshot = ring.snapshot();
    snapshot.iter().map(|f| f.to_owned_frame()).collect()
}

/// Keep the highest-confidence detection per class
fn dedup_by_class(detections: &[Detection]) -> HashMap<String, Detection> {
    let mut unique: HashMap<String, Detection> = HashMap::new();
    for det in detections {
        match unique.get(&det.class_name) {
            Some(existing) if existing.confidence >= det.confidence => {}
            _ => {
                unique.insert(det.class_name.clone(), det.clone());
            }
        }
    }
    unique
}

/// Human-readable summary like "Detected a person, a dog and an umbrella"
fn detection_message(unique_classes: &[String]) -> String {
    if unique_classes.is_empty() {
        return "No objects detected".to_string();
    }

    let items: Vec<String> = unique_classes
        .iter()
        .take(5)
        .map(|class| {
            let article = match class.chars().next() {
                Some('a' | 'e' | 'i' | 'o' | 'u') => "an",
                _ => "a",
            };
            format!("{} {}", article, class)
        })
        .collect();

    let mut message = String::from("Detected ");
    for (i, item) in items.iter().enumerate() {
        if i > 0 && i == items.len() - 1 {
            message.push_str(" and ");
        } else if i > 0 {
            message.push_str(", ");
        }
        message.push_str(item);
    }
    message
}

/// Time-prefixed unique event id: `{hex_ms_since_epoch}-{8_hex_random}`
fn generate_event_id() -> String {
    let ms = chrono::Utc::now().timestamp_millis();
    format!("{:x}-{:08x}", ms, rand::random::<u32>())
}

fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn round3(value: f32) -> f64 {
    (value as f64 * 1000.0).round() / 1000.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn url_or_null(base_url: &str, subdir: &str, filename: &str) -> Value {
    if filename.is_empty() {
        Value::Null
    } else {
        Value::String(format!("{}/{}/{}", base_url, subdir, filename))
    }
}
