//! Per-camera stream capture
//!
//! One dedicated thread per camera runs a GStreamer pipeline that decodes
//! the stream to BGR and delivers frames into the camera's ring buffer via
//! the frame pool. Connection loss is handled with exponential backoff
//! (5 s doubling to 60 s, reset on a successful open); a pool-exhausted
//! acquire drops the frame rather than stalling the decode path.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use once_cell::sync::OnceCell;
use tracing::{error, info, warn};

use crate::error::{VigilError, VigilResult};
use crate::frame::FramePool;
use crate::ring::RingBuffer;

/// Poll interval for the run flag while waiting on samples or backoff
const POLL_INTERVAL: Duration = Duration::from_millis(200);

const BACKOFF_START_SECS: u64 = 5;
const BACKOFF_MAX_SECS: u64 = 60;

static GST_INIT: OnceCell<()> = OnceCell::new();

/// Initialise GStreamer once per process
pub fn ensure_gst() -> VigilResult<()> {
    GST_INIT
        .get_or_try_init(|| gst::init().map_err(|e| VigilError::Pipeline(e.to_string())))
        .map(|_| ())
}

#[derive(Default)]
struct SharedStats {
    frames_captured: AtomicU64,
    reconnect_count: AtomicU64,
    consecutive_failures: AtomicU64,
    connected: AtomicBool,
    width: AtomicU32,
    height: AtomicU32,
    /// Millis since epoch of the last delivered frame; 0 = never
    last_frame_epoch_ms: AtomicU64,
}

/// Point-in-time capture statistics
#[derive(Debug, Clone)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub reconnect_count: u64,
    pub consecutive_failures: u64,
    pub connected: bool,
    pub width: u32,
    pub height: u32,
    pub last_frame_epoch_ms: u64,
}

/// Live ingest for one camera
pub struct Capture {
    camera_id: String,
    url: String,
    pool: Arc<FramePool>,
    ring: Arc<RingBuffer>,
    running: Arc<AtomicBool>,
    stats: Arc<SharedStats>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Capture {
    pub fn new(
        camera_id: String,
        url: String,
        pool: Arc<FramePool>,
        ring: Arc<RingBuffer>,
    ) -> Self {
        Self {
            camera_id,
            url,
            pool,
            ring,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(SharedStats::default()),
            handle: Mutex::new(None),
        }
    }

    /// Build the decode pipeline description for a stream URL
    pub fn build_pipeline_string(url: &str) -> String {
        if url.starts_with("rtsp://") {
            // TCP transport, 5 s connect timeout, no buffering
            format!(
                "rtspsrc location={} protocols=tcp tcp-timeout=5000000 latency=0 ! \
                 decodebin ! videoconvert ! video/x-raw,format=BGR ! \
                 appsink name=sink sync=false max-buffers=2 drop=true",
                url
            )
        } else {
            format!(
                "filesrc location=\"{}\" ! decodebin ! videoconvert ! \
                 video/x-raw,format=BGR ! appsink name=sink sync=false max-buffers=2 drop=true",
                url
            )
        }
    }

    /// Start the capture thread. Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let camera_id = self.camera_id.clone();
        let url = self.url.clone();
        let pool = Arc::clone(&self.pool);
        let ring = Arc::clone(&self.ring);
        let running = Arc::clone(&self.running);
        let stats = Arc::clone(&self.stats);

        let handle = std::thread::Builder::new()
            .name(format!("capture-{}", camera_id))
            .spawn(move || {
                capture_loop(&camera_id, &url, &pool, &ring, &running, &stats);
            })
            .expect("spawn capture thread");

        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!("[{}] Capture thread started", self.camera_id);
    }

    /// Stop the capture thread and wait for it to exit
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.stats.connected.store(false, Ordering::SeqCst);
        info!("[{}] Capture thread stopped", self.camera_id);
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.stats.frames_captured.load(Ordering::Relaxed),
            reconnect_count: self.stats.reconnect_count.load(Ordering::Relaxed),
            consecutive_failures: self.stats.consecutive_failures.load(Ordering::Relaxed),
            connected: self.stats.connected.load(Ordering::Relaxed),
            width: self.stats.width.load(Ordering::Relaxed),
            height: self.stats.height.load(Ordering::Relaxed),
            last_frame_epoch_ms: self.stats.last_frame_epoch_ms.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    camera_id: &str,
    url: &str,
    pool: &FramePool,
    ring: &RingBuffer,
    running: &AtomicBool,
    stats: &SharedStats,
) {
    let mut backoff_secs = BACKOFF_START_SECS;
    let mut frame_counter: u64 = 0;

    while running.load(Ordering::SeqCst) {
        info!("[{}] Connecting to stream...", camera_id);

        match open_pipeline(url) {
            Ok((pipeline, appsink)) => {
                stats.connected.store(true, Ordering::SeqCst);
                stats.consecutive_failures.store(0, Ordering::SeqCst);
                backoff_secs = BACKOFF_START_SECS;

                let got_frames = pull_samples(
                    camera_id,
                    &pipeline,
                    &appsink,
                    pool,
                    ring,
                    running,
                    stats,
                    &mut frame_counter,
                );

                let _ = pipeline.set_state(gst::State::Null);
                stats.connected.store(false, Ordering::SeqCst);

                if running.load(Ordering::SeqCst) {
                    stats.reconnect_count.fetch_add(1, Ordering::SeqCst);
                    if !got_frames {
                        // Opened but never produced a frame; counts as a
                        // failed connect for health purposes.
                        stats.consecutive_failures.fetch_add(1, Ordering::SeqCst);
                    } else {
                        warn!("[{}] Stream ended or errored, reconnecting...", camera_id);
                    }
                    backoff_sleep(camera_id, &mut backoff_secs, running, stats);
                }
            }
            Err(e) => {
                error!("[{}] Failed to open stream: {}", camera_id, e);
                stats.consecutive_failures.fetch_add(1, Ordering::SeqCst);
                stats.reconnect_count.fetch_add(1, Ordering::SeqCst);
                stats.connected.store(false, Ordering::SeqCst);
                backoff_sleep(camera_id, &mut backoff_secs, running, stats);
            }
        }
    }
}

fn backoff_sleep(camera_id: &str, backoff_secs: &mut u64, running: &AtomicBool, stats: &SharedStats) {
    warn!(
        "[{}] Reconnect in {}s (attempt {})",
        camera_id,
        backoff_secs,
        stats.consecutive_failures.load(Ordering::Relaxed)
    );

    let deadline = Instant::now() + Duration::from_secs(*backoff_secs);
    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        std::thread::sleep(POLL_INTERVAL);
    }
    *backoff_secs = (*backoff_secs * 2).min(BACKOFF_MAX_SECS);
}

fn open_pipeline(url: &str) -> VigilResult<(gst::Pipeline, AppSink)> {
    ensure_gst()?;

    let pipeline_str = Capture::build_pipeline_string(url);
    let pipeline = gst::parse::launch(&pipeline_str)?
        .dynamic_cast::<gst::Pipeline>()
        .map_err(|_| VigilError::Pipeline("not a pipeline".to_string()))?;

    let appsink = pipeline
        .by_name("sink")
        .ok_or_else(|| VigilError::Pipeline("no element named 'sink'".to_string()))?
        .dynamic_cast::<AppSink>()
        .map_err(|_| VigilError::Pipeline("'sink' is not an appsink".to_string()))?;

    pipeline
        .set_state(gst::State::Playing)
        .map_err(|e| VigilError::StreamConnectionFailed(e.to_string()))?;

    Ok((pipeline, appsink))
}

/// Pull decoded samples until stop, error or EOS. Returns whether any frame
/// was delivered on this connection.
#[allow(clippy::too_many_arguments)]
fn pull_samples(
    camera_id: &str,
    pipeline: &gst::Pipeline,
    appsink: &AppSink,
    pool: &FramePool,
    ring: &RingBuffer,
    running: &AtomicBool,
    stats: &SharedStats,
    frame_counter: &mut u64,
) -> bool {
    let bus = pipeline.bus();
    let mut got_frames = false;

    while running.load(Ordering::SeqCst) {
        // Surface pipeline errors promptly.
        if let Some(bus) = &bus {
            if let Some(msg) = bus.timed_pop_filtered(
                gst::ClockTime::ZERO,
                &[gst::MessageType::Error, gst::MessageType::Eos],
            ) {
                match msg.view() {
                    gst::MessageView::Error(e) => {
                        warn!("[{}] Pipeline error: {}", camera_id, e.error());
                    }
                    gst::MessageView::Eos(_) => {
                        warn!("[{}] End of stream", camera_id);
                    }
                    _ => {}
                }
                return got_frames;
            }
        }

        let sample = match appsink.try_pull_sample(gst::ClockTime::from_mseconds(
            POLL_INTERVAL.as_millis() as u64,
        )) {
            Some(sample) => sample,
            None => {
                if appsink.is_eos() {
                    return got_frames;
                }
                continue;
            }
        };

        let Some(buffer) = sample.buffer() else {
            continue;
        };
        let Some(caps) = sample.caps() else {
            continue;
        };
        let Ok(info) = VideoInfo::from_caps(caps) else {
            continue;
        };

        let width = info.width();
        let height = info.height();
        let src_stride = info.stride()[0] as usize;

        if stats.width.load(Ordering::Relaxed) != width
            || stats.height.load(Ordering::Relaxed) != height
        {
            stats.width.store(width, Ordering::Relaxed);
            stats.height.store(height, Ordering::Relaxed);
            info!("[{}] Resolution: {}x{}", camera_id, width, height);
        }

        let Ok(map) = buffer.map_readable() else {
            continue;
        };
        let data = map.as_slice();

        let Some(mut frame) = pool.acquire() else {
            warn!("[{}] Frame pool exhausted, dropping frame", camera_id);
            continue;
        };

        if frame.width != width || frame.height != height {
            frame.resize(width, height);
        }

        // Copy row by row; the source stride may carry padding.
        let row_bytes = width as usize * 3;
        let dst_stride = frame.stride;
        for row in 0..height as usize {
            let src_start = row * src_stride;
            let dst_start = row * dst_stride;
            if src_start + row_bytes > data.len() {
                break;
            }
            frame.pixels[dst_start..dst_start + row_bytes]
                .copy_from_slice(&data[src_start..src_start + row_bytes]);
        }

        *frame_counter += 1;
        frame.frame_number = *frame_counter;
        frame.timestamp = Instant::now();

        stats.frames_captured.fetch_add(1, Ordering::Relaxed);
        stats
            .last_frame_epoch_ms
            .store(chrono::Utc::now().timestamp_millis() as u64, Ordering::Relaxed);

        got_frames = true;
        ring.push(Arc::new(frame));
    }

    got_frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtsp_pipeline_string() {
        let s = Capture::build_pipeline_string("rtsp://10.0.0.9/stream");
        assert!(s.contains("rtspsrc location=rtsp://10.0.0.9/stream"));
        assert!(s.contains("protocols=tcp"));
        assert!(s.contains("tcp-timeout=5000000"));
        assert!(s.contains("latency=0"));
        assert!(s.contains("format=BGR"));
        assert!(s.contains("appsink name=sink"));
    }

    #[test]
    fn test_file_pipeline_string() {
        let s = Capture::build_pipeline_string("clips/test.mp4");
        assert!(s.contains("filesrc location=\"clips/test.mp4\""));
        assert!(s.contains("decodebin"));
        assert!(!s.contains("rtspsrc"));
    }

    #[test]
    fn test_initial_stats() {
        let pool = Arc::new(FramePool::new(2));
        let ring = Arc::new(RingBuffer::new(2));
        let capture = Capture::new(
            "cam".to_string(),
            "rtsp://127.0.0.1:1/none".to_string(),
            pool,
            ring,
        );

        let stats = capture.stats();
        assert_eq!(stats.frames_captured, 0);
        assert!(!stats.connected);
        assert_eq!(stats.last_frame_epoch_ms, 0);
    }
}
