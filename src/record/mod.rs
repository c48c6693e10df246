//! Event recording to streamable MP4
//!
//! An appsrc-fed H.264 pipeline writes pre-roll and live frames to a
//! faststart MP4 (container metadata at the front, so playback can begin
//! mid-download). Presentation timestamps start at zero and advance by one
//! frame interval; recording refuses further frames past the hard duration
//! cap.

use std::path::{Path, PathBuf};
use std::time::Instant;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use tracing::{debug, error, info};

use crate::capture::ensure_gst;
use crate::error::{VigilError, VigilResult};
use crate::frame::Frame;

/// Hard cap on a single event recording
pub const MAX_DURATION_SECS: u64 = 30;

/// Transcoding sink for a single event: pre-roll plus live frames in,
/// compact seekable MP4 out.
pub struct EventRecorder {
    pipeline: Option<gst::Pipeline>,
    appsrc: Option<AppSrc>,
    file_path: PathBuf,
    camera_id: String,
    width: u32,
    height: u32,
    fps: u32,
    frames_written: u64,
    recording: bool,
    stop_requested_at: Option<Instant>,
    post_roll_seconds: u64,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self {
            pipeline: None,
            appsrc: None,
            file_path: PathBuf::new(),
            camera_id: String::new(),
            width: 0,
            height: 0,
            fps: 10,
            frames_written: 0,
            recording: false,
            stop_requested_at: None,
            post_roll_seconds: 5,
        }
    }

    /// Start recording `{dir}/{camera_id}_{YYYYMMDD_HHMMSS}.mp4` and write
    /// every matching pre-roll frame immediately.
    pub fn start(
        &mut self,
        camera_id: &str,
        preroll: &[Frame],
        width: u32,
        height: u32,
        fps: u32,
        dir: &Path,
    ) -> VigilResult<()> {
        ensure_gst()?;
        std::fs::create_dir_all(dir)?;

        self.camera_id = camera_id.to_string();
        self.width = width;
        self.height = height;
        self.fps = if fps == 0 { 10 } else { fps };
        self.frames_written = 0;
        self.stop_requested_at = None;

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        self.file_path = dir.join(format!("{}_{}.mp4", camera_id, stamp));

        // Ultrafast preset with a constant quantizer around 28 keeps files
        // small; one keyframe per second for seekability.
        let pipeline_str = format!(
            "appsrc name=src is-live=true format=time block=true ! videoconvert ! \
             x264enc speed-preset=ultrafast tune=zerolatency pass=quant quantizer=28 \
             key-int-max={fps} ! h264parse ! mp4mux faststart=true ! \
             filesink location=\"{path}\"",
            fps = self.fps,
            path = self.file_path.display()
        );

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| VigilError::Recording(e.to_string()))?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| VigilError::Recording("not a pipeline".to_string()))?;

        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| VigilError::Recording("no element named 'src'".to_string()))?
            .dynamic_cast::<AppSrc>()
            .map_err(|_| VigilError::Recording("'src' is not an appsrc".to_string()))?;

        let caps = gst::Caps::builder("video/x-raw")
            .field("format", "BGR")
            .field("width", width as i32)
            .field("height", height as i32)
            .field("framerate", gst::Fraction::new(self.fps as i32, 1))
            .build();
        appsrc.set_caps(Some(&caps));

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| VigilError::Recording(format!("failed to start encoder: {}", e)))?;

        self.pipeline = Some(pipeline);
        self.appsrc = Some(appsrc);
        self.recording = true;

        info!(
            "Recording started: {} ({}x{} @ {}fps)",
            self.file_path.display(),
            width,
            height,
            self.fps
        );

        for frame in preroll {
            if frame.width == width && frame.height == height {
                self.write(frame)?;
            }
        }

        Ok(())
    }

    /// Encode and mux one BGR frame. Silently refuses frames once the
    /// duration cap is reached.
    pub fn write(&mut self, frame: &Frame) -> VigilResult<()> {
        if !self.recording {
            return Err(VigilError::Recording("recorder not started".to_string()));
        }
        if self.is_max_duration_reached() {
            return Ok(());
        }

        let appsrc = self
            .appsrc
            .as_ref()
            .ok_or_else(|| VigilError::Recording("recorder not started".to_string()))?;

        // Repack rows in case the source stride carries padding.
        let row_bytes = self.width as usize * 3;
        let mut packed = Vec::with_capacity(row_bytes * self.height as usize);
        for row in 0..self.height as usize {
            let start = row * frame.stride;
            packed.extend_from_slice(&frame.pixels[start..start + row_bytes]);
        }

        let frame_duration_ns = 1_000_000_000u64 / self.fps as u64;
        let pts_ns = self.frames_written * frame_duration_ns;

        let mut buffer = gst::Buffer::from_mut_slice(packed);
        {
            let buffer = buffer.get_mut().expect("freshly created buffer is unique");
            buffer.set_pts(gst::ClockTime::from_nseconds(pts_ns));
            buffer.set_duration(gst::ClockTime::from_nseconds(frame_duration_ns));
        }

        appsrc
            .push_buffer(buffer)
            .map_err(|e| VigilError::Recording(format!("push failed: {:?}", e)))?;

        self.frames_written += 1;
        Ok(())
    }

    /// Mark the stop time; recording continues for `post_roll_seconds`.
    /// Idempotent, first call wins.
    pub fn request_stop(&mut self, post_roll_seconds: u64) {
        if self.stop_requested_at.is_none() {
            self.stop_requested_at = Some(Instant::now());
            self.post_roll_seconds = post_roll_seconds;
            debug!(
                "Stop requested for {}, post-roll {}s",
                self.camera_id, post_roll_seconds
            );
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested_at.is_some()
    }

    /// True once wall-clock time since `request_stop` covers the post-roll
    pub fn post_roll_complete(&self) -> bool {
        match self.stop_requested_at {
            Some(at) => at.elapsed().as_secs() >= self.post_roll_seconds,
            None => false,
        }
    }

    pub fn is_max_duration_reached(&self) -> bool {
        self.frames_written >= self.fps as u64 * MAX_DURATION_SECS
    }

    /// Flush the encoder, write the trailer and close the file
    pub fn finalize(&mut self) -> VigilResult<()> {
        if !self.recording {
            return Ok(());
        }
        self.recording = false;

        if let Some(appsrc) = self.appsrc.take() {
            let _ = appsrc.end_of_stream();
        }

        if let Some(pipeline) = self.pipeline.take() {
            // Wait for the muxer to drain before tearing down.
            if let Some(bus) = pipeline.bus() {
                let _ = bus.timed_pop_filtered(
                    gst::ClockTime::from_seconds(5),
                    &[gst::MessageType::Eos, gst::MessageType::Error],
                );
            }
            pipeline
                .set_state(gst::State::Null)
                .map_err(|e| VigilError::Recording(e.to_string()))?;
        }

        info!(
            "Recording finalized: {} ({} frames, {:.1}s)",
            self.file_path.display(),
            self.frames_written,
            self.frames_written as f64 / self.fps as f64
        );
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Just the file name, for URLs and store rows
    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventRecorder {
    fn drop(&mut self) {
        if self.recording {
            if let Err(e) = self.finalize() {
                error!("Recorder finalize on drop failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_recorder_is_idle() {
        let recorder = EventRecorder::new();
        assert!(!recorder.is_recording());
        assert!(!recorder.is_stop_requested());
        assert!(!recorder.post_roll_complete());
        assert_eq!(recorder.frames_written(), 0);
    }

    #[test]
    fn test_write_without_start_fails() {
        let mut recorder = EventRecorder::new();
        let mut frame = Frame::empty();
        frame.resize(4, 4);
        assert!(recorder.write(&frame).is_err());
    }

    #[test]
    fn test_request_stop_first_call_wins() {
        let mut recorder = EventRecorder::new();
        recorder.request_stop(1);
        recorder.request_stop(600);
        assert!(recorder.is_stop_requested());
        assert_eq!(recorder.post_roll_seconds, 1);
    }

    #[test]
    fn test_post_roll_elapses() {
        let mut recorder = EventRecorder::new();
        recorder.request_stop(0);
        std::thread::sleep(Duration::from_millis(10));
        assert!(recorder.post_roll_complete());
    }

    #[test]
    fn test_max_duration_by_frame_count() {
        let mut recorder = EventRecorder::new();
        recorder.fps = 10;
        assert!(!recorder.is_max_duration_reached());
        recorder.frames_written = 10 * MAX_DURATION_SECS;
        assert!(recorder.is_max_duration_reached());
    }
}
