//! ONNX Runtime detection engine
//!
//! Letterbox preprocessing, model forward pass and postprocessing for
//! YOLO-family detectors. The engine is created once per process and shared
//! across event tasks; `detect()` is safe to call concurrently because all
//! per-call state (tensors, letterbox parameters) is local and the session
//! sits behind a mutex.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use tracing::{error, info};

use super::{suppress_per_class, Detection, COCO_CLASSES};
use crate::error::{VigilError, VigilResult};
use crate::frame::Frame;

/// Normalized gray used to fill letterbox padding
const PAD_VALUE: f32 = 114.0 / 255.0;

/// Scale and offsets produced by letterbox preprocessing; postprocessing
/// needs them to map boxes back into the original image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxParams {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

/// Shared, thread-safe inference runtime over a single ONNX model
pub struct DetectionEngine {
    session: Option<Arc<Mutex<Session>>>,
    input_width: usize,
    input_height: usize,
}

impl DetectionEngine {
    /// Load the model at `path`. A missing or unreadable model is not fatal:
    /// the engine is returned in a "not loaded" state that refuses inference.
    pub fn new(path: &Path) -> Self {
        let mut engine = Self {
            session: None,
            input_width: 640,
            input_height: 640,
        };

        match Self::create_session(path) {
            Ok(session) => {
                // Read input dimensions from the model where they are static
                if let Some(dims) = session
                    .inputs
                    .first()
                    .and_then(|i| i.input_type.tensor_dimensions().cloned())
                {
                    if dims.len() == 4 {
                        if dims[2] > 0 {
                            engine.input_height = dims[2] as usize;
                        }
                        if dims[3] > 0 {
                            engine.input_width = dims[3] as usize;
                        }
                    }
                }
                engine.session = Some(Arc::new(Mutex::new(session)));
                info!(
                    "Detection model loaded: {} (input {}x{}, {} classes)",
                    path.display(),
                    engine.input_width,
                    engine.input_height,
                    COCO_CLASSES.len()
                );
            }
            Err(e) => {
                error!("Failed to load detection model '{}': {}", path.display(), e);
            }
        }

        engine
    }

    fn create_session(path: &Path) -> VigilResult<Session> {
        if !path.exists() {
            return Err(VigilError::ModelLoad(format!(
                "model file does not exist: {}",
                path.display()
            )));
        }

        Session::builder()
            .map_err(|e| VigilError::ModelLoad(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| VigilError::ModelLoad(e.to_string()))?
            .with_intra_threads(2)
            .map_err(|e| VigilError::ModelLoad(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e| VigilError::ModelLoad(e.to_string()))
    }

    pub fn is_loaded(&self) -> bool {
        self.session.is_some()
    }

    pub fn input_width(&self) -> usize {
        self.input_width
    }

    pub fn input_height(&self) -> usize {
        self.input_height
    }

    /// Run detection on a BGR frame.
    ///
    /// `allow_classes` filters by class name; an empty list accepts all.
    pub fn detect(
        &self,
        frame: &Frame,
        conf_threshold: f32,
        iou_threshold: f32,
        allow_classes: &[String],
    ) -> VigilResult<Vec<Detection>> {
        let session = self.session.as_ref().ok_or(VigilError::ModelNotLoaded)?;

        if frame.pixels.is_empty() || frame.width == 0 || frame.height == 0 {
            return Ok(Vec::new());
        }

        let (tensor, params) = self.preprocess(frame);

        let array = ndarray::Array::from_shape_vec(
            vec![1, 3, self.input_height, self.input_width],
            tensor,
        )
        .map_err(|e| VigilError::Inference(format!("failed to shape input tensor: {}", e)))?;

        let input = Value::from_array(array)
            .map_err(|e| VigilError::Inference(format!("failed to create input tensor: {}", e)))?;

        let mut guard = session.lock().unwrap_or_else(|e| e.into_inner());
        let outputs = guard
            .run(ort::inputs!["images" => input])
            .map_err(|e| VigilError::Inference(format!("session run failed: {}", e)))?;

        let output = outputs
            .values()
            .next()
            .ok_or_else(|| VigilError::InvalidOutput("no outputs from model".to_string()))?;

        let view = output
            .try_extract_array::<f32>()
            .map_err(|e| VigilError::InvalidOutput(e.to_string()))?;

        // Output rank may be 2 or 3; the candidate count is the last dim.
        let shape = view.shape().to_vec();
        let num_candidates = match shape.len() {
            3 => shape[2],
            2 => shape[1],
            other => {
                return Err(VigilError::InvalidOutput(format!(
                    "unexpected output rank {}",
                    other
                )))
            }
        };
        if num_candidates == 0 {
            return Ok(Vec::new());
        }

        let data: Vec<f32> = view.iter().copied().collect();

        Ok(self.postprocess(
            &data,
            num_candidates,
            conf_threshold,
            iou_threshold,
            params,
            frame.width,
            frame.height,
            allow_classes,
        ))
    }

    /// Letterbox a BGR frame into a normalized NCHW float tensor.
    ///
    /// The image is scaled by `min(W/img_w, H/img_h)`, centred, and the
    /// border filled with neutral gray. Channels are written planar in
    /// R, G, B order, values divided by 255.
    pub fn preprocess(&self, frame: &Frame) -> (Vec<f32>, LetterboxParams) {
        let img_w = frame.width as usize;
        let img_h = frame.height as usize;
        let target_w = self.input_width;
        let target_h = self.input_height;

        let scale_x = target_w as f32 / img_w as f32;
        let scale_y = target_h as f32 / img_h as f32;
        let scale = scale_x.min(scale_y);

        let new_w = (img_w as f32 * scale).round() as usize;
        let new_h = (img_h as f32 * scale).round() as usize;

        let pad_x = (target_w as f32 - new_w as f32) / 2.0;
        let pad_y = (target_h as f32 - new_h as f32) / 2.0;
        let pad_left = pad_x.round() as usize;
        let pad_top = pad_y.round() as usize;

        let plane = target_w * target_h;
        let mut tensor = vec![PAD_VALUE; 3 * plane];

        for dst_y in 0..new_h {
            let src_y = ((dst_y as f32 / scale) as usize).min(img_h - 1);
            let out_y = dst_y + pad_top;
            if out_y >= target_h {
                continue;
            }

            for dst_x in 0..new_w {
                let src_x = ((dst_x as f32 / scale) as usize).min(img_w - 1);
                let out_x = dst_x + pad_left;
                if out_x >= target_w {
                    continue;
                }

                let px = src_y * frame.stride + src_x * 3;
                let b = frame.pixels[px] as f32;
                let g = frame.pixels[px + 1] as f32;
                let r = frame.pixels[px + 2] as f32;

                let offset = out_y * target_w + out_x;
                tensor[offset] = r / 255.0;
                tensor[plane + offset] = g / 255.0;
                tensor[2 * plane + offset] = b / 255.0;
            }
        }

        (tensor, LetterboxParams { scale, pad_x, pad_y })
    }

    /// Decode raw model output into detections in original image coordinates.
    ///
    /// `output` is the flattened `[4 + K, A]` tensor with A candidates per
    /// row: centre-size geometry in the first four rows, per-class scores in
    /// the rest.
    #[allow(clippy::too_many_arguments)]
    pub fn postprocess(
        &self,
        output: &[f32],
        num_candidates: usize,
        conf_threshold: f32,
        iou_threshold: f32,
        params: LetterboxParams,
        orig_width: u32,
        orig_height: u32,
        allow_classes: &[String],
    ) -> Vec<Detection> {
        let num_classes = COCO_CLASSES.len();
        let allow: HashSet<&str> = allow_classes.iter().map(|s| s.as_str()).collect();

        let value = |row: usize, i: usize| output[row * num_candidates + i];

        let mut detections = Vec::new();
        for i in 0..num_candidates {
            let cx = value(0, i);
            let cy = value(1, i);
            let w = value(2, i);
            let h = value(3, i);

            let mut best_class = 0usize;
            let mut best_score = 0.0f32;
            for c in 0..num_classes {
                let score = value(4 + c, i);
                if score > best_score {
                    best_score = score;
                    best_class = c;
                }
            }

            if best_score < conf_threshold {
                continue;
            }

            let class_name = COCO_CLASSES[best_class];
            if !allow.is_empty() && !allow.contains(class_name) {
                continue;
            }

            // Centre-size to corners, then undo the letterbox.
            let mut x1 = (cx - w / 2.0 - params.pad_x) / params.scale;
            let mut y1 = (cy - h / 2.0 - params.pad_y) / params.scale;
            let mut x2 = (cx + w / 2.0 - params.pad_x) / params.scale;
            let mut y2 = (cy + h / 2.0 - params.pad_y) / params.scale;

            x1 = x1.clamp(0.0, orig_width as f32);
            y1 = y1.clamp(0.0, orig_height as f32);
            x2 = x2.clamp(0.0, orig_width as f32);
            y2 = y2.clamp(0.0, orig_height as f32);

            if x2 - x1 < 1.0 || y2 - y1 < 1.0 {
                continue;
            }

            detections.push(Detection {
                class_id: best_class as i32,
                class_name: class_name.to_string(),
                confidence: best_score,
                x1,
                y1,
                x2,
                y2,
            });
        }

        suppress_per_class(detections, iou_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn engine() -> DetectionEngine {
        DetectionEngine::new(&PathBuf::from("/nonexistent/model.onnx"))
    }

    fn gray_frame(width: u32, height: u32) -> Frame {
        let mut frame = Frame::empty();
        frame.resize(width, height);
        frame
    }

    #[test]
    fn test_missing_model_is_not_loaded() {
        let engine = engine();
        assert!(!engine.is_loaded());

        let frame = gray_frame(640, 480);
        let result = engine.detect(&frame, 0.5, 0.45, &[]);
        assert!(matches!(result, Err(VigilError::ModelNotLoaded)));
    }

    #[test]
    fn test_letterbox_square_input() {
        let engine = engine();
        let frame = gray_frame(640, 640);
        let (tensor, params) = engine.preprocess(&frame);

        assert_eq!(tensor.len(), 3 * 640 * 640);
        assert!((params.scale - 1.0).abs() < 1e-6);
        assert_eq!(params.pad_x, 0.0);
        assert_eq!(params.pad_y, 0.0);
    }

    #[test]
    fn test_letterbox_640x480() {
        let engine = engine();
        let frame = gray_frame(640, 480);
        let (_, params) = engine.preprocess(&frame);

        // scale = min(640/640, 640/480) = 1.0; pad_y = (640-480)/2 = 80
        assert!((params.scale - 1.0).abs() < 0.01);
        assert!((params.pad_x - 0.0).abs() < 1.0);
        assert!((params.pad_y - 80.0).abs() < 1.0);
    }

    #[test]
    fn test_letterbox_1920x1080() {
        let engine = engine();
        let frame = gray_frame(1920, 1080);
        let (tensor, params) = engine.preprocess(&frame);

        // scale = 640/1920 = 1/3; new_h = 360; pad_y = 140
        assert!((params.scale - 1.0 / 3.0).abs() < 0.01);
        assert!((params.pad_x - 0.0).abs() < 1.0);
        assert!((params.pad_y - 140.0).abs() < 1.0);
        assert_eq!(tensor.len(), 3 * 640 * 640);
    }

    #[test]
    fn test_letterbox_padding_fill() {
        let engine = engine();
        // Black image: the content region is 0.0, the padding is 114/255.
        let frame = gray_frame(1920, 1080);
        let (tensor, _) = engine.preprocess(&frame);

        let plane = 640 * 640;
        // Row 0 is entirely padding (pad_top = 140).
        for x in 0..640 {
            for c in 0..3 {
                assert!((tensor[c * plane + x] - 114.0 / 255.0).abs() < 1e-6);
            }
        }
        // Centre row is content.
        let centre = 320 * 640 + 320;
        assert_eq!(tensor[centre], 0.0);
    }

    #[test]
    fn test_letterbox_channel_order() {
        let engine = engine();
        let mut frame = gray_frame(640, 640);
        // One pure-red BGR pixel at (0, 0).
        frame.pixels[0] = 0; // B
        frame.pixels[1] = 0; // G
        frame.pixels[2] = 255; // R
        let (tensor, _) = engine.preprocess(&frame);

        let plane = 640 * 640;
        assert!((tensor[0] - 1.0).abs() < 1e-6); // R plane
        assert_eq!(tensor[plane], 0.0); // G plane
        assert_eq!(tensor[2 * plane], 0.0); // B plane
    }

    /// Build a flat [4+80, A] output with the given candidates.
    fn raw_output(candidates: &[(f32, f32, f32, f32, usize, f32)]) -> (Vec<f32>, usize) {
        let a = candidates.len();
        let mut out = vec![0.0f32; (4 + 80) * a];
        for (i, &(cx, cy, w, h, class, score)) in candidates.iter().enumerate() {
            out[i] = cx;
            out[a + i] = cy;
            out[2 * a + i] = w;
            out[3 * a + i] = h;
            out[(4 + class) * a + i] = score;
        }
        (out, a)
    }

    #[test]
    fn test_postprocess_reverse_letterbox() {
        let engine = engine();
        let frame = gray_frame(1920, 1080);
        let (_, params) = engine.preprocess(&frame);

        // A 100x100 box centred at (320, 320) in 640x640 space should land
        // around (810, 390)-(1110, 690) in the 1920x1080 frame.
        let (out, n) = raw_output(&[(320.0, 320.0, 100.0, 100.0, 0, 0.9)]);
        let dets = engine.postprocess(&out, n, 0.5, 0.45, params, 1920, 1080, &[]);

        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert!((d.x1 - 810.0).abs() < 3.0, "x1 = {}", d.x1);
        assert!((d.y1 - 390.0).abs() < 3.0, "y1 = {}", d.y1);
        assert!((d.x2 - 1110.0).abs() < 3.0, "x2 = {}", d.x2);
        assert!((d.y2 - 690.0).abs() < 3.0, "y2 = {}", d.y2);
        assert_eq!(d.class_name, "person");
    }

    #[test]
    fn test_postprocess_clamps_to_bounds() {
        let engine = engine();
        let params = LetterboxParams {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let (out, n) = raw_output(&[(5.0, 5.0, 40.0, 40.0, 2, 0.8)]);
        let dets = engine.postprocess(&out, n, 0.5, 0.45, params, 640, 640, &[]);

        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].x1, 0.0);
        assert_eq!(dets[0].y1, 0.0);
    }

    #[test]
    fn test_postprocess_confidence_threshold() {
        let engine = engine();
        let params = LetterboxParams {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let (out, n) = raw_output(&[
            (100.0, 100.0, 50.0, 50.0, 0, 0.4),
            (300.0, 300.0, 50.0, 50.0, 0, 0.6),
        ]);
        let dets = engine.postprocess(&out, n, 0.5, 0.45, params, 640, 640, &[]);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].confidence, 0.6);
    }

    #[test]
    fn test_postprocess_allow_list_excludes() {
        let engine = engine();
        let params = LetterboxParams {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        // A confident car is dropped when only "person" is allowed.
        let (out, n) = raw_output(&[
            (100.0, 100.0, 50.0, 50.0, 2, 0.95),
            (300.0, 300.0, 50.0, 50.0, 0, 0.7),
        ]);
        let dets = engine.postprocess(
            &out,
            n,
            0.5,
            0.45,
            params,
            640,
            640,
            &["person".to_string()],
        );
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_name, "person");
    }

    #[test]
    fn test_postprocess_discards_degenerate_boxes() {
        let engine = engine();
        let params = LetterboxParams {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let (out, n) = raw_output(&[(100.0, 100.0, 0.5, 40.0, 0, 0.9)]);
        let dets = engine.postprocess(&out, n, 0.5, 0.45, params, 640, 640, &[]);
        assert!(dets.is_empty());
    }
}
