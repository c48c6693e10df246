//! End-to-end properties of the detection pipeline: letterbox geometry,
//! reverse letterbox decoding, suppression and class filtering, exercised
//! through the public engine API without a model file.

use std::path::PathBuf;

use vigil::detect::{iou, suppress_per_class, Detection, DetectionEngine, COCO_CLASSES};
use vigil::frame::Frame;

fn engine() -> DetectionEngine {
    // No model on disk: preprocess/postprocess stay fully usable.
    DetectionEngine::new(&PathBuf::from("/nonexistent/model.onnx"))
}

fn frame(width: u32, height: u32) -> Frame {
    let mut frame = Frame::empty();
    frame.resize(width, height);
    frame
}

fn det(class_id: i32, confidence: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
    Detection {
        class_id,
        class_name: COCO_CLASSES[class_id as usize].to_string(),
        confidence,
        x1,
        y1,
        x2,
        y2,
    }
}

/// Flat [4+80, A] tensor from (cx, cy, w, h, class, score) candidates
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
fn letterbox_scale_and_pads_for_asymmetric_input() {
    let engine = engine();
    let (tensor, params) = engine.preprocess(&frame(1920, 1080));

    assert!((params.scale - 640.0 / 1920.0).abs() < 1e-3);
    assert!((params.pad_x - 0.0).abs() < 1.0);
    assert!((params.pad_y - 140.0).abs() < 1.0);
    assert_eq!(tensor.len(), 3 * 640 * 640);
}

#[test]
fn letterbox_identity_for_square_input() {
    let engine = engine();
    let (_, params) = engine.preprocess(&frame(640, 640));
    assert_eq!(params.scale, 1.0);
    assert_eq!(params.pad_x, 0.0);
    assert_eq!(params.pad_y, 0.0);
}

#[test]
fn letterbox_padding_region_is_neutral_gray() {
    let engine = engine();
    let (tensor, _) = engine.preprocess(&frame(1280, 720));

    // 1280x720 scales to 640x360 with 140 rows of padding top and bottom.
    let plane = 640 * 640;
    let gray = 114.0 / 255.0;
    for c in 0..3 {
        // First padded row per channel
        assert!((tensor[c * plane] - gray).abs() < 1e-6);
        // Last padded row per channel
        assert!((tensor[c * plane + plane - 1] - gray).abs() < 1e-6);
    }
}

#[test]
fn scenario_1920x1080_detection_decodes_to_original_coordinates() {
    let engine = engine();
    let (_, params) = engine.preprocess(&frame(1920, 1080));

    // A (320, 320)-centred 100x100 box in model space maps to roughly
    // (810, 390)-(1110, 690) in the camera frame.
    let (out, n) = raw_output(&[(320.0, 320.0, 100.0, 100.0, 0, 0.9)]);
    let dets = engine.postprocess(&out, n, 0.5, 0.45, params, 1920, 1080, &[]);

    assert_eq!(dets.len(), 1);
    let d = &dets[0];
    assert!((d.x1 - 810.0).abs() < 3.0);
    assert!((d.y1 - 390.0).abs() < 3.0);
    assert!((d.x2 - 1110.0).abs() < 3.0);
    assert!((d.y2 - 690.0).abs() < 3.0);
    assert!(d.x1 < d.x2 && d.y1 < d.y2);
}

#[test]
fn scenario_identical_boxes_of_different_classes_both_kept() {
    let kept = suppress_per_class(
        vec![
            det(0, 0.90, 0.0, 0.0, 100.0, 100.0),
            det(1, 0.85, 0.0, 0.0, 100.0, 100.0),
        ],
        0.45,
    );
    assert_eq!(kept.len(), 2);
}

#[test]
fn iou_properties() {
    let a = det(0, 0.9, 0.0, 0.0, 50.0, 50.0);
    let b = det(0, 0.8, 25.0, 25.0, 75.0, 75.0);
    let c = det(0, 0.7, 200.0, 200.0, 300.0, 300.0);

    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    assert_eq!(iou(&a, &c), 0.0);
    assert!((iou(&a, &b) - iou(&b, &a)).abs() < 1e-6);
    assert!((0.0..=1.0).contains(&iou(&a, &b)));
}

#[test]
fn allow_list_excludes_confident_other_classes() {
    let engine = engine();
    let params = vigil::detect::LetterboxParams {
        scale: 1.0,
        pad_x: 0.0,
        pad_y: 0.0,
    };
    let (out, n) = raw_output(&[
        (100.0, 100.0, 60.0, 60.0, 2, 0.99), // car, very confident
        (300.0, 300.0, 60.0, 60.0, 16, 0.80), // dog
    ]);
    let dets = engine.postprocess(&out, n, 0.5, 0.45, params, 640, 640, &["dog".to_string()]);

    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].class_name, "dog");
}

#[test]
fn empty_allow_list_accepts_everything() {
    let engine = engine();
    let params = vigil::detect::LetterboxParams {
        scale: 1.0,
        pad_x: 0.0,
        pad_y: 0.0,
    };
    let (out, n) = raw_output(&[
        (100.0, 100.0, 60.0, 60.0, 2, 0.9),
        (300.0, 300.0, 60.0, 60.0, 16, 0.8),
    ]);
    let dets = engine.postprocess(&out, n, 0.5, 0.45, params, 640, 640, &[]);
    assert_eq!(dets.len(), 2);
}

#[test]
fn class_table_anchors() {
    assert_eq!(COCO_CLASSES.len(), 80);
    assert_eq!(COCO_CLASSES[0], "person");
    assert_eq!(COCO_CLASSES[2], "car");
    assert_eq!(COCO_CLASSES[79], "toothbrush");
}

#[test]
fn results_are_sorted_by_confidence() {
    let engine = engine();
    let params = vigil::detect::LetterboxParams {
        scale: 1.0,
        pad_x: 0.0,
        pad_y: 0.0,
    };
    let (out, n) = raw_output(&[
        (100.0, 100.0, 60.0, 60.0, 0, 0.6),
        (300.0, 300.0, 60.0, 60.0, 2, 0.9),
        (500.0, 500.0, 60.0, 60.0, 16, 0.7),
    ]);
    let dets = engine.postprocess(&out, n, 0.5, 0.45, params, 640, 640, &[]);
    let scores: Vec<f32> = dets.iter().map(|d| d.confidence).collect();
    assert_eq!(scores, vec![0.9, 0.7, 0.6]);
}
