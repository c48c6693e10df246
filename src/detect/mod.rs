//! Detection data structures and box geometry
//!
//! The `Detection` type, the fixed 80-class COCO name table, IoU, and the
//! per-class non-maximum suppression used by the engine's postprocess.

use std::collections::HashMap;
use std::fmt;

pub mod engine;

pub use engine::{DetectionEngine, LetterboxParams};

/// The standard 80-class COCO name table. Class ids index into this.
pub const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// A detected object with bounding box in original image coordinates
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class_id: i32,
    pub class_name: String,
    /// Confidence score in [0.0, 1.0]
    pub confidence: f32,
    /// Left X coordinate
    pub x1: f32,
    /// Top Y coordinate
    pub y1: f32,
    /// Right X coordinate
    pub x2: f32,
    /// Bottom Y coordinate
    pub y2: f32,
}

impl Detection {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.1}% ({:.0},{:.0})-({:.0},{:.0})",
            self.class_name,
            self.confidence * 100.0,
            self.x1,
            self.y1,
            self.x2,
            self.y2
        )
    }
}

/// Intersection over union of two axis-aligned boxes.
///
/// Returns 0.0 for disjoint boxes and for a degenerate union.
pub fn iou(a: &Detection, b: &Detection) -> f32 {
    let inter_x1 = a.x1.max(b.x1);
    let inter_y1 = a.y1.max(b.y1);
    let inter_x2 = a.x2.min(b.x2);
    let inter_y2 = a.y2.min(b.y2);

    let inter_w = (inter_x2 - inter_x1).max(0.0);
    let inter_h = (inter_y2 - inter_y1).max(0.0);
    let inter_area = inter_w * inter_h;

    let union_area = a.area() + b.area() - inter_area;
    if union_area <= 0.0 {
        return 0.0;
    }
    inter_area / union_area
}

/// Non-maximum suppression applied independently within each class.
///
/// Within a class, candidates are ranked by descending confidence and any
/// later box overlapping a kept one above `iou_threshold` is dropped. Boxes
/// of different classes never suppress each other. The result is sorted by
/// descending confidence across all classes.
pub fn suppress_per_class(detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return detections;
    }

    let mut by_class: HashMap<i32, Vec<usize>> = HashMap::new();
    for (idx, det) in detections.iter().enumerate() {
        by_class.entry(det.class_id).or_default().push(idx);
    }

    let mut keep = Vec::new();
    for indices in by_class.values_mut() {
        indices.sort_by(|&a, &b| {
            detections[b]
                .confidence
                .partial_cmp(&detections[a].confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut suppressed = vec![false; indices.len()];
        for i in 0..indices.len() {
            if suppressed[i] {
                continue;
            }
            keep.push(indices[i]);
            for j in (i + 1)..indices.len() {
                if suppressed[j] {
                    continue;
                }
                if iou(&detections[indices[i]], &detections[indices[j]]) > iou_threshold {
                    suppressed[j] = true;
                }
            }
        }
    }

    let mut result: Vec<Detection> = {
        let mut slots: Vec<Option<Detection>> = detections.into_iter().map(Some).collect();
        keep.into_iter()
            .filter_map(|idx| slots[idx].take())
            .collect()
    };

    result.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    result
}
