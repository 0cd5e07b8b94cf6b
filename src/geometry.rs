use image::{ DynamicImage, GenericImageView };
use imageproc::rect::Rect;
use serde::{ Deserialize, Serialize };

use crate::error::LprError;

/// Axis-aligned plate box in source pixel coordinates, `x2`/`y2` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub confidence: f32,
}

impl DetectionBox {

    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32, confidence: f32) -> Self {
        Self { x1, y1, x2, y2, confidence }
    }

    /// Build a box from fractions in `[ymin, xmin, ymax, xmax]` order, the layout
    /// SSD style graphs emit.
    pub fn from_normalized(v: [f32; 4], width: u32, height: u32, confidence: f32) -> Self {
        let y1 = (v[0] * height as f32) as i32;
        let x1 = (v[1] * width as f32) as i32;
        let y2 = (v[2] * height as f32) as i32;
        let x2 = (v[3] * width as f32) as i32;
        Self { x1, y1, x2, y2, confidence }
    }

    pub fn width(&self) -> u32 {
        (self.x2 as i64 - self.x1 as i64).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 as i64 - self.y1 as i64).max(0) as u32
    }

    /// Degenerate or inverted boxes have area 0.
    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn passes_area_threshold(&self, min_area: u64) -> bool {
        self.area() > min_area
    }

    pub fn passes_confidence(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }

    /// Intersect with an image of the given size.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let clamp_x = |v: i32| v.clamp(0, width as i32);
        let clamp_y = |v: i32| v.clamp(0, height as i32);
        Self {
            x1: clamp_x(self.x1),
            y1: clamp_y(self.y1),
            x2: clamp_x(self.x2),
            y2: clamp_y(self.y2),
            confidence: self.confidence,
        }
    }

    /// Cut the region out of `img`. Parts outside the image are dropped; an
    /// empty remainder is an `InvalidRegion`.
    pub fn crop(&self, img: &DynamicImage) -> Result<DynamicImage, LprError> {
        if self.x1 >= self.x2 || self.y1 >= self.y2 {
            return Err(LprError::invalid_region(format!("malformed box {:?}", self)));
        }
        let (width, height) = img.dimensions();
        let clamped = self.clamp_to(width, height);
        if clamped.area() == 0 {
            return Err(LprError::invalid_region(format!(
                "box {:?} lies outside the {}x{} image", self, width, height
            )));
        }
        Ok(img.crop_imm(clamped.x1 as u32, clamped.y1 as u32, clamped.width(), clamped.height()))
    }

    pub fn to_rect(&self) -> Option<Rect> {
        if self.area() == 0 {
            return None;
        }
        Some(Rect::at(self.x1, self.y1).of_size(self.width(), self.height()))
    }
}

pub fn area(a_box: &DetectionBox) -> u64 {
    a_box.area()
}

pub fn passes_area_threshold(a_box: &DetectionBox, min_area: u64) -> bool {
    a_box.passes_area_threshold(min_area)
}

/// Intersection over union, 0 when either box is empty.
pub fn iou(a: &DetectionBox, b: &DetectionBox) -> f32 {
    let inter = DetectionBox::new(a.x1.max(b.x1), a.y1.max(b.y1), a.x2.min(b.x2), a.y2.min(b.y2), 0.0);
    let inter_area = inter.area();
    let union = a.area() + b.area() - inter_area;
    if union == 0 {
        return 0.0;
    }
    inter_area as f32 / union as f32
}

/// Greedy overlap suppression. A box is dropped when it overlaps a more
/// confident box by more than `iou_threshold`; survivors keep emission order.
pub fn suppress_overlaps(boxes: &[DetectionBox], iou_threshold: f32) -> Vec<DetectionBox> {
    let mut order: Vec<usize> = (0..boxes.len()).collect();
    order.sort_by(|&a, &b| {
        boxes[b].confidence.partial_cmp(&boxes[a].confidence).unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut keep = vec![false; boxes.len()];
    let mut kept: Vec<usize> = Vec::new();
    for index in order {
        let candidate = &boxes[index];
        if kept.iter().all(|&k| iou(&boxes[k], candidate) <= iou_threshold) {
            keep[index] = true;
            kept.push(index);
        }
    }
    boxes.iter().zip(keep).filter(|(_, k)| *k).map(|(b, _)| *b).collect()
}
