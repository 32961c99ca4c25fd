use serde::{Deserialize, Serialize};

/// A single vertex of a normalized bounding polygon (0.0..=1.0 on both axes)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vertex {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
}

/// Axis-aligned box in normalized image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl NormalizedBox {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left: left.clamp(0.0, 1.0),
            top: top.clamp(0.0, 1.0),
            right: right.clamp(0.0, 1.0),
            bottom: bottom.clamp(0.0, 1.0),
        }
    }

    /// Build the enclosing box of a polygon. Returns None for an empty polygon.
    pub fn from_vertices(vertices: &[Vertex]) -> Option<Self> {
        let first = vertices.first()?;
        let mut left = first.x;
        let mut top = first.y;
        let mut right = first.x;
        let mut bottom = first.y;

        for v in &vertices[1..] {
            left = left.min(v.x);
            top = top.min(v.y);
            right = right.max(v.x);
            bottom = bottom.max(v.y);
        }

        Some(Self::new(left, top, right, bottom))
    }

    pub fn width(&self) -> f32 {
        (self.right - self.left).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.bottom - self.top).max(0.0)
    }

    /// Convert to pixel space for an image of the given size: (x, y, width, height)
    pub fn to_pixels(&self, img_width: u32, img_height: u32) -> (i32, i32, u32, u32) {
        let x = (self.left * img_width as f32).round() as i32;
        let y = (self.top * img_height as f32).round() as i32;
        let w = (self.width() * img_width as f32).round().max(1.0) as u32;
        let h = (self.height() * img_height as f32).round().max(1.0) as u32;
        (x, y, w, h)
    }
}

/// One object returned by the detection service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub label: String,
    /// Confidence score in 0.0..=1.0
    pub confidence: f32,
    pub bbox: NormalizedBox,
}

impl DetectionRecord {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: NormalizedBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }

    /// Case-insensitive label match against any of the given labels
    pub fn has_label<S: AsRef<str>>(&self, labels: &[S]) -> bool {
        labels
            .iter()
            .any(|l| l.as_ref().eq_ignore_ascii_case(self.label.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_from_polygon_takes_extremes() {
        let poly = [
            Vertex { x: 0.2, y: 0.1 },
            Vertex { x: 0.6, y: 0.1 },
            Vertex { x: 0.6, y: 0.9 },
            Vertex { x: 0.2, y: 0.9 },
        ];
        let b = NormalizedBox::from_vertices(&poly).unwrap();
        assert_eq!(b, NormalizedBox::new(0.2, 0.1, 0.6, 0.9));
        assert!((b.width() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn empty_polygon_has_no_box() {
        assert!(NormalizedBox::from_vertices(&[]).is_none());
    }

    #[test]
    fn label_match_ignores_case() {
        let rec = DetectionRecord::new("Person", 0.9, NormalizedBox::new(0.0, 0.0, 1.0, 1.0));
        assert!(rec.has_label(&["person", "pedestrian"]));
        assert!(!rec.has_label(&["car"]));
    }

    #[test]
    fn pixel_conversion_never_yields_empty_box() {
        let b = NormalizedBox::new(0.5, 0.5, 0.5, 0.5);
        let (x, y, w, h) = b.to_pixels(100, 50);
        assert_eq!((x, y, w, h), (50, 25, 1, 1));
    }
}
