use crate::snapshot::number_or_string;
use serde::{Deserialize, Serialize};

/// Bounding box in the format (x, y, width, height), pixel units
///
#[derive(Clone, Default, Debug, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

impl BoundingBox {
    /// Constructor
    ///
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Whether a crop of the box can be cut from a frame of the given size
    ///
    pub fn fits(&self, frame: &FrameDimensions) -> bool {
        frame.is_valid()
            && self.area() > 0.0
            && self.x >= 0.0
            && self.y >= 0.0
            && self.x + self.width <= frame.w as f32
            && self.y + self.height <= frame.h as f32
    }
}

/// Frame size as reported by the pipeline
///
#[derive(Clone, Default, Debug, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDimensions {
    #[serde(default, deserialize_with = "number_or_string")]
    pub w: u32,
    #[serde(default, deserialize_with = "number_or_string")]
    pub h: u32,
}

impl FrameDimensions {
    pub fn new(w: u32, h: u32) -> Self {
        Self { w, h }
    }

    pub fn is_valid(&self) -> bool {
        self.w > 0 && self.h > 0
    }
}

#[cfg(test)]
mod tests {
    use crate::utils::bbox::{BoundingBox, FrameDimensions};

    #[test]
    fn fits_into_frame() {
        let frame = FrameDimensions::new(640, 480);
        assert!(BoundingBox::new(0.0, 0.0, 640.0, 480.0).fits(&frame));
        assert!(BoundingBox::new(10.0, 20.0, 100.0, 50.0).fits(&frame));
        assert!(!BoundingBox::new(600.0, 20.0, 100.0, 50.0).fits(&frame));
        assert!(!BoundingBox::new(-1.0, 20.0, 10.0, 50.0).fits(&frame));
        assert!(!BoundingBox::new(10.0, 20.0, 0.0, 50.0).fits(&frame));
        assert!(!BoundingBox::new(10.0, 20.0, 10.0, 10.0).fits(&FrameDimensions::default()));
    }

    #[test]
    fn deserialize_box() {
        let bbox: BoundingBox =
            serde_json::from_str(r#"{"x": 1, "y": 2.5, "width": 30, "height": 40}"#).unwrap();
        assert_eq!(bbox, BoundingBox::new(1.0, 2.5, 30.0, 40.0));
    }

    #[test]
    fn frame_dimensions_accept_strings() {
        let frame: FrameDimensions = serde_json::from_str(r#"{"w": "1920", "h": 1080}"#).unwrap();
        assert_eq!(frame, FrameDimensions::new(1920, 1080));
        let frame: FrameDimensions = serde_json::from_str("{}").unwrap();
        assert!(!frame.is_valid());
    }
}
