/// Bounding boxes and frame geometry
pub mod bbox;
