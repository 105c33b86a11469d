//! Domain types and models

mod canvas;
mod color;
mod transform;

pub use canvas::{
    CanvasError, CanvasType, CropRect, ExportTarget, PlateSize, CAR_EXPORT_SIZE, PLATE_WIDTH,
};
pub use color::{parse_hex_color, ColorError};
pub use transform::{Transform, TransformPatch};
