//! Canvas types and export targets
//!
//! A design is either a full car wrap or a license plate. The canvas type and
//! plate size decide the fixed output resolution and which part of the
//! template is captured.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Car wrap export edge length
pub const CAR_EXPORT_SIZE: u32 = 1024;

/// Plate template width shared by both plate variants
pub const PLATE_WIDTH: u32 = 420;

/// Canvas parsing errors
#[derive(Debug, Error)]
pub enum CanvasError {
    #[error("Unknown canvas type: {0}")]
    UnknownCanvasType(String),
    #[error("Unknown plate size: {0}")]
    UnknownPlateSize(String),
}

/// What kind of surface the stage represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CanvasType {
    #[default]
    Car,
    Plate,
}

impl FromStr for CanvasType {
    type Err = CanvasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "car" => Ok(CanvasType::Car),
            "plate" => Ok(CanvasType::Plate),
            _ => Err(CanvasError::UnknownCanvasType(s.to_string())),
        }
    }
}

impl fmt::Display for CanvasType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanvasType::Car => write!(f, "car"),
            CanvasType::Plate => write!(f, "plate"),
        }
    }
}

/// License plate size variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
pub enum PlateSize {
    #[serde(rename = "420x100")]
    Narrow,
    #[default]
    #[serde(rename = "420x200")]
    Tall,
}

impl PlateSize {
    /// Printed height of the plate in pixels
    pub fn height(&self) -> u32 {
        match self {
            PlateSize::Narrow => 100,
            PlateSize::Tall => 200,
        }
    }
}

impl FromStr for PlateSize {
    type Err = CanvasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "420x100" => Ok(PlateSize::Narrow),
            "420x200" => Ok(PlateSize::Tall),
            _ => Err(CanvasError::UnknownPlateSize(s.to_string())),
        }
    }
}

impl fmt::Display for PlateSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", PLATE_WIDTH, self.height())
    }
}

/// Axis-aligned rectangle in template pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// Rectangle covering a whole `width` x `height` template
    pub fn full(width: u32, height: u32) -> Self {
        CropRect { x: 0, y: 0, width, height }
    }
}

/// Fixed output resolution and capture region for one export
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct ExportTarget {
    pub canvas_type: CanvasType,
    pub width: u32,
    pub height: u32,
    pub crop: CropRect,
    /// Encoder quality in [0, 1]
    pub quality: f32,
}

impl ExportTarget {
    /// Resolve the export target for a template of the given size
    ///
    /// Car exports always cover the whole template at 1024x1024. Plate
    /// exports keep their printed size; the narrow variant captures the
    /// vertical middle band of the tall template.
    pub fn resolve(
        canvas_type: CanvasType,
        plate_size: PlateSize,
        template_width: u32,
        template_height: u32,
    ) -> Self {
        match canvas_type {
            CanvasType::Car => ExportTarget {
                canvas_type,
                width: CAR_EXPORT_SIZE,
                height: CAR_EXPORT_SIZE,
                crop: CropRect::full(template_width, template_height),
                quality: 1.0,
            },
            CanvasType::Plate => {
                let height = plate_size.height();
                let crop = match plate_size {
                    PlateSize::Tall => CropRect::full(template_width, template_height),
                    PlateSize::Narrow => {
                        let band = height.min(template_height);
                        CropRect {
                            x: 0,
                            y: (template_height - band) / 2,
                            width: template_width,
                            height: band,
                        }
                    }
                };

                ExportTarget {
                    canvas_type,
                    width: PLATE_WIDTH,
                    height,
                    crop,
                    quality: 0.5,
                }
            }
        }
    }
}
