//! Template segmentation
//!
//! Splits a line-art template into three pixel classes:
//! - LINE: dark pixels (average RGB at or below the threshold)
//! - EXTERIOR: bright pixels 4-connected to the top-left corner
//! - INTERIOR: bright pixels enclosed by line art
//!
//! Two rasters are derived from the classification: the mask (fill color on
//! EXTERIOR) and the line-art guide (light gray on LINE). They never overlap.

use image::{DynamicImage, Rgba, RgbaImage};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ExportSettings, SegmentationSettings};
use crate::domain::{parse_hex_color, ColorError};
use crate::sources::SourceError;
use super::raster::{allocate_surface, composite_over_white, SurfaceError, DEFAULT_MAX_SURFACE_PIXELS};

/// Default brightness threshold
pub const DEFAULT_THRESHOLD: u8 = 200;

/// Default line-art guide color (light gray)
pub const LINE_GUIDE_COLOR: Rgba<u8> = Rgba([211, 211, 211, 255]);

/// Default mask fill color
pub const DEFAULT_FILL_COLOR: Rgba<u8> = Rgba([74, 144, 217, 255]);

/// Segmentation errors
#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("Failed to load template: {0}")]
    Load(#[from] SourceError),
    #[error(transparent)]
    Context(#[from] SurfaceError),
}

/// Per-pixel template classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelClass {
    Line,
    Exterior,
    Interior,
}

/// Segmentation parameters
#[derive(Debug, Clone)]
pub struct SegmentOptions {
    pub threshold: u8,
    pub fill_color: Rgba<u8>,
    pub line_color: Rgba<u8>,
    pub max_surface_pixels: u64,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        SegmentOptions {
            threshold: DEFAULT_THRESHOLD,
            fill_color: DEFAULT_FILL_COLOR,
            line_color: LINE_GUIDE_COLOR,
            max_surface_pixels: DEFAULT_MAX_SURFACE_PIXELS,
        }
    }
}

impl SegmentOptions {
    /// Build options from configuration
    pub fn from_settings(
        segmentation: &SegmentationSettings,
        export: &ExportSettings,
    ) -> Result<Self, ColorError> {
        Ok(SegmentOptions {
            threshold: segmentation.threshold,
            fill_color: opaque(parse_hex_color(&segmentation.fill_color)?),
            line_color: parse_hex_color(&segmentation.line_color)?,
            max_surface_pixels: export.max_surface_pixels,
        })
    }
}

/// The mask doubles as the export cutter, so its fill is always opaque
fn opaque(color: Rgba<u8>) -> Rgba<u8> {
    Rgba([color.0[0], color.0[1], color.0[2], 255])
}

/// Pixel counts per class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassCounts {
    pub line: u64,
    pub exterior: u64,
    pub interior: u64,
}

/// Result of segmenting one template
///
/// Built in full before it is handed out, so a caller swapping it in never
/// observes a mask without its matching lines image.
#[derive(Debug, Clone)]
pub struct Segmentation {
    width: u32,
    height: u32,
    classes: Vec<PixelClass>,
    counts: ClassCounts,
    mask: RgbaImage,
    lines: RgbaImage,
}

impl Segmentation {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn counts(&self) -> ClassCounts {
        self.counts
    }

    /// Class of the pixel at `(x, y)`, if inside the template
    pub fn classify(&self, x: u32, y: u32) -> Option<PixelClass> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.classes[y as usize * self.width as usize + x as usize])
    }

    /// Fill color on EXTERIOR, transparent elsewhere
    pub fn mask(&self) -> &RgbaImage {
        &self.mask
    }

    /// Guide color on LINE, transparent elsewhere
    pub fn lines(&self) -> &RgbaImage {
        &self.lines
    }
}

/// Decode an encoded template and segment it
pub fn segment_bytes(bytes: &[u8], options: &SegmentOptions) -> Result<Segmentation, SegmentationError> {
    let image = image::load_from_memory(bytes).map_err(SourceError::Decode)?;
    segment(&image, options)
}

/// Segment a decoded template
pub fn segment(image: &DynamicImage, options: &SegmentOptions) -> Result<Segmentation, SegmentationError> {
    let (width, height) = (image.width(), image.height());

    // Allocate both outputs up front so a surface failure leaves nothing half-built
    let mut mask = allocate_surface(width, height, options.max_surface_pixels)?;
    let mut lines = allocate_surface(width, height, options.max_surface_pixels)?;

    let flat = composite_over_white(image);

    let open = threshold_open(&flat, options.threshold);
    let reached = flood_fill_from_origin(&open, width as usize, height as usize);

    let classes: Vec<PixelClass> = open
        .par_iter()
        .zip(reached.par_iter())
        .map(|(&is_open, &is_reached)| match (is_open, is_reached) {
            (false, _) => PixelClass::Line,
            (true, true) => PixelClass::Exterior,
            (true, false) => PixelClass::Interior,
        })
        .collect();

    let mut counts = ClassCounts::default();
    for class in &classes {
        match class {
            PixelClass::Line => counts.line += 1,
            PixelClass::Exterior => counts.exterior += 1,
            PixelClass::Interior => counts.interior += 1,
        }
    }

    paint_class(&mut mask, &classes, PixelClass::Exterior, options.fill_color);
    paint_class(&mut lines, &classes, PixelClass::Line, options.line_color);

    info!(
        width = width,
        height = height,
        threshold = options.threshold,
        exterior = counts.exterior,
        interior = counts.interior,
        line = counts.line,
        "Template segmented"
    );

    Ok(Segmentation {
        width,
        height,
        classes,
        counts,
        mask,
        lines,
    })
}

/// Binary open map: true where average RGB exceeds the threshold
fn threshold_open(flat: &RgbaImage, threshold: u8) -> Vec<bool> {
    let limit = threshold as u32 * 3;
    flat.par_chunks(4)
        .map(|px| px[0] as u32 + px[1] as u32 + px[2] as u32 > limit)
        .collect()
}

/// Iterative 4-neighbor flood fill over the open set, seeded at (0, 0)
///
/// Uses an explicit stack of flat indices; every pixel is pushed at most once.
fn flood_fill_from_origin(open: &[bool], width: usize, height: usize) -> Vec<bool> {
    let mut reached = vec![false; width * height];

    if open.is_empty() || !open[0] {
        debug!("Template origin is line art, no exterior region");
        return reached;
    }

    let mut stack: Vec<usize> = Vec::with_capacity(4096);
    reached[0] = true;
    stack.push(0);

    while let Some(idx) = stack.pop() {
        let x = idx % width;
        let y = idx / width;

        let mut visit = |ni: usize| {
            if open[ni] && !reached[ni] {
                reached[ni] = true;
                stack.push(ni);
            }
        };

        if x > 0 {
            visit(idx - 1);
        }
        if x + 1 < width {
            visit(idx + 1);
        }
        if y > 0 {
            visit(idx - width);
        }
        if y + 1 < height {
            visit(idx + width);
        }
    }

    reached
}

fn paint_class(surface: &mut RgbaImage, classes: &[PixelClass], class: PixelClass, color: Rgba<u8>) {
    surface
        .par_chunks_mut(4)
        .zip(classes.par_iter())
        .for_each(|(px, &c)| {
            if c == class {
                px.copy_from_slice(&color.0);
            }
        });
}
