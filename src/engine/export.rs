//! Export pipeline
//!
//! Produces the print-ready raster for a stage:
//! 1. resolve the fixed target size and crop for the canvas type
//! 2. hide mask, lines and plate guides for the duration of the capture
//! 3. capture at `target_width / (crop_width * scale)` so the result does not
//!    depend on on-screen zoom
//! 4. redraw into a fresh target-sized surface
//! 5. car exports: cut the exterior away with the mask (destination-out)
//! 6. encode to PNG on a blocking task
//!
//! Only one export may run per pipeline at a time; a second request while one
//! is in flight fails with [`ExportError::Busy`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{CanvasType, ExportTarget, PlateSize};
use super::raster::{
    allocate_surface, blend_destination_out, composite_with, encode_png, resample_region, SurfaceError,
};
use super::stage::Stage;

/// Filename used for car wrap exports
pub const CAR_EXPORT_FILENAME: &str = "design-tesla-1024.png";

/// Length of the random plate id in plate filenames
pub const PLATE_ID_LEN: usize = 8;

const PLATE_ID_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Export errors
#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Context(#[from] SurfaceError),
    #[error("Failed to encode export: {0}")]
    Encode(#[from] image::ImageError),
    #[error("An export is already in progress")]
    Busy,
    #[error("Stage scale must be positive and finite, got {0}")]
    InvalidScale(f64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Encoding task failed: {0}")]
    Join(String),
}

/// Encoded export ready for download or upload
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub filename: String,
    pub bytes: Bytes,
    pub width: u32,
    pub height: u32,
    pub target: ExportTarget,
}

impl ExportArtifact {
    pub fn content_type(&self) -> &'static str {
        "image/png"
    }

    /// Write the artifact into `dir` under its filename
    pub async fn save_to(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        let path = dir.join(&self.filename);
        tokio::fs::write(&path, &self.bytes).await?;
        info!(path = %path.display(), bytes = self.bytes.len(), "Export saved");
        Ok(path)
    }
}

/// Filename for an export of the given canvas type
pub fn export_filename(canvas_type: CanvasType) -> String {
    match canvas_type {
        CanvasType::Car => CAR_EXPORT_FILENAME.to_string(),
        CanvasType::Plate => format!("PLATE{}.png", plate_id()),
    }
}

/// Random uppercase alphanumeric plate id
pub fn plate_id() -> String {
    let mut rng = rand::thread_rng();
    (0..PLATE_ID_LEN)
        .map(|_| PLATE_ID_CHARSET[rng.gen_range(0..PLATE_ID_CHARSET.len())] as char)
        .collect()
}

/// Marks the pipeline busy until dropped
struct FlightToken {
    flag: Arc<AtomicBool>,
}

impl Drop for FlightToken {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Captured and masked raster awaiting encoding
///
/// Holds the pipeline's in-flight slot until encoded or dropped.
pub struct PreparedExport {
    raster: RgbaImage,
    target: ExportTarget,
    _token: FlightToken,
}

impl PreparedExport {
    pub fn raster(&self) -> &RgbaImage {
        &self.raster
    }

    pub fn target(&self) -> ExportTarget {
        self.target
    }

    /// Encode the raster to PNG on a blocking task
    pub async fn encode(self) -> Result<ExportArtifact, ExportError> {
        let PreparedExport { raster, target, _token } = self;
        let (width, height) = raster.dimensions();

        let bytes = tokio::task::spawn_blocking(move || encode_png(&raster, target.quality))
            .await
            .map_err(|e| ExportError::Join(e.to_string()))??;

        let filename = export_filename(target.canvas_type);
        info!(
            filename = %filename,
            width = width,
            height = height,
            bytes = bytes.len(),
            "Export encoded"
        );

        Ok(ExportArtifact {
            filename,
            bytes: Bytes::from(bytes),
            width,
            height,
            target,
        })
    }
}

/// Single-flight export runner
#[derive(Debug, Default)]
pub struct ExportPipeline {
    in_flight: Arc<AtomicBool>,
}

impl ExportPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an export currently holds the pipeline
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Export using the stage's own canvas type and plate size
    pub async fn export(&self, stage: &mut Stage) -> Result<ExportArtifact, ExportError> {
        let (canvas_type, plate_size) = (stage.canvas_type(), stage.plate_size());
        self.export_as(stage, canvas_type, plate_size).await
    }

    /// Export the stage as the given canvas type and plate size
    pub async fn export_as(
        &self,
        stage: &mut Stage,
        canvas_type: CanvasType,
        plate_size: PlateSize,
    ) -> Result<ExportArtifact, ExportError> {
        self.prepare(stage, canvas_type, plate_size)?.encode().await
    }

    /// Capture, rescale and mask the stage without encoding
    ///
    /// Overlay visibility is restored before this returns, on success or error.
    pub fn prepare(
        &self,
        stage: &mut Stage,
        canvas_type: CanvasType,
        plate_size: PlateSize,
    ) -> Result<PreparedExport, ExportError> {
        let token = self.acquire()?;

        let target = ExportTarget::resolve(canvas_type, plate_size, stage.width(), stage.height());
        let scale = stage.scale();
        if !scale.is_finite() || scale <= 0.0 {
            return Err(ExportError::InvalidScale(scale));
        }

        let crop = target.crop;
        let pixel_ratio = target.width as f64 / (crop.width as f64 * scale);

        debug!(
            canvas_type = %canvas_type,
            target_width = target.width,
            target_height = target.height,
            crop_y = crop.y,
            crop_height = crop.height,
            scale = scale,
            pixel_ratio = pixel_ratio,
            "Capturing export"
        );

        let captured = {
            let overlays_hidden = stage.hide_overlays();
            overlays_hidden.capture(crop, pixel_ratio)?
        };

        let mut surface = allocate_surface(target.width, target.height, stage.max_surface_pixels())?;
        if captured.dimensions() == (target.width, target.height) {
            imageops::replace(&mut surface, &captured, 0, 0);
        } else {
            let resized = imageops::resize(&captured, target.width, target.height, FilterType::Triangle);
            imageops::replace(&mut surface, &resized, 0, 0);
        }

        if canvas_type == CanvasType::Car {
            match stage.segmentation() {
                Some(segmentation) => {
                    let cutter = resample_region(segmentation.mask(), crop, target.width, target.height);
                    composite_with(&mut surface, &cutter, blend_destination_out);
                }
                None => warn!("No mask available, exporting car design unmasked"),
            }
        }

        Ok(PreparedExport {
            raster: surface,
            target,
            _token: token,
        })
    }

    fn acquire(&self) -> Result<FlightToken, ExportError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ExportError::Busy)?;
        Ok(FlightToken {
            flag: Arc::clone(&self.in_flight),
        })
    }
}
