//! Wrap design engine
//!
//! This module contains the core pipeline:
//! - Template segmentation into exterior, interior and line art
//! - Layer store for placed textures and freehand strokes
//! - Stage compositing in a fixed draw order
//! - Print-ready export at a fixed resolution

pub mod export;
pub mod layers;
pub mod raster;
pub mod segmentation;
pub mod stage;
pub mod template;

pub use export::{ExportArtifact, ExportError, ExportPipeline, PreparedExport};
pub use layers::{Layer, LayerStore, Stroke, FULL_WRAP_LAYER};
pub use raster::SurfaceError;
pub use segmentation::{segment, segment_bytes, PixelClass, SegmentOptions, Segmentation, SegmentationError};
pub use stage::{fit_scale, OverlayGuard, OverlayVisibility, Stage};
pub use template::{Studio, StudioExportError, Template, TemplateError, TemplateManager, TemplateMetadata};
