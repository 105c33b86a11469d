//! Template library and editing session
//!
//! Templates live on disk as one directory per model:
//!
//! ```text
//! templates/
//! └── model-3/
//!     ├── metadata.json   # id, name, canvas_type, plate_size
//!     └── template.png
//! ```
//!
//! Each template is segmented once when loaded. A [`Studio`] owns the stage
//! being edited and rebuilds it whenever the selected model changes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbaImage;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::domain::{CanvasType, PlateSize};
use crate::sources::{ImageLoader, ImageSource, SourceError};
use super::export::{ExportArtifact, ExportError, ExportPipeline};
use super::layers::LayerStore;
use super::raster::SurfaceError;
use super::segmentation::{segment, segment_bytes, SegmentOptions, Segmentation, SegmentationError};
use super::stage::Stage;

/// Template-related errors
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),
    #[error("Failed to load template image: {0}")]
    ImageLoad(#[from] SourceError),
    #[error("Failed to load metadata: {0}")]
    MetadataLoad(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Segmentation failed: {0}")]
    Segmentation(#[from] SegmentationError),
    #[error("No model selected")]
    NoModelSelected,
}

/// Template metadata loaded from metadata.json
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TemplateMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub canvas_type: CanvasType,
    #[serde(default)]
    pub plate_size: Option<PlateSize>,
    /// Template image filename inside the template directory
    #[serde(default = "default_image_file")]
    pub image: String,
}

fn default_image_file() -> String {
    "template.png".to_string()
}

/// A segmented template held in memory
#[derive(Debug)]
pub struct Template {
    pub metadata: TemplateMetadata,
    pub segmentation: Arc<Segmentation>,
}

impl Template {
    /// Load and segment a template from a directory
    pub fn load(path: &Path, options: &SegmentOptions) -> Result<Self, TemplateError> {
        let metadata_path = path.join("metadata.json");
        let metadata_content = std::fs::read_to_string(&metadata_path)
            .map_err(|e| TemplateError::MetadataLoad(format!("{}: {}", metadata_path.display(), e)))?;
        let metadata: TemplateMetadata = serde_json::from_str(&metadata_content)?;

        let image_bytes = std::fs::read(path.join(&metadata.image))?;
        let segmentation = segment_bytes(&image_bytes, options)?;

        info!(
            id = %metadata.id,
            canvas_type = %metadata.canvas_type,
            width = segmentation.width(),
            height = segmentation.height(),
            "Loaded template"
        );

        Ok(Template {
            metadata,
            segmentation: Arc::new(segmentation),
        })
    }

    pub fn plate_size(&self) -> PlateSize {
        self.metadata.plate_size.unwrap_or_default()
    }

    /// Fresh, empty stage for this template
    pub fn new_stage(&self, max_surface_pixels: u64) -> Stage {
        Stage::from_segmentation(
            Arc::clone(&self.segmentation),
            self.metadata.canvas_type,
            self.plate_size(),
        )
        .with_max_surface_pixels(max_surface_pixels)
    }
}

/// Manages all templates in memory
pub struct TemplateManager {
    templates: RwLock<HashMap<String, Arc<Template>>>,
    base_path: PathBuf,
    options: SegmentOptions,
}

impl TemplateManager {
    /// Create a new template manager
    pub fn new(base_path: &Path, options: SegmentOptions) -> Self {
        TemplateManager {
            templates: RwLock::new(HashMap::new()),
            base_path: base_path.to_path_buf(),
            options,
        }
    }

    pub fn options(&self) -> &SegmentOptions {
        &self.options
    }

    /// Load all templates from the base directory
    pub async fn load_all(&self) -> Result<(), TemplateError> {
        let base_path = self.base_path.clone();
        let options = self.options.clone();

        // Decoding and flood fill are CPU bound
        let templates = tokio::task::spawn_blocking(move || {
            let mut loaded = HashMap::new();

            if !base_path.exists() {
                warn!("Templates directory does not exist: {}", base_path.display());
                return Ok(loaded);
            }

            for entry in std::fs::read_dir(&base_path)? {
                let entry = entry?;
                let path = entry.path();

                if path.is_dir() && path.join("metadata.json").exists() {
                    match Template::load(&path, &options) {
                        Ok(template) => {
                            let id = template.metadata.id.clone();
                            loaded.insert(id, Arc::new(template));
                        }
                        Err(e) => {
                            warn!(
                                path = %path.display(),
                                error = %e,
                                "Failed to load template"
                            );
                        }
                    }
                }
            }

            Ok::<_, TemplateError>(loaded)
        })
        .await
        .map_err(|e| TemplateError::MetadataLoad(format!("Task join error: {}", e)))??;

        // Swap the whole map at once
        let mut guard = self.templates.write();
        *guard = templates;

        Ok(())
    }

    /// Fetch, segment and register a template from any image source
    pub async fn load_from_source(
        &self,
        metadata: TemplateMetadata,
        loader: &ImageLoader,
        source: &ImageSource,
    ) -> Result<Arc<Template>, TemplateError> {
        let image = loader.load(source).await?;
        let options = self.options.clone();

        let segmentation = tokio::task::spawn_blocking(move || segment(&image, &options))
            .await
            .map_err(|e| TemplateError::MetadataLoad(format!("Task join error: {}", e)))??;

        let template = Arc::new(Template {
            metadata,
            segmentation: Arc::new(segmentation),
        });
        self.insert(Arc::clone(&template));
        Ok(template)
    }

    /// Register an already-segmented template, replacing any with the same id
    pub fn insert(&self, template: Arc<Template>) {
        self.templates
            .write()
            .insert(template.metadata.id.clone(), template);
    }

    /// Get a template by ID
    pub fn get(&self, id: &str) -> Option<Arc<Template>> {
        self.templates.read().get(id).cloned()
    }

    /// Get the number of loaded templates
    pub fn template_count(&self) -> usize {
        self.templates.read().len()
    }

    /// All template metadata, sorted by id
    pub fn list(&self) -> Vec<TemplateMetadata> {
        let mut list: Vec<TemplateMetadata> = self
            .templates
            .read()
            .values()
            .map(|t| t.metadata.clone())
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }
}

/// One user's editing session
///
/// Switching models replaces the stage wholesale: layers, strokes and
/// selection are dropped and the new template's mask and lines arrive
/// together.
pub struct Studio {
    templates: Arc<TemplateManager>,
    stage: Mutex<Option<(String, Stage)>>,
    container: Mutex<(f64, f64)>,
    pipeline: ExportPipeline,
    max_surface_pixels: u64,
}

impl Studio {
    pub fn new(templates: Arc<TemplateManager>) -> Self {
        let max_surface_pixels = templates.options().max_surface_pixels;
        Studio {
            templates,
            stage: Mutex::new(None),
            container: Mutex::new((0.0, 0.0)),
            pipeline: ExportPipeline::new(),
            max_surface_pixels,
        }
    }

    /// Id of the selected model
    pub fn model_id(&self) -> Option<String> {
        self.stage.lock().as_ref().map(|(id, _)| id.clone())
    }

    /// Switch to another model
    pub fn select_model(&self, id: &str) -> Result<(), TemplateError> {
        let template = self
            .templates
            .get(id)
            .ok_or_else(|| TemplateError::NotFound(id.to_string()))?;

        let mut stage = template.new_stage(self.max_surface_pixels);
        let (cw, ch) = *self.container.lock();
        if cw > 0.0 && ch > 0.0 {
            stage.resize_container(cw, ch);
        }

        info!(model_id = %id, canvas_type = %stage.canvas_type(), "Model selected");
        *self.stage.lock() = Some((id.to_string(), stage));
        Ok(())
    }

    /// Record the container size and refit the current stage
    pub fn resize_container(&self, width: f64, height: f64) {
        *self.container.lock() = (width, height);
        if let Some((_, stage)) = self.stage.lock().as_mut() {
            stage.resize_container(width, height);
        }
    }

    /// Run a closure against the current stage
    pub fn with_stage<R>(&self, f: impl FnOnce(&mut Stage) -> R) -> Result<R, TemplateError> {
        let mut guard = self.stage.lock();
        let (_, stage) = guard.as_mut().ok_or(TemplateError::NoModelSelected)?;
        Ok(f(stage))
    }

    /// Run a closure against the current stage's layer store
    pub fn with_layers<R>(&self, f: impl FnOnce(&mut LayerStore) -> R) -> Result<R, TemplateError> {
        self.with_stage(|stage| f(stage.layers_mut()))
    }

    /// Snapshot for external previewers, polled at their own cadence
    pub fn current_raster(&self, pixel_ratio: f64) -> Result<Option<RgbaImage>, SurfaceError> {
        match self.stage.lock().as_ref() {
            Some((_, stage)) => stage.current_raster(pixel_ratio).map(Some),
            None => Ok(None),
        }
    }

    /// Export the current stage
    ///
    /// The stage lock is only held while capturing; encoding runs unlocked.
    pub async fn export(&self) -> Result<ExportArtifact, StudioExportError> {
        let prepared = {
            let mut guard = self.stage.lock();
            let (_, stage) = guard.as_mut().ok_or(StudioExportError::NoModelSelected)?;
            let (canvas_type, plate_size) = (stage.canvas_type(), stage.plate_size());
            self.pipeline.prepare(stage, canvas_type, plate_size)?
        };
        Ok(prepared.encode().await?)
    }
}

/// Errors from [`Studio::export`]
#[derive(Debug, Error)]
pub enum StudioExportError {
    #[error("No model selected")]
    NoModelSelected,
    #[error(transparent)]
    Export(#[from] ExportError),
}
