//! Wrap Studio
//!
//! Turns line-art vehicle and license plate templates into editable stages
//! and exports pixel-exact, print-ready rasters from them.

pub mod api;
pub mod config;
pub mod domain;
pub mod engine;
pub mod sources;

use std::sync::Arc;

use crate::config::Settings;
use crate::engine::TemplateManager;
use crate::sources::ImageLoader;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Settings,
    pub template_manager: Arc<TemplateManager>,
    pub image_loader: ImageLoader,
    pub started_at: std::time::Instant,
}
