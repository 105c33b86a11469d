//! Liveness and template library status

use actix_web::{web, HttpResponse};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::CanvasType;
use crate::AppState;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub templates_loaded: usize,
    pub car_templates: usize,
    pub plate_templates: usize,
    /// Largest raster surface an export may allocate
    pub max_surface_pixels: u64,
}

/// GET /health - Service status
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let templates = state.template_manager.list();
    let plate_templates = templates
        .iter()
        .filter(|m| m.canvas_type == CanvasType::Plate)
        .count();

    HttpResponse::Ok().json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        templates_loaded: templates.len(),
        car_templates: templates.len() - plate_templates,
        plate_templates,
        max_surface_pixels: state.settings.export.max_surface_pixels,
    })
}
