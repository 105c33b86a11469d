//! Template endpoints

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use image::RgbaImage;
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

use crate::domain::{CanvasType, PlateSize};
use crate::engine::raster::encode_png;
use crate::engine::Template;
use crate::AppState;
use super::error_response;

/// Template summary with segmentation statistics
#[derive(Serialize, ToSchema)]
pub struct TemplateInfo {
    pub id: String,
    pub name: String,
    pub canvas_type: CanvasType,
    pub plate_size: Option<PlateSize>,
    pub width: u32,
    pub height: u32,
    pub exterior_pixels: u64,
    pub interior_pixels: u64,
    pub line_pixels: u64,
}

impl From<&Template> for TemplateInfo {
    fn from(template: &Template) -> Self {
        let counts = template.segmentation.counts();
        TemplateInfo {
            id: template.metadata.id.clone(),
            name: template.metadata.name.clone(),
            canvas_type: template.metadata.canvas_type,
            plate_size: template.metadata.plate_size,
            width: template.segmentation.width(),
            height: template.segmentation.height(),
            exterior_pixels: counts.exterior,
            interior_pixels: counts.interior,
            line_pixels: counts.line,
        }
    }
}

/// Response for listing templates
#[derive(Serialize, ToSchema)]
pub struct TemplatesListResponse {
    pub success: bool,
    pub data: Vec<TemplateInfo>,
    pub count: usize,
}

/// GET /api/v1/templates - List loaded templates
#[utoipa::path(
    get,
    path = "/api/v1/templates",
    tag = "templates",
    responses(
        (status = 200, description = "Loaded templates", body = TemplatesListResponse)
    )
)]
pub async fn list_templates(state: web::Data<AppState>) -> HttpResponse {
    let data: Vec<TemplateInfo> = state
        .template_manager
        .list()
        .iter()
        .filter_map(|m| state.template_manager.get(&m.id))
        .map(|t| TemplateInfo::from(t.as_ref()))
        .collect();

    HttpResponse::Ok().json(TemplatesListResponse {
        success: true,
        count: data.len(),
        data,
    })
}

/// GET /api/v1/templates/{template_id}/mask.png - Exterior mask
#[utoipa::path(
    get,
    path = "/api/v1/templates/{template_id}/mask.png",
    tag = "templates",
    params(("template_id" = String, Path, description = "Template ID")),
    responses(
        (status = 200, description = "Mask PNG", body = Vec<u8>, content_type = "image/png"),
        (status = 404, description = "Template not found", body = super::ErrorResponse)
    )
)]
pub async fn get_mask(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    raster_response(&state, &path, |t| t.segmentation.mask().clone()).await
}

/// GET /api/v1/templates/{template_id}/lines.png - Line-art guide
#[utoipa::path(
    get,
    path = "/api/v1/templates/{template_id}/lines.png",
    tag = "templates",
    params(("template_id" = String, Path, description = "Template ID")),
    responses(
        (status = 200, description = "Lines PNG", body = Vec<u8>, content_type = "image/png"),
        (status = 404, description = "Template not found", body = super::ErrorResponse)
    )
)]
pub async fn get_lines(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    raster_response(&state, &path, |t| t.segmentation.lines().clone()).await
}

async fn raster_response<F>(state: &AppState, template_id: &str, pick: F) -> HttpResponse
where
    F: FnOnce(&Template) -> RgbaImage,
{
    let Some(template) = state.template_manager.get(template_id) else {
        return error_response(
            StatusCode::NOT_FOUND,
            "TEMPLATE_NOT_FOUND",
            format!("Template '{}' does not exist", template_id),
        );
    };

    let raster = pick(template.as_ref());
    match web::block(move || encode_png(&raster, 1.0)).await {
        Ok(Ok(bytes)) => HttpResponse::Ok().content_type("image/png").body(bytes),
        Ok(Err(e)) => {
            error!(template_id = %template_id, error = %e, "Failed to encode template raster");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "ENCODE_FAILED", e.to_string())
        }
        Err(e) => {
            error!(template_id = %template_id, error = %e, "Encoding task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "ENCODE_FAILED", e.to_string())
        }
    }
}
