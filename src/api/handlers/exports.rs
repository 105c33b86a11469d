//! Export endpoint
//!
//! Stateless: each request describes a whole stage (template, layers,
//! strokes), which is rebuilt, exported and discarded.

use std::sync::Arc;
use std::time::Instant;

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use futures::future::try_join_all;
use serde::Deserialize;
use tracing::{error, info};
use utoipa::ToSchema;

use crate::domain::{parse_hex_color, CanvasType, PlateSize, Transform};
use crate::engine::{ExportError, ExportPipeline, Stroke};
use crate::sources::{ImageSource, SourceError};
use crate::AppState;
use super::error_response;

/// Where a layer texture comes from
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LayerSource {
    /// Remote image URL
    Url(String),
    /// Base64 payload or data URL
    Base64(String),
}

impl From<LayerSource> for ImageSource {
    fn from(source: LayerSource) -> Self {
        match source {
            LayerSource::Url(url) => ImageSource::Url(url),
            LayerSource::Base64(data) => ImageSource::Base64(data),
        }
    }
}

/// One placed texture
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LayerRequest {
    /// Layer key, e.g. a body-part name or "Full Wrap"
    pub id: String,
    pub source: LayerSource,
    #[serde(default)]
    pub transform: Option<Transform>,
}

/// Stroke point in template pixels
#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct StrokePoint {
    pub x: f64,
    pub y: f64,
}

/// One freehand stroke
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct StrokeRequest {
    pub points: Vec<StrokePoint>,
    pub color: String,
    pub width: f64,
}

/// Container the stage is displayed in
#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct ContainerSize {
    pub width: f64,
    pub height: f64,
}

/// Request body for an export
#[derive(Debug, Deserialize, ToSchema)]
pub struct ExportRequest {
    pub template_id: String,
    /// Defaults to the template's canvas type
    #[serde(default)]
    pub canvas_type: Option<CanvasType>,
    /// Defaults to the template's plate size
    #[serde(default)]
    pub plate_size: Option<PlateSize>,
    #[serde(default)]
    pub layers: Vec<LayerRequest>,
    #[serde(default)]
    pub strokes: Vec<StrokeRequest>,
    #[serde(default)]
    pub container: Option<ContainerSize>,
}

/// POST /api/v1/exports - Export a stage as a print-ready PNG
#[utoipa::path(
    post,
    path = "/api/v1/exports",
    tag = "exports",
    request_body = ExportRequest,
    responses(
        (status = 200, description = "Exported PNG", body = Vec<u8>, content_type = "image/png"),
        (status = 400, description = "Invalid stroke color", body = super::ErrorResponse),
        (status = 404, description = "Template not found", body = super::ErrorResponse),
        (status = 422, description = "Layer image could not be loaded", body = super::ErrorResponse),
        (status = 500, description = "Export failed", body = super::ErrorResponse)
    )
)]
pub async fn create_export(
    state: web::Data<AppState>,
    body: web::Json<ExportRequest>,
) -> HttpResponse {
    let start = Instant::now();
    let request = body.into_inner();

    info!(
        template_id = %request.template_id,
        layers = request.layers.len(),
        strokes = request.strokes.len(),
        "Processing export request"
    );

    let Some(template) = state.template_manager.get(&request.template_id) else {
        error!(template_id = %request.template_id, "Template not found");
        return error_response(
            StatusCode::NOT_FOUND,
            "TEMPLATE_NOT_FOUND",
            format!("Template '{}' does not exist", request.template_id),
        );
    };

    let mut strokes = Vec::with_capacity(request.strokes.len());
    for stroke in &request.strokes {
        match parse_hex_color(&stroke.color) {
            Ok(color) => strokes.push(Stroke {
                points: stroke.points.iter().map(|p| (p.x, p.y)).collect(),
                color,
                width: stroke.width,
            }),
            Err(e) => return error_response(StatusCode::BAD_REQUEST, "INVALID_COLOR", e.to_string()),
        }
    }

    let textures = match load_textures(&state, &request).await {
        Ok(textures) => textures,
        Err(e) => {
            error!(error = %e, "Layer image load failed");
            return error_response(StatusCode::UNPROCESSABLE_ENTITY, "LAYER_LOAD_FAILED", e.to_string());
        }
    };

    let canvas_type = request.canvas_type.unwrap_or(template.metadata.canvas_type);
    let plate_size = request.plate_size.unwrap_or_else(|| template.plate_size());

    let mut stage = template.new_stage(state.settings.export.max_surface_pixels);
    if let Some(container) = request.container {
        stage.resize_container(container.width, container.height);
    }
    for (layer, texture) in request.layers.iter().zip(textures) {
        stage
            .layers_mut()
            .add_or_replace(layer.id.clone(), Arc::new(texture), layer.transform);
    }
    for stroke in strokes {
        stage.layers_mut().push_stroke(stroke);
    }

    // Capture and masking are CPU bound; the stage is private to this request
    let prepared = web::block(move || {
        let pipeline = ExportPipeline::new();
        pipeline.prepare(&mut stage, canvas_type, plate_size)
    })
    .await;

    let artifact = match prepared {
        Ok(Ok(prepared)) => prepared.encode().await,
        Ok(Err(e)) => Err(e),
        Err(e) => Err(ExportError::Join(e.to_string())),
    };

    match artifact {
        Ok(artifact) => {
            info!(
                template_id = %request.template_id,
                filename = %artifact.filename,
                generation_time_ms = start.elapsed().as_millis() as u64,
                "Export generated successfully"
            );

            HttpResponse::Ok()
                .content_type(artifact.content_type())
                .insert_header((
                    "Content-Disposition",
                    format!("attachment; filename=\"{}\"", artifact.filename),
                ))
                .body(artifact.bytes)
        }
        Err(e) => {
            error!(error = %e, "Export failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "EXPORT_FAILED", e.to_string())
        }
    }
}

/// Fetch and decode every layer texture concurrently, in request order
async fn load_textures(
    state: &AppState,
    request: &ExportRequest,
) -> Result<Vec<image::RgbaImage>, SourceError> {
    let loads = request.layers.iter().map(|layer| {
        let source: ImageSource = layer.source.clone().into();
        let loader = state.image_loader.clone();
        async move { loader.load(&source).await.map(|image| image.to_rgba8()) }
    });

    try_join_all(loads).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_request_defaults() {
        let request: ExportRequest = serde_json::from_str(r#"{"template_id": "model-3"}"#).unwrap();
        assert!(request.layers.is_empty());
        assert!(request.canvas_type.is_none());
        assert!(request.container.is_none());
    }

    #[test]
    fn test_layer_request_wire_format() {
        let layer: LayerRequest = serde_json::from_str(
            r#"{
                "id": "Full Wrap",
                "source": {"url": "https://cdn.example.com/camo.png"},
                "transform": {"x": 10, "y": 5, "rotation": 0, "scaleX": 2, "scaleY": 2, "opacity": 0.8}
            }"#,
        )
        .unwrap();

        assert!(matches!(layer.source, LayerSource::Url(_)));
        assert_eq!(layer.transform.unwrap().scale_x, 2.0);
    }

    #[test]
    fn test_stroke_request_wire_format() {
        let stroke: StrokeRequest = serde_json::from_str(
            r##"{"points": [{"x": 1, "y": 2}, {"x": 3.5, "y": 4}], "color": "#ff0000", "width": 6}"##,
        )
        .unwrap();
        assert_eq!(stroke.points.len(), 2);
        assert_eq!(stroke.points[1].x, 3.5);
    }

    #[test]
    fn test_plate_size_wire_format() {
        let request: ExportRequest =
            serde_json::from_str(r#"{"template_id": "plate", "canvas_type": "plate", "plate_size": "420x100"}"#)
                .unwrap();
        assert_eq!(request.plate_size, Some(PlateSize::Narrow));
    }
}
