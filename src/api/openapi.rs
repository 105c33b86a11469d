//! OpenAPI 3.0 specification definition

use utoipa::OpenApi;

use crate::api::handlers::{
    exports::{ContainerSize, ExportRequest, LayerRequest, LayerSource, StrokePoint, StrokeRequest},
    health::HealthResponse,
    templates::{TemplateInfo, TemplatesListResponse},
    ApiError, ErrorResponse,
};
use crate::domain::{CanvasType, PlateSize, Transform, TransformPatch};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Wrap Studio API",
        version = "1.0.0",
        description = "Template segmentation and print-ready export for vehicle wraps and license plates",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "/", description = "Current server")
    ),
    tags(
        (name = "system", description = "System health and status endpoints"),
        (name = "templates", description = "Template library and segmentation outputs"),
        (name = "exports", description = "Print-ready export endpoints")
    ),
    paths(
        crate::api::handlers::health::health_check,
        crate::api::handlers::templates::list_templates,
        crate::api::handlers::templates::get_mask,
        crate::api::handlers::templates::get_lines,
        crate::api::handlers::exports::create_export,
    ),
    components(
        schemas(
            HealthResponse,
            TemplatesListResponse,
            TemplateInfo,
            ExportRequest,
            LayerRequest,
            LayerSource,
            StrokeRequest,
            StrokePoint,
            ContainerSize,
            ErrorResponse,
            ApiError,
            CanvasType,
            PlateSize,
            Transform,
            TransformPatch,
        )
    )
)]
pub struct ApiDoc;
