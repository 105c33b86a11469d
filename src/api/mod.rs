//! API module - HTTP routes and handlers

pub mod handlers;
pub mod openapi;

use actix_web::web;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::openapi::ApiDoc;

/// Configure all API routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::scope("/templates")
                    .route("", web::get().to(handlers::templates::list_templates))
                    .route("/{template_id}/mask.png", web::get().to(handlers::templates::get_mask))
                    .route("/{template_id}/lines.png", web::get().to(handlers::templates::get_lines))
            )
            .route("/exports", web::post().to(handlers::exports::create_export))
    )
    .route("/health", web::get().to(handlers::health::health_check))
    // Swagger UI and OpenAPI spec
    .service(
        SwaggerUi::new("/swagger-ui/{_:.*}")
            .url("/api-docs/openapi.json", ApiDoc::openapi())
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use actix_web::{http::StatusCode, test, App};
    use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    use crate::config::Settings;
    use crate::engine::{segment, SegmentOptions, Template, TemplateManager, TemplateMetadata};
    use crate::domain::CanvasType;
    use crate::sources::ImageLoader;
    use crate::AppState;

    fn app_state() -> web::Data<AppState> {
        let settings = Settings::default();
        let manager = Arc::new(TemplateManager::new(&settings.templates.path, SegmentOptions::default()));

        let template = RgbaImage::from_pixel(32, 32, Rgba([255, 255, 255, 255]));
        let segmentation = segment(&DynamicImage::ImageRgba8(template), &SegmentOptions::default()).unwrap();
        manager.insert(Arc::new(Template {
            metadata: TemplateMetadata {
                id: "model-y".to_string(),
                name: "Model Y".to_string(),
                canvas_type: CanvasType::Car,
                plate_size: None,
                image: "template.png".to_string(),
            },
            segmentation: Arc::new(segmentation),
        }));

        web::Data::new(AppState {
            image_loader: ImageLoader::from_settings(&settings.fetch).unwrap(),
            settings,
            template_manager: manager,
            started_at: std::time::Instant::now(),
        })
    }

    fn texture_base64() -> String {
        use base64::Engine;
        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 255, 255])))
            .write_to(&mut png, ImageOutputFormat::Png)
            .unwrap();
        base64::engine::general_purpose::STANDARD.encode(png.into_inner())
    }

    #[actix_web::test]
    async fn test_health_and_listing() {
        let app = test::init_service(App::new().app_data(app_state()).configure(configure_routes)).await;

        let health: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/health").to_request(),
        )
        .await;
        assert_eq!(health["templates_loaded"], 1);
        assert_eq!(health["car_templates"], 1);

        let body: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/v1/templates").to_request(),
        )
        .await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["data"][0]["exterior_pixels"], 32 * 32);
    }

    #[actix_web::test]
    async fn test_mask_png_and_missing_template() {
        let app = test::init_service(App::new().app_data(app_state()).configure(configure_routes)).await;

        let bytes = test::call_and_read_body(
            &app,
            test::TestRequest::get().uri("/api/v1/templates/model-y/mask.png").to_request(),
        )
        .await;
        let mask = image::load_from_memory(&bytes).unwrap();
        assert_eq!((mask.width(), mask.height()), (32, 32));

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/v1/templates/nope/lines.png").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_export_endpoint_returns_png() {
        let app = test::init_service(App::new().app_data(app_state()).configure(configure_routes)).await;

        let payload = serde_json::json!({
            "template_id": "model-y",
            "layers": [{"id": "Full Wrap", "source": {"base64": texture_base64()}}],
            "container": {"width": 300.0, "height": 200.0}
        });
        let resp = test::call_service(
            &app,
            test::TestRequest::post().uri("/api/v1/exports").set_json(&payload).to_request(),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::OK);
        let disposition = resp.headers().get("Content-Disposition").unwrap().to_str().unwrap().to_string();
        assert!(disposition.contains("design-tesla-1024.png"));

        let bytes = test::read_body(resp).await;
        let png = image::load_from_memory(&bytes).unwrap();
        assert_eq!((png.width(), png.height()), (1024, 1024));
    }

    #[actix_web::test]
    async fn test_export_rejects_bad_stroke_color() {
        let app = test::init_service(App::new().app_data(app_state()).configure(configure_routes)).await;

        let payload = serde_json::json!({
            "template_id": "model-y",
            "strokes": [{"points": [{"x": 1, "y": 1}], "color": "not-a-color", "width": 2}]
        });
        let resp = test::call_service(
            &app,
            test::TestRequest::post().uri("/api/v1/exports").set_json(&payload).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
