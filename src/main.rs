//! Wrap Studio
//!
//! Template segmentation and print-ready export service for vehicle wraps
//! and license plates, served over Actix-Web.

use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use tracing_actix_web::TracingLogger;

use wrap_studio::api;
use wrap_studio::config::Settings;
use wrap_studio::engine::{SegmentOptions, TemplateManager};
use wrap_studio::sources::ImageLoader;
use wrap_studio::AppState;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing subscriber for structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wrap_studio=info".parse()?)
                .add_directive("actix_web=info".parse()?),
        )
        .json()
        .init();

    // Load configuration
    let settings = Settings::load().context("Failed to load configuration")?;
    let bind_addr = format!("{}:{}", settings.server.host, settings.server.port);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_addr = %bind_addr,
        "Starting Wrap Studio"
    );

    let options = SegmentOptions::from_settings(&settings.segmentation, &settings.export)
        .context("Invalid segmentation colors")?;

    // Segment every template once, at startup
    let template_manager = Arc::new(TemplateManager::new(&settings.templates.path, options));
    template_manager.load_all().await.context("Failed to load templates")?;
    info!(count = template_manager.template_count(), "Templates loaded");

    let image_loader = ImageLoader::from_settings(&settings.fetch)
        .context("Failed to build image loader")?;

    let workers = settings.server.workers.unwrap_or_else(num_cpus::get);

    let app_state = web::Data::new(AppState {
        settings,
        template_manager,
        image_loader,
        started_at: std::time::Instant::now(),
    });

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            // Layer payloads may carry base64 textures
            .app_data(web::JsonConfig::default().limit(64 * 1024 * 1024))
            .wrap(TracingLogger::default())
            .wrap(middleware::Compress::default())
            .wrap(
                middleware::DefaultHeaders::new()
                    .add(("X-Service", "wrap-studio"))
                    .add(("X-Version", env!("CARGO_PKG_VERSION"))),
            )
            .configure(api::configure_routes)
    })
    .workers(workers)
    .bind(&bind_addr)?
    .run()
    .await?;

    Ok(())
}
