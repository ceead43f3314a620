use actix_cors::Cors;
use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{HttpResponse, web};
use shared::HealthResponse;

use crate::config::ServerConfig;
use crate::error::AnalyzeError;
use crate::pipeline::Pipeline;

/// Analysis endpoints plus the health probe. Expects a `web::Data<Pipeline>`.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/analyze").route(web::post().to(analyze)))
        .service(web::resource("/predict").route(web::post().to(analyze)))
        .service(web::resource("/upload").route(web::post().to(analyze)))
        .service(web::resource("/health").route(web::get().to(health)));
}

/// Read-only static mounts. Registered after the API routes since the
/// frontend mount claims `/`.
pub fn configure_static(cfg: &mut web::ServiceConfig, config: &ServerConfig) {
    cfg.service(Files::new("/models", config.model_dir.clone()))
        .service(Files::new("/uploads", config.upload_dir.clone()));

    if config.dist_dir.is_dir() {
        cfg.service(Files::new("/", config.dist_dir.clone()).index_file("index.html"));
    } else {
        log::info!(
            "No frontend build at {}, serving health at /",
            config.dist_dir.display()
        );
        cfg.service(web::resource("/").route(web::get().to(health)));
    }
}

pub fn cors(config: &ServerConfig) -> Cors {
    let cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
        .max_age(3600);

    if config.allows_any_origin() {
        cors.allow_any_origin()
    } else {
        config
            .cors_origins
            .iter()
            .fold(cors, |cors, origin| cors.allowed_origin(origin))
    }
}

async fn analyze(
    pipeline: web::Data<Pipeline>,
    mut payload: Multipart,
) -> Result<HttpResponse, AnalyzeError> {
    let response = pipeline.analyze(&mut payload).await?;
    Ok(HttpResponse::Ok().json(response))
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse::ok())
}
