use actix_web::{App, HttpServer, middleware, web};
use std::env;
use std::io;

use severity_server::config::ServerConfig;
use severity_server::inference::model::ModelHandle;
use severity_server::pipeline::Pipeline;
use severity_server::routes::{configure_routes, configure_static, cors};

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            return Err(io::Error::other(format!("Configuration failed: {}", e)));
        }
    };
    log::info!("Configuration: {:?}", config);

    std::fs::create_dir_all(&config.upload_dir)?;

    log::info!("Loading model from {}", config.model_dir.display());
    let model = match ModelHandle::load(&config.model_dir) {
        Ok(model) => model,
        Err(e) => {
            log::error!("Failed to load model at startup: {}", e);
            return Err(io::Error::other(format!("Model loading failed: {}", e)));
        }
    };
    log::info!("Model loaded: {:?}", model);

    let pipeline = web::Data::new(Pipeline::new(&config, model));
    let bind_address = config.socket_address();

    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(cors(&config))
            .wrap(middleware::Logger::default())
            .app_data(pipeline.clone())
            .configure(configure_routes)
            .configure(|cfg| configure_static(cfg, &config))
    })
    .bind(&bind_address)?
    .run()
    .await
}
