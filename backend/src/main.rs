use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use batik_backend::model::TorchModel;
use batik_backend::{configure_routes, AppState, Classifier, Config, ImageStore};
use std::env;

fn startup_error(context: &str, err: impl std::fmt::Display) -> std::io::Error {
    log::error!("{}: {}", context, err);
    std::io::Error::new(std::io::ErrorKind::Other, format!("{}: {}", context, err))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = Config::from_env().map_err(|e| startup_error("Invalid configuration", e))?;
    log::info!(
        "Model: {}, uploads: {}, base URL: {}",
        config.model_path.display(),
        config.upload_dir.display(),
        config.base_url
    );

    let model = TorchModel::load(&config.model_path)
        .map_err(|e| startup_error("Model loading failed", e))?;
    let classifier = Classifier::new(
        Box::new(model),
        config.classifier.class_names.clone(),
        config.classifier.input_size(),
    )
    .map_err(|e| startup_error("Model validation failed", e))?;
    log::info!("Classes: {:?}", classifier.class_names());

    let store = ImageStore::open(&config.upload_dir)
        .await
        .map_err(|e| startup_error("Failed to prepare upload directory", e))?;

    let state = web::Data::new(AppState::new(classifier, store, config.base_url.clone()));

    let bind_address = format!("0.0.0.0:{}", config.port);
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(state.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
