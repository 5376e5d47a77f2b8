use actix_files::NamedFile;
use actix_multipart::Multipart;
use actix_web::{web, HttpRequest, HttpResponse};
use batik_shared::{HealthResponse, PredictionResponse};
use futures::{StreamExt, TryStreamExt};
use image::DynamicImage;
use log::info;
use std::sync::Arc;

use crate::config::image_url;
use crate::error::ApiError;
use crate::state::AppState;
use crate::storage::{ImageStore, StorageError};

const UPLOAD_FIELD: &str = "file";

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource(vec!["/predict/", "/predict"]).route(web::post().to(predict)))
        .service(web::resource("/images/{filename}").route(web::get().to(get_image)))
        .service(web::resource("/health").route(web::get().to(health)));
}

struct Upload {
    filename: String,
    bytes: Vec<u8>,
}

async fn read_upload(mut payload: Multipart) -> Result<Upload, ApiError> {
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart payload: {}", e)))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_owned)
            .ok_or_else(|| ApiError::BadRequest("Uploaded file has no filename".into()))?;

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let data =
                chunk.map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;
            bytes.extend_from_slice(&data);
        }
        return Ok(Upload { filename, bytes });
    }

    Err(ApiError::BadRequest(format!(
        "Missing multipart field '{}'",
        UPLOAD_FIELD
    )))
}

async fn predict(state: web::Data<AppState>, payload: Multipart) -> Result<HttpResponse, ApiError> {
    let Upload {
        filename: original_filename,
        bytes,
    } = read_upload(payload).await?;

    let rgb = web::block(move || image::load_from_memory(&bytes).map(|decoded| decoded.to_rgb8()))
        .await?
        .map_err(|e| ApiError::InvalidImage(e.to_string()))?;

    let extension = ImageStore::extract_file_extension(&original_filename).to_string();
    ImageStore::image_format(&extension)?;
    let (rgb, encoded, extension) = web::block(move || {
        ImageStore::encode(&rgb, &extension).map(|encoded| (rgb, encoded, extension))
    })
    .await??;

    let stored = state
        .store
        .save(&ImageStore::generate_filename(&extension), &encoded)
        .await?;

    let classifier = Arc::clone(&state.classifier);
    let decoded = DynamicImage::ImageRgb8(rgb);
    let prediction = web::block(move || classifier.classify(&decoded)).await??;

    let url = image_url(&state.base_url, &stored.filename)
        .map_err(|e| ApiError::Internal(format!("Failed to build image URL: {}", e)))?;

    info!(
        "Predicted {} ({:.4}) for {:?}, stored as {}",
        prediction.label, prediction.confidence, original_filename, stored.filename
    );

    Ok(HttpResponse::Ok().json(PredictionResponse {
        class: prediction.label,
        confidence: prediction.confidence,
        image_url: url.to_string(),
    }))
}

async fn get_image(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let filename = path.into_inner();
    let file_path = state.store.resolve(&filename)?;

    let file = NamedFile::open_async(&file_path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(filename.clone())
        } else {
            StorageError::Io(e)
        }
    })?;
    Ok(file.into_response(&req))
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".into(),
        classes: state.classifier.class_names().to_vec(),
    })
}
