use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::info;

use crate::{
    config::{AppConfig, CorsOrigins},
    error::ServiceError,
    generator::Generator,
    model::{GenerationRequest, GenerationResponse},
    upstream::{ChatBackend, ProbeReport},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub generator: Arc<Generator>,
}

#[derive(Serialize)]
struct UploadResponse {
    bundle_id: String,
    assets: Vec<String>,
}

pub fn build_router(config: Arc<AppConfig>, backend: Arc<dyn ChatBackend>) -> Router {
    let bundles = crate::bundle::BundleStore::new(config.bundle_root.clone());
    let state = AppState {
        generator: Arc::new(Generator::new(backend, bundles)),
        config: config.clone(),
    };

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/upstream", get(upstream))
        .route("/generate", post(generate))
        .route("/upload", post(upload))
        .route("/bundle/:archive", get(download_bundle))
        .route("/bundles/:bundle_id/assets/:filename", get(download_asset))
        .nest_service("/static", ServeDir::new(&config.static_dir))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .with_state(state)
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &CorsOrigins) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match origins {
        CorsOrigins::Any => layer.allow_origin(Any),
        CorsOrigins::List(list) => {
            let values: Vec<HeaderValue> = list.iter().filter_map(|o| o.parse().ok()).collect();
            layer.allow_origin(AllowOrigin::list(values))
        }
    }
}

async fn index(State(state): State<AppState>) -> Response {
    let path = state.config.static_dir.join("index.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(page) => Html(page).into_response(),
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "index.html not found" })),
        )
            .into_response(),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

async fn upstream(State(state): State<AppState>) -> Json<ProbeReport> {
    Json(state.generator.backend().probe().await)
}

async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<GenerationResponse>, ServiceError> {
    let Json(request) = payload.map_err(|e| ServiceError::BadRequest(e.body_text()))?;
    let response = state.generator.generate(request).await?;
    Ok(Json(response))
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServiceError> {
    let mut bundle_id: Option<String> = None;
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        let file_name = field.file_name().map(str::to_string);
        let field_name = field.name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ServiceError::BadRequest(format!("failed to read upload: {e}")))?;

        match file_name {
            Some(name) => files.push((name, bytes.to_vec())),
            None if field_name.as_deref() == Some("bundle_id") => {
                let value = String::from_utf8_lossy(&bytes).trim().to_string();
                if !value.is_empty() {
                    bundle_id = Some(value);
                }
            }
            None => {}
        }
    }

    let bundles = state.generator.bundles();
    let bundle_id = bundles.ensure(bundle_id.as_deref()).await?;
    let mut assets = Vec::with_capacity(files.len());
    for (name, bytes) in files {
        assets.push(bundles.store_asset(&bundle_id, &name, &bytes).await?);
    }

    info!(bundle_id = %bundle_id, count = assets.len(), "assets uploaded");
    Ok(Json(UploadResponse { bundle_id, assets }))
}

async fn download_bundle(
    State(state): State<AppState>,
    Path(archive): Path<String>,
) -> Result<Response, ServiceError> {
    let bundle_id = archive
        .strip_suffix(".zip")
        .ok_or_else(|| ServiceError::NotFound(format!("bundle archive '{archive}'")))?;
    let bytes = state.generator.bundles().package(bundle_id).await?;

    let disposition = format!("attachment; filename=\"{bundle_id}.zip\"");
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(bytes),
    )
        .into_response())
}

async fn download_asset(
    State(state): State<AppState>,
    Path((bundle_id, filename)): Path<(String, String)>,
) -> Result<Response, ServiceError> {
    let path = state
        .generator
        .bundles()
        .asset_path(&bundle_id, &filename)
        .await?;
    let file = tokio::fs::File::open(&path).await?;
    let mime = mime_guess::from_path(&path).first_or_octet_stream();

    Ok((
        [(header::CONTENT_TYPE, mime.essence_str().to_string())],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
