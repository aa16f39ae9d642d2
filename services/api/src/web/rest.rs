//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::adapters::blob::media_file_name;
use crate::web::state::AppState;
use axum::{
    extract::{Extension, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::Utc;
use lesson_hub_core::domain::Schedule;
use lesson_hub_core::ports::PortError;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        upload_media_handler,
        import_schedule_handler,
    ),
    components(
        schemas(UploadResponse, ImportResponse)
    ),
    tags(
        (name = "Lesson Hub API", description = "Uploads and schedule imports for the lesson planner.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// The response payload sent after an image upload.
#[derive(Serialize, ToSchema)]
pub struct UploadResponse {
    /// Public URI to attach to an entry with `append_image`.
    pub uri: String,
}

/// A parsed weekly schedule, keyed by day of week (0 = Sunday).
#[derive(Serialize, ToSchema)]
pub struct ImportResponse {
    #[schema(value_type = Object)]
    pub schedule: Schedule,
}

type ApiResult<T> = Result<T, (StatusCode, String)>;

/// Reads the first file part of a multipart form.
async fn first_file(multipart: &mut Multipart) -> ApiResult<(String, String, Vec<u8>)> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                format!("Failed to read multipart data: {}", e),
            )
        })?
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                "Multipart form must include a file".to_string(),
            )
        })?;
    let name = field.file_name().unwrap_or("upload").to_string();
    let media_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = field.bytes().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("Failed to read file bytes: {}", e),
        )
    })?;
    Ok((name, media_type, data.to_vec()))
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Upload an image for a lesson entry.
///
/// Accepts a multipart/form-data request with a single file part. The
/// returned URI is then attached to an entry over the WebSocket.
#[utoipa::path(
    post,
    path = "/media",
    request_body(content_type = "multipart/form-data", description = "The image to upload."),
    responses(
        (status = 201, description = "Image stored", body = UploadResponse),
        (status = 400, description = "Bad request (e.g., missing file)"),
        (status = 401, description = "Missing or invalid session"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn upload_media_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(owner_id): Extension<Uuid>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let (original_name, _, bytes) = first_file(&mut multipart).await?;
    let file_name = media_file_name(Utc::now(), &original_name);

    match app_state.blobs.upload(&file_name, &bytes).await {
        Ok(uri) => {
            info!("Owner {} uploaded {}", owner_id, file_name);
            Ok((StatusCode::CREATED, Json(UploadResponse { uri })))
        }
        Err(PortError::Rejected(message)) => Err((StatusCode::BAD_REQUEST, message)),
        Err(e) => {
            error!("Failed to store upload: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to store upload".to_string(),
            ))
        }
    }
}

/// Parse a timetable image or PDF into a weekly schedule.
///
/// Nothing is stored; the planner creates the profile when the client
/// imports over the WebSocket.
#[utoipa::path(
    post,
    path = "/imports",
    request_body(content_type = "multipart/form-data", description = "A timetable image or PDF."),
    responses(
        (status = 200, description = "Schedule parsed", body = ImportResponse),
        (status = 401, description = "Missing or invalid session"),
        (status = 422, description = "The document could not be parsed"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn import_schedule_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(owner_id): Extension<Uuid>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let (name, media_type, bytes) = first_file(&mut multipart).await?;
    info!("Owner {} importing {} ({})", owner_id, name, media_type);

    match app_state.importer.parse_schedule(&bytes, &media_type).await {
        Ok(schedule) => Ok(Json(ImportResponse { schedule })),
        Err(PortError::Rejected(message)) => {
            warn!("Import rejected: {}", message);
            Err((StatusCode::UNPROCESSABLE_ENTITY, message))
        }
        Err(e) => {
            error!("Import failed: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Import failed".to_string(),
            ))
        }
    }
}

pub async fn openapi_handler() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
