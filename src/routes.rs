use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::auth::{AuthGate, AuthUser, access_token_from_cookies};
use crate::error::ApiError;
use crate::gemini::PortraitService;
use crate::orchestrator::UploadOrchestrator;
use crate::repository::{GeneratedImageRecord, ImageRepository};
use crate::transcode::detect_mime_type;

pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

pub struct AppState {
    pub auth: Arc<dyn AuthGate>,
    pub generator: Arc<dyn PortraitService>,
    pub repository: Arc<dyn ImageRepository>,
    pub orchestrator: UploadOrchestrator,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/image", post(upload_image).get(list_images))
        .route("/image/{id}", get(get_image))
        .route("/gen", post(generate_portrait))
        .route("/auth/user", get(auth_user))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Deserialize)]
struct CategoryQuery {
    category: Option<String>,
}

#[derive(Serialize)]
struct GenResponse {
    #[serde(rename = "base64Image")]
    base64_image: String,
}

fn require_category(query: &CategoryQuery) -> Result<String, ApiError> {
    query
        .category
        .as_deref()
        .map(str::trim)
        .filter(|category| !category.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::InvalidRequest("missing category query parameter".to_string()))
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthUser, ApiError> {
    let token = access_token_from_cookies(headers).ok_or(ApiError::Unauthenticated)?;
    state.auth.resolve_user(&token).await
}

struct UploadedFile {
    bytes: Vec<u8>,
    content_type: Option<String>,
}

async fn read_image_field(mut multipart: Multipart) -> Result<UploadedFile, ApiError> {
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() == Some("image") {
                    let content_type = field.content_type().map(|value| value.to_string());
                    let bytes = field.bytes().await.map_err(|err| {
                        ApiError::InvalidRequest(format!("failed to read image field: {err}"))
                    })?;
                    return Ok(UploadedFile {
                        bytes: bytes.to_vec(),
                        content_type,
                    });
                }
            }
            Ok(None) => {
                return Err(ApiError::InvalidRequest(
                    "missing multipart field \"image\"".to_string(),
                ));
            }
            Err(err) => {
                return Err(ApiError::InvalidRequest(format!(
                    "failed to read multipart body: {err}"
                )));
            }
        }
    }
}

async fn upload_image(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CategoryQuery>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<GeneratedImageRecord>, ApiError> {
    let category = require_category(&query)?;
    let user = authenticate(&state, &headers).await?;
    let file = read_image_field(multipart).await?;
    let record = state.orchestrator.upload(&user, &category, &file.bytes).await?;
    Ok(Json(record))
}

async fn list_images(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CategoryQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<GeneratedImageRecord>>, ApiError> {
    let category = require_category(&query)?;
    let user = authenticate(&state, &headers).await?;
    let records = state.repository.list(&user.id, &category).await?;
    Ok(Json(records))
}

async fn get_image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<CategoryQuery>,
    headers: HeaderMap,
) -> Result<Json<GeneratedImageRecord>, ApiError> {
    let category = require_category(&query)?;
    let user = authenticate(&state, &headers).await?;
    let record = state
        .repository
        .get(&id, &user.id, &category)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(record))
}

async fn generate_portrait(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<GenResponse>, ApiError> {
    let file = read_image_field(multipart).await?;
    if file.bytes.is_empty() {
        return Err(ApiError::InvalidRequest(
            "image payload must not be empty".to_string(),
        ));
    }
    let mime_type = detect_mime_type(&file.bytes)
        .map(str::to_string)
        .or(file.content_type)
        .ok_or_else(|| {
            ApiError::UnsupportedInput("unrecognized image format".to_string())
        })?;
    let portrait = state.generator.generate(&file.bytes, &mime_type).await?;
    Ok(Json(GenResponse {
        base64_image: portrait.as_data_url(),
    }))
}

async fn auth_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<AuthUser>, ApiError> {
    let token = access_token_from_cookies(&headers).ok_or(ApiError::Unauthenticated)?;
    let user = state.auth.resolve_user(&token).await?;
    Ok(Json(user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_is_required_and_trimmed() {
        let missing = CategoryQuery { category: None };
        assert!(matches!(
            require_category(&missing).unwrap_err(),
            ApiError::InvalidRequest(_)
        ));

        let blank = CategoryQuery {
            category: Some("   ".to_string()),
        };
        assert!(require_category(&blank).is_err());

        let padded = CategoryQuery {
            category: Some(" memorial ".to_string()),
        };
        assert_eq!(require_category(&padded).unwrap(), "memorial");
    }
}
