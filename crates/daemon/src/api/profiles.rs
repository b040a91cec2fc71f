use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::VideoError;
use crate::profiles::{Profile, ProfileCreate, ProfileService, ProfileUpdate};

#[derive(Deserialize)]
pub struct AttachReferencesRequest {
    #[serde(default)]
    pub image_names: Vec<String>,
}

pub fn router(service: Arc<ProfileService>) -> Router {
    Router::new()
        .route("/", get(list_profiles).post(create_profile))
        .route(
            "/:id",
            get(get_profile).put(update_profile).delete(delete_profile),
        )
        .route("/:id/references", post(set_references))
        .with_state(service)
}

async fn create_profile(
    State(service): State<Arc<ProfileService>>,
    Json(profile): Json<ProfileCreate>,
) -> Result<Json<Profile>, VideoError> {
    Ok(Json(service.create(profile)?))
}

async fn list_profiles(
    State(service): State<Arc<ProfileService>>,
) -> Result<Json<Vec<Profile>>, VideoError> {
    Ok(Json(service.list()?))
}

async fn get_profile(
    State(service): State<Arc<ProfileService>>,
    Path(id): Path<String>,
) -> Result<Json<Profile>, VideoError> {
    Ok(Json(service.get(&id)?))
}

async fn update_profile(
    State(service): State<Arc<ProfileService>>,
    Path(id): Path<String>,
    Json(changes): Json<ProfileUpdate>,
) -> Result<Json<Profile>, VideoError> {
    Ok(Json(service.update(&id, changes)?))
}

async fn delete_profile(
    State(service): State<Arc<ProfileService>>,
    Path(id): Path<String>,
) -> Result<StatusCode, VideoError> {
    service.delete(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_references(
    State(service): State<Arc<ProfileService>>,
    Path(id): Path<String>,
    Json(body): Json<AttachReferencesRequest>,
) -> Result<Json<Profile>, VideoError> {
    Ok(Json(service.set_references(&id, &body.image_names)?))
}
