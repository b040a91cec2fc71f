use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::codec::{BytesCodec, FramedRead};

use crate::assets::{Asset, AssetService};
use crate::error::VideoError;
use crate::jobs::{Job, JobScheduler, VideoGenerateRequest};

pub fn router(scheduler: Arc<JobScheduler>, assets: Arc<AssetService>) -> Router {
    Router::new()
        .route("/generate", post(generate_video))
        .route("/jobs", get(list_jobs))
        .route("/jobs/:id", get(get_job).delete(cancel_job))
        .route("/", get(list_videos))
        .route("/:id/file", get(get_video_file))
        .with_state((scheduler, assets))
}

async fn generate_video(
    State((scheduler, _)): State<(Arc<JobScheduler>, Arc<AssetService>)>,
    Json(req): Json<VideoGenerateRequest>,
) -> Result<Json<Job>, VideoError> {
    Ok(Json(scheduler.create_job(req)?))
}

async fn list_jobs(
    State((scheduler, _)): State<(Arc<JobScheduler>, Arc<AssetService>)>,
) -> Result<Json<Vec<Job>>, VideoError> {
    Ok(Json(scheduler.list_jobs()?))
}

async fn get_job(
    State((scheduler, _)): State<(Arc<JobScheduler>, Arc<AssetService>)>,
    Path(id): Path<String>,
) -> Result<Json<Job>, VideoError> {
    Ok(Json(scheduler.get_job(&id)?))
}

/// Always 204 once the job exists, terminal or not; cancellation is
/// reported through the job's status, not the response.
async fn cancel_job(
    State((scheduler, _)): State<(Arc<JobScheduler>, Arc<AssetService>)>,
    Path(id): Path<String>,
) -> Result<StatusCode, VideoError> {
    scheduler.cancel_job(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_videos(
    State((_, assets)): State<(Arc<JobScheduler>, Arc<AssetService>)>,
) -> Result<Json<Vec<Asset>>, VideoError> {
    Ok(Json(assets.list()?))
}

async fn get_video_file(
    State((_, assets)): State<(Arc<JobScheduler>, Arc<AssetService>)>,
    Path(id): Path<String>,
) -> Result<Response, VideoError> {
    let asset = assets.get(&id)?;
    let path = assets.path_for(&id)?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| VideoError::not_found(format!("File for video asset '{id}' not found")))?;
    let metadata = file.metadata().await?;

    let stream = FramedRead::new(file, BytesCodec::new())
        .map(|result| result.map(|bytes| bytes.freeze()));
    let body = Body::from_stream(stream);

    Response::builder()
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CONTENT_LENGTH, metadata.len().to_string())
        .header(
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{}\"", asset.filename),
        )
        .body(body)
        .map_err(|e| VideoError::service(format!("failed to build file response: {e}")))
}
