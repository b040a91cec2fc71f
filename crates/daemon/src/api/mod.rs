use axum::Router;
use std::sync::Arc;

use crate::assets::AssetService;
use crate::jobs::JobScheduler;
use crate::profiles::ProfileService;

pub mod profiles;
pub mod videos;

pub fn router(
    profiles: Arc<ProfileService>,
    assets: Arc<AssetService>,
    scheduler: Arc<JobScheduler>,
) -> Router {
    Router::new()
        .nest("/v1/video_profiles", profiles::router(profiles))
        .nest("/v1/videos", videos::router(scheduler, assets))
}
