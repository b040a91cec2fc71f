use axum::{response::Json, routing::get, Router};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, level_filters::LevelFilter};

mod api;
mod assets;
mod config;
mod db;
mod error;
mod images;
mod jobs;
mod media;
mod profiles;

use assets::AssetService;
use config::AppConfig;
use db::Database;
use images::{DiskImageStore, ImageStore};
use jobs::JobScheduler;
use profiles::ProfileService;

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::INFO)
        .init();

    let config = Arc::new(AppConfig::from_env());

    let db = Arc::new(Database::open(&config.db_path)?);
    info!("Database initialized at {:?}", config.db_path);

    let images: Arc<dyn ImageStore> = Arc::new(DiskImageStore::new(config.images_dir.clone()));
    let profiles = Arc::new(ProfileService::new(
        db.clone(),
        images.clone(),
        config.clone(),
    ));
    let assets = Arc::new(AssetService::new(db.clone(), config.clone()));
    let scheduler = Arc::new(JobScheduler::new(db, config.clone(), profiles.clone(), images));

    // Recovers interrupted jobs, re-enqueues waiting ones, launches the worker.
    scheduler.clone().start()?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .merge(api::router(profiles, assets, scheduler.clone()))
        .layer(cors);

    let addr = SocketAddr::new(config.host.parse()?, config.port);
    info!("Starting video service on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(scheduler))
        .await?;

    Ok(())
}

async fn shutdown_signal(scheduler: Arc<JobScheduler>) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    info!("Shutting down video service");
    scheduler.stop().await;
}
