mod config;
mod db;
mod routes;
mod state;
mod storage;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "critique=info,tower_http=info".into()),
        )
        .init();

    let config = config::Config::from_env()?;
    let config = Arc::new(config);

    crate::storage::ensure_dirs(&config.upload_folder)?;

    let db = db::connect(&config.backend).await?;
    db.initialize().await?;

    let state = Arc::new(state::AppState {
        db,
        storage: Arc::new(storage::LocalStore::new(config.upload_folder.clone())),
        config: config.clone(),
    });

    let app = Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/images", get(routes::list_images))
        .route("/api/upload", post(routes::upload_image))
        .route("/api/images/:id", axum::routing::delete(routes::delete_image))
        .route("/api/images/:id/reviews", get(routes::image_reviews))
        .route("/api/images/:id/review", post(routes::review_image))
        .route(
            "/api/images/:id/like",
            post(routes::like_image).delete(routes::unlike_image),
        )
        .route("/api/images/:id/likes", get(routes::image_likes))
        .layer(DefaultBodyLimit::max(config.body_limit()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Critique listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
