// HTTP transport: owns the transaction around each mapper call

pub mod handlers;
pub mod request;

use std::sync::Arc;

use axum::{routing::get, Router};
use sqlx::PgPool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::config;
use crate::mapper::OwnershipMapper;

/// Shared by every request
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub mapper: Arc<OwnershipMapper>,
}

pub fn router(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(handlers::health))
        .merge(data_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config().api.enable_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

fn data_routes() -> Router<AppState> {
    Router::new()
        // Type-level operations (collection)
        .route(
            "/api/:type",
            get(handlers::collection_get)
                .post(handlers::collection_post)
                .put(handlers::collection_put)
                .patch(handlers::collection_patch)
                .delete(handlers::collection_delete),
        )
        // Object-level operations
        .route(
            "/api/:type/:id",
            get(handlers::object_get)
                .put(handlers::object_put)
                .patch(handlers::object_patch)
                .delete(handlers::object_delete),
        )
}
