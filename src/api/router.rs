use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::auth::require_auth;
use super::handlers;
use crate::AppState;

pub fn create_router(state: AppState) -> Router {
    // Public routes: no authentication required
    let public = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::render));

    // Protected API routes (Bearer token required when API_TOKEN is set)
    let protected = Router::new()
        // Positions
        .route("/api/positions", get(handlers::positions::list).post(handlers::positions::create))
        .route("/api/positions/preview", post(handlers::positions::preview))
        .route("/api/positions/:id", delete(handlers::positions::remove))
        // Portfolio risk
        .route("/api/exposure", get(handlers::exposure::summary))
        .route("/api/exposure/liquidation", get(handlers::exposure::liquidation))
        .route("/api/scenario", post(handlers::scenario::run))
        .route("/api/scenario/presets", get(handlers::scenario::presets))
        // Adjustments
        .route("/api/adjustments", get(handlers::adjustments::list))
        .route("/api/adjustments/history", get(handlers::adjustments::history))
        .route("/api/adjustments/:id/accept", post(handlers::adjustments::accept))
        .route("/api/adjustments/:id/dismiss", post(handlers::adjustments::dismiss))
        // Settings
        .route(
            "/api/settings",
            get(handlers::settings::get_settings).put(handlers::settings::update_settings),
        )
        // Control
        .route("/api/control/reconcile", post(handlers::control::reconcile))
        .route("/api/control/sync-capital", post(handlers::control::sync_capital))
        // WebSocket
        .route("/ws", get(handlers::ws::handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // CORS: dashboard may be served from another origin; the API token still applies
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    public
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
