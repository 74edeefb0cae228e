use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use vigil_core::VigilConfig;
use vigil_hub::HubHandle;

use crate::auth::Authorizer;
use crate::store::DashboardStore;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: VigilConfig,
    pub hub: HubHandle,
    pub store: Arc<DashboardStore>,
    pub auth: Authorizer,
}

impl AppState {
    pub fn new(config: VigilConfig, hub: HubHandle, store: Arc<DashboardStore>) -> Self {
        let auth = Authorizer::from_config(&config.gateway.auth);
        Self {
            config,
            hub,
            store,
            auth,
        }
    }
}

/// Assemble the full Axum router. Everything except `/health` sits behind
/// the auth layer.
pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/ws", get(crate::ws::connection::ws_handler))
        .route("/api/status", get(crate::http::status::status_handler))
        .route("/api/clients", get(crate::http::status::clients_handler))
        .route("/api/events", post(crate::http::events::publish_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_auth,
        ));

    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .merge(protected)
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
