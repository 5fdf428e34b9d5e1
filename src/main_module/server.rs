//! HTTP server initialization and routing

use axum::extract::Request;
use axum::{middleware, Router, ServiceExt};
use chrono::Utc;
use log::{debug, error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::Layer;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower_http::trace::TraceLayer;

use crate::api_router::configure_api_routes;
use crate::core::shared::state::AppState;
use crate::security::{
    auth_middleware, build_default_route_permissions, create_cors_layer, rbac_middleware,
    AuthMiddlewareState, RbacConfig, RbacManager,
};

use super::shutdown_signal;

const BLACKLIST_CLEANUP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// The full application: routes, then the RBAC check, then authentication
/// (which runs first), tracing and CORS. Trailing slashes are trimmed before
/// routing so `/api/auth/login/` reaches the same handler as `/api/auth/login`.
pub fn build_app(app_state: Arc<AppState>) -> NormalizePath<Router> {
    let route_permissions = build_default_route_permissions();
    info!(
        "RBAC initialized with {} route permissions",
        route_permissions.len()
    );
    let rbac_manager = Arc::new(RbacManager::new(RbacConfig::default(), route_permissions));
    let auth_state = AuthMiddlewareState::from_app_state(&app_state);
    let cors = create_cors_layer(&app_state.config.cors);

    let router = configure_api_routes()
        .with_state(app_state)
        // Layers run in reverse order: auth is added last so it runs before RBAC.
        .layer(middleware::from_fn_with_state(rbac_manager, rbac_middleware))
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    NormalizePathLayer::trim_trailing_slash().layer(router)
}

/// Periodically drops revoked tokens that have expired anyway.
fn spawn_blacklist_cleanup(app_state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(BLACKLIST_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            let removed = app_state.jwt_manager.cleanup_blacklist(Utc::now()).await;
            if removed > 0 {
                debug!("Removed {removed} expired entries from the token blacklist");
            }
        }
    });
}

pub async fn run_axum_server(app_state: Arc<AppState>) -> std::io::Result<()> {
    let host: std::net::IpAddr = app_state.config.server.host.parse().map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid server host '{}': {e}", app_state.config.server.host),
        )
    })?;
    let addr = SocketAddr::new(host, app_state.config.server.port);

    spawn_blacklist_cleanup(Arc::clone(&app_state));
    let app = build_app(app_state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {addr}: {e} - is another instance running?");
            return Err(e);
        }
    };
    info!("HTTP server listening on {addr}");

    axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(std::io::Error::other)?;
    info!("Server stopped");
    Ok(())
}
