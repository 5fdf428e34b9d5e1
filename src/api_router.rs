//! Combines the routes of every module into one router.
//!
//! Paths are absolute (`/api/...`) except the sign-in routes, which are
//! nested under `/api/auth`.

use axum::{routing::get, Router};
use std::sync::Arc;

use crate::core::shared::state::AppState;
use crate::main_module::{health_check, health_check_simple};

pub const AUTH_PREFIX: &str = "/api/auth";

pub fn configure_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check_simple))
        .route("/api/health", get(health_check))
        // ===== Identity and administration =====
        .nest(AUTH_PREFIX, crate::directory::auth_routes::configure())
        .merge(crate::directory::users::configure_user_routes())
        .merge(crate::settings::configure_settings_routes())
        .merge(crate::core::organization::configure())
        .merge(crate::core::session::configure())
        // ===== CRM =====
        .merge(crate::crm::configure_crm_routes())
        .merge(crate::activities::configure_activity_routes())
        // ===== Catalogue and sales documents =====
        .merge(crate::products::configure_products_api_routes())
        .merge(crate::sales::configure_sales_routes())
        .merge(crate::dashboards::configure_dashboards_routes())
}
