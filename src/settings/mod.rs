pub mod rbac;
pub mod system;

use axum::Router;
use std::sync::Arc;

use crate::core::shared::state::AppState;

pub fn configure_settings_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(rbac::configure_rbac_routes())
        .merge(system::configure_system_routes())
}
