//! Home dashboard: record counts, pipeline value, activity load and overdue
//! invoices for the current company.

pub mod handlers;
pub mod types;

use axum::{routing::get, Router};
use std::sync::Arc;

use crate::core::shared::state::AppState;

pub use handlers::*;
pub use types::*;

pub fn configure_dashboards_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/dashboard/summary", get(handle_get_summary))
}
