use dotenvy::dotenv;
use log::{error, info};
use std::sync::Arc;

use crmserver::core::config::AppConfig;
use crmserver::core::shared::state::AppState;
use crmserver::core::shared::utils::{create_conn, run_migrations};
use crmserver::main_module::{run_axum_server, run_bootstrap};
use crmserver::security::{AuthConfig, JwtManager};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .write_style(env_logger::WriteStyle::Always)
        .init();
    info!("Starting crmserver {}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().map_err(|e| {
        error!("Failed to load configuration: {e}");
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let pool = create_conn(&config.database).map_err(|e| {
        error!("Database connection failed: {e}");
        std::io::Error::new(std::io::ErrorKind::ConnectionRefused, e.to_string())
    })?;

    if config.database.run_migrations {
        let migration_pool = pool.clone();
        tokio::task::spawn_blocking(move || run_migrations(&migration_pool))
            .await
            .map_err(std::io::Error::other)?
            .map_err(|e| {
                error!("Migrations failed: {e}");
                std::io::Error::other(e.to_string())
            })?;
    }

    if let Err(e) = run_bootstrap(pool.clone(), config.bootstrap.clone()).await {
        error!("Bootstrap failed: {e:#}");
        return Err(std::io::Error::other(e.to_string()));
    }

    let jwt_manager = JwtManager::from_settings(&config.auth).map_err(|e| {
        error!("Failed to initialize JWT manager: {e}");
        std::io::Error::other(e.to_string())
    })?;
    let auth_config = AuthConfig::from_settings(&config.auth);

    let app_state = Arc::new(AppState::new(
        pool,
        config,
        Arc::new(jwt_manager),
        Arc::new(auth_config),
    ));
    run_axum_server(app_state).await
}
