use std::sync::Arc;

use crate::core::config::AppConfig;
use crate::core::shared::utils::DbPool;
use crate::security::auth_api::AuthConfig;
use crate::security::jwt::JwtManager;

pub struct AppState {
    pub conn: DbPool,
    pub config: AppConfig,
    pub jwt_manager: Arc<JwtManager>,
    pub auth_config: Arc<AuthConfig>,
}

impl AppState {
    pub fn new(
        conn: DbPool,
        config: AppConfig,
        jwt_manager: Arc<JwtManager>,
        auth_config: Arc<AuthConfig>,
    ) -> Self {
        Self {
            conn,
            config,
            jwt_manager,
            auth_config,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("server", &self.config.server)
            .field("require_auth", &self.auth_config.require_auth)
            .finish_non_exhaustive()
    }
}
