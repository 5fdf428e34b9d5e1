use crate::core::config::AuthSettings;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub require_auth: bool,
    pub bearer_prefix: String,
    pub allow_anonymous_paths: Vec<String>,
    pub public_paths: Vec<String>,
    pub org_id_header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            bearer_prefix: "Bearer ".to_string(),
            allow_anonymous_paths: vec![
                "/health".to_string(),
                "/api/health".to_string(),
                "/api/auth/login".to_string(),
                "/api/auth/refresh".to_string(),
            ],
            public_paths: vec!["/favicon.ico".to_string(), "/robots.txt".to_string()],
            org_id_header: "X-Organization-ID".to_string(),
        }
    }
}

impl AuthConfig {
    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self::default().with_require_auth(settings.require_auth)
    }

    pub fn with_require_auth(mut self, require: bool) -> Self {
        self.require_auth = require;
        self
    }

    pub fn add_anonymous_path(mut self, path: impl Into<String>) -> Self {
        self.allow_anonymous_paths.push(path.into());
        self
    }

    pub fn is_public_path(&self, path: &str) -> bool {
        self.public_paths
            .iter()
            .any(|public| path == public || path.starts_with(&format!("{public}/")))
    }

    pub fn is_anonymous_allowed(&self, path: &str) -> bool {
        self.allow_anonymous_paths
            .iter()
            .any(|allowed| path == allowed || path.starts_with(&format!("{allowed}/")))
    }
}
