use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

use crate::core::config::CorsSettings;

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<Method>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![],
            allowed_methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::PATCH,
                Method::OPTIONS,
            ],
            allowed_headers: vec![
                "Content-Type".to_string(),
                "Authorization".to_string(),
                "X-Organization-ID".to_string(),
                "Accept".to_string(),
                "Accept-Language".to_string(),
                "Origin".to_string(),
            ],
            allow_credentials: true,
            max_age_secs: 3600,
        }
    }
}

impl From<&CorsSettings> for CorsConfig {
    fn from(settings: &CorsSettings) -> Self {
        Self {
            allowed_origins: settings
                .allowed_origins
                .iter()
                .map(|o| o.trim().trim_end_matches('/').to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            ..Self::default()
        }
    }
}

impl CorsConfig {
    pub fn with_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    /// Without configured origins any well-formed http(s) origin is echoed
    /// back, which keeps local frontends working during development.
    pub fn build(self) -> CorsLayer {
        let origins: Vec<HeaderValue> = self
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        let mut cors = if origins.is_empty() {
            info!("CORS: no origins configured, accepting any http(s) origin");
            CorsLayer::new().allow_origin(AllowOrigin::predicate(validate_origin))
        } else {
            info!("CORS: {} allowed origin(s)", origins.len());
            CorsLayer::new().allow_origin(origins)
        };

        let headers: Vec<header::HeaderName> = self
            .allowed_headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();

        cors = cors
            .allow_methods(self.allowed_methods)
            .allow_headers(headers)
            .max_age(std::time::Duration::from_secs(self.max_age_secs));

        if self.allow_credentials {
            cors = cors.allow_credentials(true);
        }

        cors
    }
}

pub fn create_cors_layer(settings: &CorsSettings) -> CorsLayer {
    CorsConfig::from(settings).build()
}

fn validate_origin(origin: &HeaderValue, _request: &axum::http::request::Parts) -> bool {
    origin.to_str().map(is_valid_origin_format).unwrap_or(false)
}

fn is_valid_origin_format(origin: &str) -> bool {
    let Some(rest) = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
    else {
        return false;
    };

    if rest.is_empty() || rest.contains('/') || rest.contains("..") {
        return false;
    }

    let lower = rest.to_lowercase();
    !["<", ">", "%3c", "%3e", "\\"]
        .iter()
        .any(|pattern| lower.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_format() {
        assert!(is_valid_origin_format("http://localhost:3000"));
        assert!(is_valid_origin_format("https://crm.example.com"));
        assert!(!is_valid_origin_format("ftp://example.com"));
        assert!(!is_valid_origin_format("https://"));
        assert!(!is_valid_origin_format("https://evil.com/<script>"));
        assert!(!is_valid_origin_format("javascript:alert(1)"));
    }

    #[test]
    fn test_from_settings_normalizes_origins() {
        let settings = CorsSettings {
            allowed_origins: vec![
                "https://crm.example.com/".to_string(),
                "  ".to_string(),
            ],
        };
        let config = CorsConfig::from(&settings);
        assert_eq!(config.allowed_origins, vec!["https://crm.example.com"]);
        assert!(config
            .allowed_headers
            .iter()
            .any(|h| h == "X-Organization-ID"));
    }
}
