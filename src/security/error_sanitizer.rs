use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::LazyLock;

static CONNECTION_STRING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(postgres|postgresql)://[^\s]+").expect("Invalid connection string regex")
});

static IP_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").expect("Invalid IP regex")
});

static FILE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(/[a-zA-Z0-9_\-.]+)+\.rs(:\d+)*").expect("Invalid path regex")
});

static SECRET_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(password|secret|token|api_key)\s*[=:]\s*[^\s,;]+")
        .expect("Invalid secret regex")
});

#[derive(Debug, Clone, Serialize)]
pub struct SafeErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, String>>,
}

impl SafeErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            code: None,
            details: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn internal_error() -> Self {
        Self::new("internal_error", "An internal error occurred")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("bad_request", message)
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    pub fn unauthorized() -> Self {
        Self::new("unauthorized", "Authentication required")
    }

    pub fn forbidden() -> Self {
        Self::new("forbidden", "You don't have permission to access this resource")
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("conflict", message)
    }

    pub fn status(&self) -> StatusCode {
        match self.error.as_str() {
            "bad_request" | "validation_error" => StatusCode::BAD_REQUEST,
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "forbidden" => StatusCode::FORBIDDEN,
            "not_found" => StatusCode::NOT_FOUND,
            "conflict" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_response_with_status(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

impl IntoResponse for SafeErrorResponse {
    fn into_response(self) -> Response {
        let status = self.status();
        self.into_response_with_status(status)
    }
}

/// Strips credentials, connection strings, addresses and source locations
/// from a message that may have come from the database driver.
pub fn sanitize_message(message: &str) -> String {
    let result = CONNECTION_STRING.replace_all(message, "[REDACTED]");
    let result = SECRET_ASSIGNMENT.replace_all(&result, "[REDACTED]");
    let result = IP_ADDRESS.replace_all(&result, "[IP_REDACTED]");
    FILE_PATH.replace_all(&result, "[PATH_REDACTED]").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(SafeErrorResponse::not_found("Deal").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            SafeErrorResponse::validation_error("bad").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(SafeErrorResponse::conflict("dup").status(), StatusCode::CONFLICT);
        assert_eq!(
            SafeErrorResponse::new("whatever", "x").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_explicit_status_wins() {
        let response = SafeErrorResponse::new("custom", "teapot")
            .into_response_with_status(StatusCode::IM_A_TEAPOT);
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }

    #[test]
    fn test_sanitize_connection_string() {
        let msg = sanitize_message("could not connect to postgres://crm:pw@db:5432/crm");
        assert!(!msg.contains("crm:pw"));
        assert!(msg.contains("[REDACTED]"));
    }

    #[test]
    fn test_sanitize_secrets_and_ips() {
        let msg = sanitize_message("password=hunter2 from 10.0.0.1");
        assert!(!msg.contains("hunter2"));
        assert!(!msg.contains("10.0.0.1"));
    }

    #[test]
    fn test_sanitize_source_paths() {
        let msg = sanitize_message("panic at /src/sales/invoices.rs:42:7");
        assert!(msg.contains("[PATH_REDACTED]"));
        assert!(!msg.contains("invoices.rs"));
    }

    #[test]
    fn test_plain_message_untouched() {
        let msg = "duplicate key value violates unique constraint \"products_sku_key\"";
        assert_eq!(sanitize_message(msg), msg);
    }

    #[test]
    fn test_details_serialized() {
        let body = SafeErrorResponse::bad_request("bad")
            .with_code("E100")
            .with_detail("field", "email");
        let json = serde_json::to_value(&body).expect("json");
        assert_eq!(json["code"], "E100");
        assert_eq!(json["details"]["field"], "email");
    }
}
