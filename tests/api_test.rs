use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use crmserver::core::shared::test_utils::TestAppStateBuilder;
use crmserver::main_module::build_app;
use crmserver::security::TokenSubject;

fn app_state() -> Arc<crmserver::core::shared::state::AppState> {
    Arc::new(TestAppStateBuilder::new().build())
}

fn bearer(state: &crmserver::core::shared::state::AppState, permissions: &[&str]) -> String {
    let pair = state
        .jwt_manager
        .issue(&TokenSubject {
            user_id: Uuid::new_v4(),
            username: "rep".into(),
            organization_id: Some(Uuid::new_v4()),
            roles: vec!["viewer".into()],
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            ..TokenSubject::default()
        })
        .expect("token");
    format!("Bearer {}", pair.access_token)
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn test_liveness_without_database() {
    let app = build_app(app_state());
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "crmserver");
}

#[tokio::test]
async fn test_trailing_slash_reaches_same_route() {
    let app = build_app(app_state());
    let response = app
        .oneshot(Request::get("/health/").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_readiness_reports_unreachable_database() {
    let app = build_app(app_state());
    let response = app
        .oneshot(Request::get("/api/health").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["database"], false);
}

#[tokio::test]
async fn test_protected_route_requires_token() {
    let app = build_app(app_state());
    let response = app
        .oneshot(
            Request::get("/api/crm/accounts")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_garbage_token_is_rejected() {
    let app = build_app(app_state());
    let response = app
        .oneshot(
            Request::get("/api/sales/invoices")
                .header(header::AUTHORIZATION, "Bearer not-a-jwt")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_missing_permission_is_forbidden() {
    let state = app_state();
    let token = bearer(&state, &["accounts.view"]);
    let app = build_app(state);
    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/crm/accounts")
                .header(header::AUTHORIZATION, token)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"name":"Acme"}"#))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json_body(response).await;
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn test_sales_stats_need_invoice_permission() {
    let state = app_state();
    let token = bearer(&state, &["quotes.view", "orders.view"]);
    let app = build_app(state);
    let response = app
        .oneshot(
            Request::get("/api/sales/stats/")
                .header(header::AUTHORIZATION, token)
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
