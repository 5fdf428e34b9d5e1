use super::*;
use crate::security::jwt::{JwtManager, TokenSubject};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::get,
    Router,
};
use std::str::FromStr;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "this-is-a-very-long-secret-key-for-testing-purposes-only";

fn manager() -> Arc<JwtManager> {
    Arc::new(JwtManager::from_secret(SECRET).expect("manager"))
}

fn app(jwt: Arc<JwtManager>, require_auth: bool) -> Router {
    let state = AuthMiddlewareState::new(
        Arc::new(AuthConfig::default().with_require_auth(require_auth)),
        jwt,
    );
    Router::new()
        .route(
            "/api/crm/accounts",
            get(|user: AuthenticatedUser| async move {
                format!("{}:{}", user.username, user.organization_id.unwrap_or_default())
            }),
        )
        .route("/api/health", get(|| async { "ok" }))
        .layer(from_fn_with_state(state, auth_middleware))
}

fn token_for(jwt: &JwtManager, org: Uuid, roles: Vec<String>) -> String {
    jwt.issue(&TokenSubject {
        user_id: Uuid::new_v4(),
        username: "jdoe".into(),
        email: None,
        organization_id: Some(org),
        roles,
        permissions: vec!["accounts.view".into()],
    })
    .expect("issue")
    .access_token
}

async fn body_text(response: axum::response::Response) -> String {
    use http_body_util::BodyExt;
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf8")
}

#[test]
fn test_permission_codename_round_trip() {
    let perm = Permission::new(Resource::Invoices, Action::Change);
    assert_eq!(perm.codename(), "invoices.change");
    assert_eq!(Permission::from_str("invoices.change").expect("parse"), perm);
    assert!(Permission::from_str("invoices.fly").is_err());
    assert!(Permission::from_str("widgets.view").is_err());
}

#[test]
fn test_catalog_covers_every_resource_action() {
    let catalog = Permission::catalog();
    assert_eq!(catalog.len(), Resource::ALL.len() * Action::ALL.len());
    assert!(catalog.contains(&Permission::new(Resource::Company, Action::Change)));
}

#[test]
fn test_system_role_permissions() {
    assert_eq!(Role::Admin.permissions().len(), Permission::catalog().len());

    let manager = Role::SalesManager.permissions();
    assert!(manager.contains(&Permission::new(Resource::Deals, Action::Delete)));
    assert!(manager.contains(&Permission::new(Resource::Users, Action::View)));
    assert!(!manager.contains(&Permission::new(Resource::Users, Action::Add)));

    let rep = Role::SalesRep.permissions();
    assert!(rep.contains(&Permission::new(Resource::Leads, Action::Add)));
    assert!(rep.contains(&Permission::new(Resource::Activities, Action::Delete)));
    assert!(!rep.contains(&Permission::new(Resource::Leads, Action::Delete)));
    assert!(!rep.contains(&Permission::new(Resource::Invoices, Action::Add)));
    assert!(!rep.contains(&Permission::new(Resource::Settings, Action::View)));

    let viewer = Role::Viewer.permissions();
    assert!(viewer.iter().all(|p| p.action == Action::View));
    assert!(!viewer.contains(&Permission::new(Resource::Roles, Action::View)));
}

#[test]
fn test_role_from_str() {
    assert_eq!(Role::from_str("sales_rep"), Ok(Role::SalesRep));
    assert_eq!(Role::from_str("ADMIN"), Ok(Role::Admin));
    assert!(Role::from_str("janitor").is_err());
}

#[test]
fn test_user_permissions() {
    let org = Uuid::new_v4();
    let user = AuthenticatedUser::new(Uuid::new_v4(), "rep".into())
        .with_role("sales_rep")
        .with_permissions(["leads.view", "leads.add"])
        .with_organization(org);

    assert!(user.is_authenticated());
    assert!(user.has_role("sales_rep"));
    assert!(user.can(Resource::Leads, Action::Add));
    assert!(!user.can(Resource::Leads, Action::Delete));
    assert!(user.require(Resource::Leads, Action::Delete).is_err());
    assert!(user.can_access_organization(&org));
    assert!(!user.can_access_organization(&Uuid::new_v4()));
    assert_eq!(user.org_id().expect("org"), org);
}

#[test]
fn test_superuser_bypasses_permissions() {
    let user = AuthenticatedUser::new(Uuid::new_v4(), "root".into()).with_superuser(true);
    assert!(user.can(Resource::Settings, Action::Delete));
    assert!(user.can_access_organization(&Uuid::new_v4()));
    assert!(user.org_id().is_err());
}

#[test]
fn test_anonymous_user() {
    let anon = AuthenticatedUser::anonymous();
    assert!(!anon.is_authenticated());
    assert!(!anon.has_permission("accounts.view"));
}

#[test]
fn test_user_from_claims() {
    let jwt = manager();
    let org = Uuid::new_v4();
    let token = token_for(&jwt, org, vec![SUPERUSER_ROLE.into()]);
    let claims = jwt.validate_access_token(&token).expect("claims");
    let user = AuthenticatedUser::from_claims(&claims).expect("user");
    assert!(user.is_superuser);
    assert_eq!(user.organization_id, Some(org));
    assert_eq!(user.sorted_permissions(), vec!["accounts.view".to_string()]);
    assert_eq!(user.token_id.as_deref(), Some(claims.jti.as_str()));
}

#[test]
fn test_auth_config_paths() {
    let config = AuthConfig::default().add_anonymous_path("/api/public");
    assert!(config.is_anonymous_allowed("/api/auth/login"));
    assert!(config.is_anonymous_allowed("/api/public/docs"));
    assert!(!config.is_anonymous_allowed("/api/auth/me"));
    assert!(!config.is_anonymous_allowed("/api/healthcheck"));
    assert!(config.is_public_path("/favicon.ico"));
}

#[test]
fn test_auth_error_responses() {
    assert_eq!(
        AuthError::MissingToken.into_response().status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        AuthError::OrganizationAccessDenied.into_response().status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(AuthError::ExpiredToken.error_code(), "expired_token");
}

#[tokio::test]
async fn test_middleware_rejects_missing_token() {
    let response = app(manager(), true)
        .oneshot(
            Request::builder()
                .uri("/api/crm/accounts")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(body_text(response).await.contains("missing_token"));
}

#[tokio::test]
async fn test_middleware_allows_anonymous_paths() {
    let response = app(manager(), true)
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_middleware_accepts_valid_token() {
    let jwt = manager();
    let org = Uuid::new_v4();
    let token = token_for(&jwt, org, vec!["sales_rep".into()]);

    let response = app(jwt, true)
        .oneshot(
            Request::builder()
                .uri("/api/crm/accounts")
                .header("Authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, format!("jdoe:{org}"));
}

#[tokio::test]
async fn test_middleware_rejects_garbage_and_revoked_tokens() {
    let jwt = manager();
    let token = token_for(&jwt, Uuid::new_v4(), vec![]);

    let response = app(jwt.clone(), true)
        .oneshot(
            Request::builder()
                .uri("/api/crm/accounts")
                .header("Authorization", "Bearer not.a.token")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    jwt.revoke_by_token(&token).await.expect("revoke");
    let response = app(jwt, true)
        .oneshot(
            Request::builder()
                .uri("/api/crm/accounts")
                .header("Authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_org_header_requires_membership() {
    let jwt = manager();
    let org = Uuid::new_v4();
    let token = token_for(&jwt, org, vec!["viewer".into()]);

    let response = app(jwt.clone(), true)
        .oneshot(
            Request::builder()
                .uri("/api/crm/accounts")
                .header("Authorization", format!("Bearer {token}"))
                .header("X-Organization-ID", Uuid::new_v4().to_string())
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let other = Uuid::new_v4();
    let admin_token = token_for(&jwt, org, vec![SUPERUSER_ROLE.into()]);
    let response = app(jwt, true)
        .oneshot(
            Request::builder()
                .uri("/api/crm/accounts")
                .header("Authorization", format!("Bearer {admin_token}"))
                .header("X-Organization-ID", other.to_string())
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, format!("jdoe:{other}"));
}

#[tokio::test]
async fn test_optional_auth_lets_anonymous_through_to_extractor() {
    let response = app(manager(), false)
        .oneshot(
            Request::builder()
                .uri("/api/crm/accounts")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    // the middleware passes, the extractor still demands a real user
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
