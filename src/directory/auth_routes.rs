use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{Duration, Utc};
use diesel::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::shared::error::ApiError;
use crate::core::shared::models::User;
use crate::core::shared::schema::users;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::run_blocking;
use crate::directory::identity::{resolve_identity, Identity};
use crate::security::auth_api::AuthenticatedUser;
use crate::security::jwt::TokenPair;
use crate::security::password::verify_password;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email address.
    #[serde(alias = "email")]
    pub username: String,
    pub password: String,
    pub organization_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_expires_in: i64,
    pub user: CurrentUserResponse,
}

impl LoginResponse {
    pub(crate) fn new(tokens: TokenPair, identity: &Identity) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_type: tokens.token_type,
            expires_in: tokens.expires_in,
            refresh_expires_in: tokens.refresh_expires_in,
            user: CurrentUserResponse::from(identity),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentUserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: String,
    pub is_superuser: bool,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub organization_id: Uuid,
}

impl From<&Identity> for CurrentUserResponse {
    fn from(identity: &Identity) -> Self {
        let user = &identity.user;
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            display_name: user.display_name(),
            is_superuser: user.is_superuser,
            roles: identity.roles.clone(),
            permissions: identity.permissions.clone(),
            organization_id: identity.organization_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
    pub message: String,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(get_current_user))
        .route("/refresh", post(refresh_token))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let login = req.username.trim().to_string();
    if login.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("Username and password are required"));
    }
    info!("Login attempt for: {login}");

    let identity = run_blocking(&state.conn, move |conn| {
        let user: Option<User> = users::table
            .filter(
                users::username
                    .eq(&login)
                    .or(users::email.eq(login.to_lowercase())),
            )
            .select(User::as_select())
            .first(conn)
            .optional()?;

        let Some(user) = user else {
            warn!("Login failed for {login}: unknown user");
            return Err(invalid_credentials());
        };

        match verify_password(&req.password, &user.password_hash) {
            Ok(true) => {}
            Ok(false) => {
                warn!("Login failed for {login}: wrong password");
                return Err(invalid_credentials());
            }
            Err(e) => {
                warn!("Login failed for {login}: unreadable password hash: {e}");
                return Err(invalid_credentials());
            }
        }

        if !user.is_active {
            warn!("Login refused for disabled account {login}");
            return Err(ApiError::Unauthorized("Account is disabled".into()));
        }

        diesel::update(users::table.find(user.id))
            .set(users::last_login_at.eq(Some(Utc::now())))
            .execute(conn)?;

        resolve_identity(conn, user.id, req.organization_id)
    })
    .await?;

    let tokens = state
        .jwt_manager
        .issue(&identity.token_subject())
        .map_err(|e| ApiError::Internal(format!("Failed to issue tokens: {e}")))?;

    info!(
        "User {} logged in to company {}",
        identity.user.username, identity.organization_id
    );
    Ok(Json(LoginResponse::new(tokens, &identity)))
}

pub async fn get_current_user(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<CurrentUserResponse>, ApiError> {
    let org = user.organization_id;
    let identity = run_blocking(&state.conn, move |conn| {
        resolve_identity(conn, user.user_id, org)
    })
    .await?;
    Ok(Json(CurrentUserResponse::from(&identity)))
}

pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshTokenRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let claims = state
        .jwt_manager
        .redeem_refresh_token(&req.refresh_token)
        .await
        .map_err(|e| {
            warn!("Refresh rejected: {e}");
            ApiError::Unauthorized("Invalid or expired refresh token".into())
        })?;

    let user_id = claims
        .user_id()
        .map_err(|_| ApiError::Unauthorized("Invalid refresh token subject".into()))?;
    let org = claims
        .organization_id()
        .map_err(|_| ApiError::Unauthorized("Invalid refresh token company".into()))?;

    let identity =
        run_blocking(&state.conn, move |conn| resolve_identity(conn, user_id, org)).await?;

    let tokens = state
        .jwt_manager
        .issue(&identity.token_subject())
        .map_err(|e| ApiError::Internal(format!("Failed to issue tokens: {e}")))?;

    info!("Refreshed tokens for {}", identity.user.username);
    Ok(Json(LoginResponse::new(tokens, &identity)))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    body: Option<Json<LogoutRequest>>,
) -> Json<LogoutResponse> {
    let req = body.map(|Json(req)| req).unwrap_or_default();

    if let Some(jti) = &user.token_id {
        let expires_at = Utc::now()
            + Duration::minutes(state.jwt_manager.config().access_token_expiry_minutes);
        state
            .jwt_manager
            .revoke_token(jti, expires_at.timestamp())
            .await;
    }

    if let Some(refresh) = req.refresh_token.as_deref() {
        if let Err(e) = state.jwt_manager.revoke_by_token(refresh).await {
            warn!("Ignoring unusable refresh token on logout: {e}");
        }
    }

    info!("User {} logged out", user.username);
    Json(LogoutResponse {
        success: true,
        message: "Logged out successfully".to_string(),
    })
}

fn invalid_credentials() -> ApiError {
    ApiError::Unauthorized("Invalid username or password".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_request_accepts_email_alias() {
        let req: LoginRequest =
            serde_json::from_str(r#"{"email": "a@example.com", "password": "x"}"#)
                .expect("parse");
        assert_eq!(req.username, "a@example.com");
        assert!(req.organization_id.is_none());
    }

    #[test]
    fn test_logout_request_defaults() {
        let req: LogoutRequest = serde_json::from_str("{}").expect("parse");
        assert!(req.refresh_token.is_none());
    }
}
