use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::{config::AuthConfig, error::AuthError, types::AuthenticatedUser};
use crate::core::shared::state::AppState;
use crate::security::jwt::JwtManager;

#[derive(Clone)]
pub struct AuthMiddlewareState {
    pub config: Arc<AuthConfig>,
    pub jwt_manager: Arc<JwtManager>,
}

impl AuthMiddlewareState {
    pub fn new(config: Arc<AuthConfig>, jwt_manager: Arc<JwtManager>) -> Self {
        Self {
            config,
            jwt_manager,
        }
    }

    pub fn from_app_state(state: &AppState) -> Self {
        Self::new(state.auth_config.clone(), state.jwt_manager.clone())
    }
}

/// Resolves the caller from the bearer token and stores an
/// [`AuthenticatedUser`] in the request extensions.
pub async fn auth_middleware(
    State(state): State<AuthMiddlewareState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let path = request.uri().path().to_string();

    if state.config.is_public_path(&path) || state.config.is_anonymous_allowed(&path) {
        request
            .extensions_mut()
            .insert(AuthenticatedUser::anonymous());
        return Ok(next.run(request).await);
    }

    match authenticate(request.headers(), &state).await {
        Ok(user) => {
            debug!("Authenticated {} for {}", user.username, path);
            request.extensions_mut().insert(user);
            Ok(next.run(request).await)
        }
        Err(AuthError::MissingToken) if !state.config.require_auth => {
            request
                .extensions_mut()
                .insert(AuthenticatedUser::anonymous());
            Ok(next.run(request).await)
        }
        Err(e) => {
            debug!("Rejected {path}: {}", e.error_code());
            Err(e)
        }
    }
}

async fn authenticate(
    headers: &HeaderMap,
    state: &AuthMiddlewareState,
) -> Result<AuthenticatedUser, AuthError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix(state.config.bearer_prefix.as_str()))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;

    let claims = state.jwt_manager.validate_access_token(token).map_err(|e| {
        if e.to_string().contains("ExpiredSignature") {
            AuthError::ExpiredToken
        } else {
            AuthError::InvalidToken
        }
    })?;

    if state.jwt_manager.is_revoked(&claims.jti).await {
        return Err(AuthError::InvalidToken);
    }

    let mut user = AuthenticatedUser::from_claims(&claims)?;

    let requested_org = headers
        .get(state.config.org_id_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(raw) = requested_org {
        let org_id = Uuid::parse_str(raw).map_err(|_| AuthError::OrganizationAccessDenied)?;
        if !user.can_access_organization(&org_id) {
            return Err(AuthError::OrganizationAccessDenied);
        }
        user.organization_id = Some(org_id);
    }

    Ok(user)
}
