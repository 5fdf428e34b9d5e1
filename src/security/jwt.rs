use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::config::AuthSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub issuer: String,
    pub audience: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
    pub algorithm: JwtAlgorithm,
    pub leeway_seconds: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            issuer: "crmserver".into(),
            audience: "crmserver-api".into(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
            algorithm: JwtAlgorithm::HS256,
            leeway_seconds: 60,
        }
    }
}

impl From<&AuthSettings> for JwtConfig {
    fn from(settings: &AuthSettings) -> Self {
        Self {
            issuer: settings.issuer.clone(),
            audience: settings.audience.clone(),
            access_token_expiry_minutes: settings.access_token_minutes,
            refresh_token_expiry_days: settings.refresh_token_days,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JwtAlgorithm {
    HS256,
    HS384,
    HS512,
}

impl JwtAlgorithm {
    pub fn to_jsonwebtoken(&self) -> Algorithm {
        match self {
            Self::HS256 => Algorithm::HS256,
            Self::HS384 => Algorithm::HS384,
            Self::HS512 => Algorithm::HS512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub jti: String,
    #[serde(rename = "type")]
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

impl Claims {
    pub fn new(
        user_id: Uuid,
        issuer: &str,
        audience: &str,
        token_type: TokenType,
        expiry: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            sub: user_id.to_string(),
            iss: issuer.to_string(),
            aud: audience.to_string(),
            exp: expiry.timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type: token_type.as_str().to_string(),
            email: None,
            username: None,
            roles: None,
            permissions: None,
            organization_id: None,
        }
    }

    pub fn with_email(mut self, email: String) -> Self {
        self.email = Some(email);
        self
    }

    pub fn with_username(mut self, username: String) -> Self {
        self.username = Some(username);
        self
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = Some(roles);
        self
    }

    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn with_organization_id(mut self, org_id: Uuid) -> Self {
        self.organization_id = Some(org_id.to_string());
        self
    }

    pub fn user_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|e| anyhow!("Invalid user ID in claims: {e}"))
    }

    pub fn organization_id(&self) -> Result<Option<Uuid>> {
        self.organization_id
            .as_deref()
            .map(|id| Uuid::parse_str(id).map_err(|e| anyhow!("Invalid organization ID in claims: {e}")))
            .transpose()
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }

    pub fn is_access_token(&self) -> bool {
        self.token_type == TokenType::Access.as_str()
    }

    pub fn is_refresh_token(&self) -> bool {
        self.token_type == TokenType::Refresh.as_str()
    }
}

/// Identity baked into an access token.
#[derive(Debug, Clone, Default)]
pub struct TokenSubject {
    pub user_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub organization_id: Option<Uuid>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_expires_in: i64,
}

#[derive(Debug, Clone)]
pub enum JwtKey {
    Symmetric(Vec<u8>),
}

impl JwtKey {
    pub fn from_secret(secret: &str) -> Self {
        Self::Symmetric(secret.as_bytes().to_vec())
    }
}

pub struct JwtManager {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    // jti -> expiry timestamp of the revoked token
    blacklist: Arc<RwLock<HashMap<String, i64>>>,
}

impl JwtManager {
    pub fn new(config: JwtConfig, key: JwtKey) -> Result<Self> {
        let JwtKey::Symmetric(secret) = key;
        if secret.len() < 32 {
            return Err(anyhow!("JWT secret must be at least 32 characters"));
        }

        Ok(Self {
            config,
            encoding_key: EncodingKey::from_secret(&secret),
            decoding_key: DecodingKey::from_secret(&secret),
            blacklist: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn from_secret(secret: &str) -> Result<Self> {
        Self::new(JwtConfig::default(), JwtKey::from_secret(secret))
    }

    pub fn from_settings(settings: &AuthSettings) -> Result<Self> {
        let manager = Self::new(JwtConfig::from(settings), JwtKey::from_secret(&settings.jwt_secret))?;
        info!(
            "JWT manager initialized (access {}m, refresh {}d)",
            settings.access_token_minutes, settings.refresh_token_days
        );
        Ok(manager)
    }

    fn encode_claims(&self, claims: &Claims) -> Result<String> {
        let header = Header::new(self.config.algorithm.to_jsonwebtoken());
        encode(&header, claims, &self.encoding_key)
            .map_err(|e| anyhow!("Failed to encode {} token: {e}", claims.token_type))
    }

    pub fn generate_token_pair(&self, user_id: Uuid) -> Result<TokenPair> {
        self.issue(&TokenSubject {
            user_id,
            ..TokenSubject::default()
        })
    }

    pub fn issue(&self, subject: &TokenSubject) -> Result<TokenPair> {
        let now = Utc::now();
        let access_expiry = now + Duration::minutes(self.config.access_token_expiry_minutes);
        let refresh_expiry = now + Duration::days(self.config.refresh_token_expiry_days);

        let mut access_claims = Claims::new(
            subject.user_id,
            &self.config.issuer,
            &self.config.audience,
            TokenType::Access,
            access_expiry,
        )
        .with_roles(subject.roles.clone())
        .with_permissions(subject.permissions.clone());

        if !subject.username.is_empty() {
            access_claims = access_claims.with_username(subject.username.clone());
        }
        if let Some(email) = &subject.email {
            access_claims = access_claims.with_email(email.clone());
        }

        let mut refresh_claims = Claims::new(
            subject.user_id,
            &self.config.issuer,
            &self.config.audience,
            TokenType::Refresh,
            refresh_expiry,
        );

        if let Some(org_id) = subject.organization_id {
            access_claims = access_claims.with_organization_id(org_id);
            refresh_claims = refresh_claims.with_organization_id(org_id);
        }

        Ok(TokenPair {
            access_token: self.encode_claims(&access_claims)?,
            refresh_token: self.encode_claims(&refresh_claims)?,
            token_type: "Bearer".into(),
            expires_in: self.config.access_token_expiry_minutes * 60,
            refresh_expires_in: self.config.refresh_token_expiry_days * 24 * 60 * 60,
        })
    }

    pub fn validate_token(&self, token: &str) -> Result<TokenData<Claims>> {
        let mut validation = Validation::new(self.config.algorithm.to_jsonwebtoken());
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[&self.config.audience]);
        validation.leeway = self.config.leeway_seconds;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| anyhow!("Token validation failed: {e}"))
    }

    pub fn validate_access_token(&self, token: &str) -> Result<Claims> {
        let token_data = self.validate_token(token)?;

        if !token_data.claims.is_access_token() {
            return Err(anyhow!("Token is not an access token"));
        }

        Ok(token_data.claims)
    }

    pub fn validate_refresh_token(&self, token: &str) -> Result<Claims> {
        let token_data = self.validate_token(token)?;

        if !token_data.claims.is_refresh_token() {
            return Err(anyhow!("Token is not a refresh token"));
        }

        Ok(token_data.claims)
    }

    /// Validates a refresh token and revokes it so it cannot be replayed.
    pub async fn redeem_refresh_token(&self, token: &str) -> Result<Claims> {
        let claims = self.validate_refresh_token(token)?;

        if self.is_revoked(&claims.jti).await {
            return Err(anyhow!("Refresh token has been revoked"));
        }

        self.revoke_token(&claims.jti, claims.exp).await;
        debug!("Redeemed refresh token for user {}", claims.sub);
        Ok(claims)
    }

    pub async fn revoke_token(&self, jti: &str, expires_at: i64) {
        let mut blacklist = self.blacklist.write().await;
        blacklist.insert(jti.to_string(), expires_at);
        debug!("Revoked token {jti}");
    }

    pub async fn revoke_by_token(&self, token: &str) -> Result<()> {
        let token_data = self.validate_token(token)?;
        self.revoke_token(&token_data.claims.jti, token_data.claims.exp)
            .await;
        Ok(())
    }

    pub async fn is_revoked(&self, jti: &str) -> bool {
        let blacklist = self.blacklist.read().await;
        blacklist.contains_key(jti)
    }

    /// Drops revoked entries whose tokens have expired anyway.
    pub async fn cleanup_blacklist(&self, now: DateTime<Utc>) -> usize {
        let mut blacklist = self.blacklist.write().await;
        let initial_count = blacklist.len();
        let cutoff = now.timestamp() - self.config.leeway_seconds as i64;
        blacklist.retain(|_, exp| *exp >= cutoff);
        let removed = initial_count - blacklist.len();
        if removed > 0 {
            info!("Cleaned up {removed} entries from token blacklist");
        }
        removed
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }
}

pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_manager() -> JwtManager {
        JwtManager::from_secret("this-is-a-very-long-secret-key-for-testing-purposes-only")
            .expect("Failed to create manager")
    }

    fn subject() -> TokenSubject {
        TokenSubject {
            user_id: Uuid::new_v4(),
            username: "jdoe".into(),
            email: Some("jdoe@example.com".into()),
            organization_id: Some(Uuid::new_v4()),
            roles: vec!["sales_rep".into()],
            permissions: vec!["accounts.view".into(), "leads.add".into()],
        }
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(JwtManager::from_secret("too-short").is_err());
    }

    #[test]
    fn test_generate_token_pair() {
        let manager = create_test_manager();
        let pair = manager
            .generate_token_pair(Uuid::new_v4())
            .expect("Failed to generate");

        assert!(!pair.access_token.is_empty());
        assert!(!pair.refresh_token.is_empty());
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 15 * 60);
    }

    #[test]
    fn test_access_token_carries_identity() {
        let manager = create_test_manager();
        let subject = subject();
        let pair = manager.issue(&subject).expect("Failed to issue");

        let claims = manager
            .validate_access_token(&pair.access_token)
            .expect("Validation failed");

        assert_eq!(claims.user_id().expect("Invalid user ID"), subject.user_id);
        assert_eq!(claims.username.as_deref(), Some("jdoe"));
        assert_eq!(claims.email.as_deref(), Some("jdoe@example.com"));
        assert_eq!(claims.roles, Some(vec!["sales_rep".to_string()]));
        assert_eq!(
            claims.organization_id().expect("org"),
            subject.organization_id
        );
        assert!(claims.is_access_token());
    }

    #[test]
    fn test_refresh_token_is_minimal() {
        let manager = create_test_manager();
        let subject = subject();
        let pair = manager.issue(&subject).expect("Failed to issue");
        let claims = manager
            .validate_refresh_token(&pair.refresh_token)
            .expect("Validation failed");

        assert!(claims.is_refresh_token());
        assert!(claims.permissions.is_none());
        assert_eq!(
            claims.organization_id().expect("org"),
            subject.organization_id
        );
    }

    #[test]
    fn test_invalid_token() {
        let manager = create_test_manager();
        assert!(manager.validate_token("invalid.token.here").is_err());
    }

    #[test]
    fn test_token_from_other_secret_rejected() {
        let manager = create_test_manager();
        let other = JwtManager::from_secret("another-secret-that-is-also-long-enough-123")
            .expect("manager");
        let pair = other.generate_token_pair(Uuid::new_v4()).expect("pair");
        assert!(manager.validate_access_token(&pair.access_token).is_err());
    }

    #[test]
    fn test_wrong_token_type() {
        let manager = create_test_manager();
        let pair = manager
            .generate_token_pair(Uuid::new_v4())
            .expect("Failed to generate");

        assert!(manager.validate_refresh_token(&pair.access_token).is_err());
        assert!(manager.validate_access_token(&pair.refresh_token).is_err());
    }

    #[tokio::test]
    async fn test_refresh_token_single_use() {
        let manager = create_test_manager();
        let pair = manager.issue(&subject()).expect("Failed to issue");

        manager
            .redeem_refresh_token(&pair.refresh_token)
            .await
            .expect("first redemption");
        assert!(manager
            .redeem_refresh_token(&pair.refresh_token)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_revoke_by_token() {
        let manager = create_test_manager();
        let pair = manager.issue(&subject()).expect("Failed to issue");
        let claims = manager
            .validate_access_token(&pair.access_token)
            .expect("valid");

        manager
            .revoke_by_token(&pair.access_token)
            .await
            .expect("Revoke failed");
        assert!(manager.is_revoked(&claims.jti).await);
    }

    #[tokio::test]
    async fn test_cleanup_blacklist_drops_expired_only() {
        let manager = create_test_manager();
        let now = Utc::now();
        manager
            .revoke_token("old", (now - Duration::hours(2)).timestamp())
            .await;
        manager
            .revoke_token("fresh", (now + Duration::hours(2)).timestamp())
            .await;

        assert_eq!(manager.cleanup_blacklist(now).await, 1);
        assert!(!manager.is_revoked("old").await);
        assert!(manager.is_revoked("fresh").await);
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token("Bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer_token("bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer_token("Basic abc123"), None);
    }

    #[test]
    fn test_config_from_settings() {
        let settings = crate::core::config::AppConfig::default().auth;
        let config = JwtConfig::from(&settings);
        assert_eq!(config.issuer, settings.issuer);
        assert_eq!(config.refresh_token_expiry_days, 7);
    }
}
