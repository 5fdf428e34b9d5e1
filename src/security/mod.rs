pub mod auth_api;
pub mod cors;
pub mod error_sanitizer;
pub mod jwt;
pub mod password;
pub mod rbac_middleware;
pub mod validation;

pub use auth_api::{
    auth_middleware, Action, AuthConfig, AuthError, AuthMiddlewareState, AuthenticatedUser,
    Permission, Resource, Role, SUPERUSER_ROLE,
};
pub use cors::{create_cors_layer, CorsConfig};
pub use error_sanitizer::{sanitize_message, SafeErrorResponse};
pub use jwt::{
    extract_bearer_token, Claims, JwtAlgorithm, JwtConfig, JwtKey, JwtManager, TokenPair,
    TokenSubject, TokenType,
};
pub use password::{
    generate_password, hash_password, password_policy_errors, verify_password, Argon2Config,
    CrmPasswordHasher, PasswordIssue, PasswordPolicy,
};
pub use rbac_middleware::{
    build_default_route_permissions, rbac_middleware, AccessDecision, AccessDecisionResult,
    RbacConfig, RbacManager, RoutePermission,
};
pub use validation::{ValidationError, ValidationResult, Validator};
