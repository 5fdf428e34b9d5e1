use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::auth_api::{Action, AuthenticatedUser, Permission, Resource};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbacConfig {
    pub default_deny: bool,
    pub audit_all_decisions: bool,
}

impl Default for RbacConfig {
    fn default() -> Self {
        Self {
            default_deny: true,
            audit_all_decisions: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessDecision {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessDecisionResult {
    pub decision: AccessDecision,
    pub reason: String,
    pub matched_rule: Option<String>,
}

impl AccessDecisionResult {
    pub fn allow(reason: &str) -> Self {
        Self {
            decision: AccessDecision::Allow,
            reason: reason.to_string(),
            matched_rule: None,
        }
    }

    pub fn deny(reason: &str) -> Self {
        Self {
            decision: AccessDecision::Deny,
            reason: reason.to_string(),
            matched_rule: None,
        }
    }

    pub fn with_rule(mut self, rule: String) -> Self {
        self.matched_rule = Some(rule);
        self
    }

    pub fn is_allowed(&self) -> bool {
        self.decision == AccessDecision::Allow
    }
}

/// One row of the route table. An empty `required_permission` means any
/// authenticated user may call the route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutePermission {
    pub path_pattern: String,
    pub method: String,
    pub required_permission: String,
    pub allow_anonymous: bool,
}

impl RoutePermission {
    pub fn new(path_pattern: &str, method: &str, permission: &str) -> Self {
        Self {
            path_pattern: path_pattern.to_string(),
            method: method.to_string(),
            required_permission: permission.to_string(),
            allow_anonymous: false,
        }
    }

    pub fn with_anonymous(mut self, allow: bool) -> Self {
        self.allow_anonymous = allow;
        self
    }

    /// Segments written `{name}` or `:name` match one segment, `*` matches one
    /// segment and a trailing `**` matches the rest of the path, including
    /// nothing at all.
    pub fn matches_path(&self, path: &str) -> bool {
        let pattern_parts: Vec<&str> = self.path_pattern.trim_end_matches('/').split('/').collect();
        let path_parts: Vec<&str> = path.trim_end_matches('/').split('/').collect();

        for (i, pattern_part) in pattern_parts.iter().enumerate() {
            if *pattern_part == "**" {
                return true;
            }

            let Some(path_part) = path_parts.get(i) else {
                return false;
            };

            let is_param = *pattern_part == "*"
                || pattern_part.starts_with(':')
                || (pattern_part.starts_with('{') && pattern_part.ends_with('}'));

            if is_param {
                if path_part.is_empty() {
                    return false;
                }
                continue;
            }

            if pattern_part != path_part {
                return false;
            }
        }

        pattern_parts.len() == path_parts.len()
    }

    fn matches_method(&self, method: &str) -> bool {
        self.method == "*" || self.method.eq_ignore_ascii_case(method)
    }
}

pub struct RbacManager {
    config: RbacConfig,
    route_permissions: Vec<RoutePermission>,
}

impl RbacManager {
    pub fn new(config: RbacConfig, route_permissions: Vec<RoutePermission>) -> Self {
        Self {
            config,
            route_permissions,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RbacConfig::default(), build_default_route_permissions())
    }

    pub fn routes(&self) -> &[RoutePermission] {
        &self.route_permissions
    }

    /// First matching rule wins.
    pub fn check_route_access(
        &self,
        path: &str,
        method: &str,
        user: &AuthenticatedUser,
    ) -> AccessDecisionResult {
        let Some(route) = self
            .route_permissions
            .iter()
            .find(|r| r.matches_method(method) && r.matches_path(path))
        else {
            if !path.starts_with("/api/") {
                return AccessDecisionResult::allow("Not an API route");
            }
            return if self.config.default_deny && !user.is_superuser {
                AccessDecisionResult::deny("No matching route permission found")
            } else {
                AccessDecisionResult::allow("Default allow - no matching rule")
            };
        };

        let rule = format!("{} {}", route.method, route.path_pattern);

        if route.allow_anonymous {
            return AccessDecisionResult::allow("Anonymous access allowed").with_rule(rule);
        }

        if !user.is_authenticated() {
            return AccessDecisionResult::deny("Authentication required").with_rule(rule);
        }

        if !route.required_permission.is_empty() && !user.has_permission(&route.required_permission)
        {
            return AccessDecisionResult::deny(&format!(
                "Missing required permission {}",
                route.required_permission
            ))
            .with_rule(rule);
        }

        AccessDecisionResult::allow("Access granted").with_rule(rule)
    }

    pub fn config(&self) -> &RbacConfig {
        &self.config
    }
}

pub async fn rbac_middleware(
    State(rbac): State<Arc<RbacManager>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let method = request.method().to_string();

    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .unwrap_or_else(AuthenticatedUser::anonymous);

    let decision = rbac.check_route_access(&path, &method, &user);

    if rbac.config.audit_all_decisions {
        debug!(
            "RBAC decision for {} {} by user {}: {:?} - {}",
            method, path, user.user_id, decision.decision, decision.reason
        );
    }

    if !decision.is_allowed() {
        if !user.is_authenticated() {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({
                    "error": "unauthorized",
                    "message": "Authentication required"
                })),
            )
                .into_response();
        }

        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({
                "error": "forbidden",
                "message": decision.reason
            })),
        )
            .into_response();
    }

    next.run(request).await
}

fn codename(resource: Resource, action: Action) -> String {
    Permission::new(resource, action).codename()
}

/// Standard rules for a collection mounted at `base`: reads need `view`,
/// creating needs `add`, updates and state-changing actions on a record need
/// `change`, deletes need `delete`.
fn resource_routes(base: &str, resource: Resource) -> Vec<RoutePermission> {
    let nested = format!("{base}/**");
    vec![
        RoutePermission::new(&nested, "GET", &codename(resource, Action::View)),
        RoutePermission::new(base, "POST", &codename(resource, Action::Add)),
        RoutePermission::new(&nested, "POST", &codename(resource, Action::Change)),
        RoutePermission::new(&nested, "PUT", &codename(resource, Action::Change)),
        RoutePermission::new(&nested, "PATCH", &codename(resource, Action::Change)),
        RoutePermission::new(&nested, "DELETE", &codename(resource, Action::Delete)),
    ]
}

pub fn build_default_route_permissions() -> Vec<RoutePermission> {
    let mut routes = vec![
        RoutePermission::new("/health", "GET", "").with_anonymous(true),
        RoutePermission::new("/api/health", "GET", "").with_anonymous(true),
        RoutePermission::new("/api/auth/login", "POST", "").with_anonymous(true),
        RoutePermission::new("/api/auth/refresh", "POST", "").with_anonymous(true),
        RoutePermission::new("/api/auth/me", "GET", ""),
        RoutePermission::new("/api/auth/logout", "POST", ""),
        RoutePermission::new("/api/session/**", "*", ""),
        RoutePermission::new("/api/company/current", "GET", ""),
        RoutePermission::new(
            "/api/company/current",
            "PUT",
            &codename(Resource::Company, Action::Change),
        ),
        RoutePermission::new(
            "/api/company/current",
            "PATCH",
            &codename(Resource::Company, Action::Change),
        ),
        RoutePermission::new("/api/company/list", "GET", ""),
        RoutePermission::new("/api/company/switch", "POST", ""),
        RoutePermission::new("/api/dashboard/**", "GET", ""),
        RoutePermission::new("/api/admin/registry/**", "GET", ""),
        RoutePermission::new(
            "/api/admin/permissions",
            "GET",
            &codename(Resource::Roles, Action::View),
        ),
        RoutePermission::new(
            "/api/crm/pipeline/**",
            "GET",
            &codename(Resource::Deals, Action::View),
        ),
        RoutePermission::new(
            "/api/crm/pipeline/**",
            "*",
            &codename(Resource::Settings, Action::Change),
        ),
        // unassigning an account edits the territory, it deletes nothing
        RoutePermission::new(
            "/api/crm/territories/{id}/accounts/{account_id}",
            "DELETE",
            &codename(Resource::Territories, Action::Change),
        ),
        RoutePermission::new(
            "/api/sales/stats",
            "GET",
            &codename(Resource::Invoices, Action::View),
        ),
    ];

    for (base, resource) in [
        ("/api/crm/accounts", Resource::Accounts),
        ("/api/crm/contacts", Resource::Contacts),
        ("/api/crm/leads", Resource::Leads),
        ("/api/crm/deals", Resource::Deals),
        ("/api/crm/territories", Resource::Territories),
        ("/api/activities/activities", Resource::Activities),
        ("/api/activities/tasks", Resource::Activities),
        ("/api/activities/events", Resource::Activities),
        ("/api/products", Resource::Products),
        ("/api/sales/quotes", Resource::Quotes),
        ("/api/sales/orders", Resource::Orders),
        ("/api/sales/invoices", Resource::Invoices),
        ("/api/sales/payments", Resource::Payments),
        ("/api/admin/users", Resource::Users),
        ("/api/admin/roles", Resource::Roles),
        ("/api/admin/settings", Resource::Settings),
    ] {
        routes.extend(resource_routes(base, resource));
    }

    routes
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user_with(perms: &[&str]) -> AuthenticatedUser {
        AuthenticatedUser::new(Uuid::new_v4(), "tester".into())
            .with_permissions(perms.iter().copied())
            .with_organization(Uuid::new_v4())
    }

    fn decide(user: &AuthenticatedUser, method: &str, path: &str) -> bool {
        RbacManager::with_defaults()
            .check_route_access(path, method, user)
            .is_allowed()
    }

    #[test]
    fn test_route_permission_exact_match() {
        let route = RoutePermission::new("/api/admin/permissions", "GET", "roles.view");
        assert!(route.matches_path("/api/admin/permissions"));
        assert!(route.matches_path("/api/admin/permissions/"));
        assert!(!route.matches_path("/api/admin/permissions/extra"));
        assert!(!route.matches_path("/api/admin"));
    }

    #[test]
    fn test_route_permission_param_match() {
        let braces = RoutePermission::new("/api/crm/leads/{id}/convert", "POST", "");
        assert!(braces.matches_path("/api/crm/leads/123/convert"));
        assert!(!braces.matches_path("/api/crm/leads//convert"));
        assert!(!braces.matches_path("/api/crm/leads/123/close"));

        let colon = RoutePermission::new("/api/crm/deals/:id", "GET", "");
        assert!(colon.matches_path("/api/crm/deals/42"));
        assert!(!colon.matches_path("/api/crm/deals/42/detail"));
    }

    #[test]
    fn test_route_permission_wildcard_match() {
        let route = RoutePermission::new("/api/crm/accounts/**", "GET", "");
        assert!(route.matches_path("/api/crm/accounts"));
        assert!(route.matches_path("/api/crm/accounts/1/detail"));
        assert!(!route.matches_path("/api/crm/contacts"));

        let single = RoutePermission::new("/api/sales/*/stats", "GET", "");
        assert!(single.matches_path("/api/sales/x/stats"));
        assert!(!single.matches_path("/api/sales/x/y/stats"));
    }

    #[test]
    fn test_collection_actions_map_to_codenames() {
        let rep = user_with(&["leads.view", "leads.add"]);
        assert!(decide(&rep, "GET", "/api/crm/leads"));
        assert!(decide(&rep, "GET", "/api/crm/leads/1/detail"));
        assert!(decide(&rep, "POST", "/api/crm/leads"));
        assert!(!decide(&rep, "POST", "/api/crm/leads/1/convert"));
        assert!(!decide(&rep, "PUT", "/api/crm/leads/1"));
        assert!(!decide(&rep, "DELETE", "/api/crm/leads/1"));

        let editor = user_with(&["leads.change"]);
        assert!(decide(&editor, "POST", "/api/crm/leads/1/convert"));
        assert!(decide(&editor, "PATCH", "/api/crm/leads/1"));
    }

    #[test]
    fn test_activity_collections_share_resource() {
        let user = user_with(&["activities.add"]);
        assert!(decide(&user, "POST", "/api/activities/tasks"));
        assert!(decide(&user, "POST", "/api/activities/events"));
        assert!(!decide(&user, "GET", "/api/activities/tasks"));
    }

    #[test]
    fn test_special_rules() {
        let user = user_with(&["territories.change", "deals.view"]);
        assert!(decide(
            &user,
            "DELETE",
            "/api/crm/territories/1/accounts/2"
        ));
        assert!(!decide(&user, "DELETE", "/api/crm/territories/1"));
        assert!(decide(&user, "GET", "/api/crm/pipeline/stages"));
        assert!(!decide(&user, "POST", "/api/crm/pipeline/stages"));
        assert!(decide(&user, "GET", "/api/session/state"));
        assert!(decide(&user, "PUT", "/api/session/ui-flags"));
        assert!(decide(&user, "GET", "/api/company/current"));
        assert!(!decide(&user, "PUT", "/api/company/current"));
        assert!(!decide(&user, "GET", "/api/sales/stats"));
    }

    #[test]
    fn test_anonymous_routes() {
        let anon = AuthenticatedUser::anonymous();
        assert!(decide(&anon, "POST", "/api/auth/login"));
        assert!(decide(&anon, "GET", "/health"));
        assert!(!decide(&anon, "GET", "/api/auth/me"));
        assert!(!decide(&anon, "GET", "/api/crm/accounts"));
    }

    #[test]
    fn test_default_deny_for_unknown_api_routes() {
        let user = user_with(&["accounts.view"]);
        assert!(!decide(&user, "GET", "/api/unknown"));
        assert!(decide(&user, "GET", "/favicon.ico"));

        let root = AuthenticatedUser::new(Uuid::new_v4(), "root".into()).with_superuser(true);
        assert!(decide(&root, "GET", "/api/unknown"));
        assert!(decide(&root, "DELETE", "/api/admin/roles/1"));
    }

    #[test]
    fn test_access_decision_result() {
        let allow = AccessDecisionResult::allow("ok").with_rule("GET /x".into());
        assert!(allow.is_allowed());
        assert_eq!(allow.matched_rule.as_deref(), Some("GET /x"));
        assert!(!AccessDecisionResult::deny("no").is_allowed());
    }
}
