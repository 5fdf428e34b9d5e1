use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::error::AuthError;
use crate::core::shared::error::ApiError;
use crate::security::jwt::Claims;

/// Role name carried in tokens of users flagged `is_superuser`.
pub const SUPERUSER_ROLE: &str = "superuser";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Accounts,
    Contacts,
    Leads,
    Deals,
    Territories,
    Activities,
    Products,
    Quotes,
    Orders,
    Invoices,
    Payments,
    Users,
    Roles,
    Settings,
    Company,
}

impl Resource {
    pub const ALL: [Resource; 15] = [
        Self::Accounts,
        Self::Contacts,
        Self::Leads,
        Self::Deals,
        Self::Territories,
        Self::Activities,
        Self::Products,
        Self::Quotes,
        Self::Orders,
        Self::Invoices,
        Self::Payments,
        Self::Users,
        Self::Roles,
        Self::Settings,
        Self::Company,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accounts => "accounts",
            Self::Contacts => "contacts",
            Self::Leads => "leads",
            Self::Deals => "deals",
            Self::Territories => "territories",
            Self::Activities => "activities",
            Self::Products => "products",
            Self::Quotes => "quotes",
            Self::Orders => "orders",
            Self::Invoices => "invoices",
            Self::Payments => "payments",
            Self::Users => "users",
            Self::Roles => "roles",
            Self::Settings => "settings",
            Self::Company => "company",
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::Accounts | Self::Contacts | Self::Leads | Self::Deals | Self::Territories => {
                "crm"
            }
            Self::Activities => "activities",
            Self::Products => "products",
            Self::Quotes | Self::Orders | Self::Invoices | Self::Payments => "sales",
            Self::Users | Self::Roles | Self::Settings | Self::Company => "admin",
        }
    }

    pub fn is_business(&self) -> bool {
        self.category() != "admin"
    }
}

impl std::str::FromStr for Resource {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or(AuthError::InsufficientPermissions)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Add,
    Change,
    Delete,
}

impl Action {
    pub const ALL: [Action; 4] = [Self::View, Self::Add, Self::Change, Self::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Add => "add",
            Self::Change => "change",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub resource: Resource,
    pub action: Action,
}

impl Permission {
    pub const fn new(resource: Resource, action: Action) -> Self {
        Self { resource, action }
    }

    /// `resource.action`, e.g. `accounts.view`.
    pub fn codename(&self) -> String {
        format!("{}.{}", self.resource.as_str(), self.action.as_str())
    }

    pub fn display_name(&self) -> String {
        let action = match self.action {
            Action::View => "View",
            Action::Add => "Add",
            Action::Change => "Change",
            Action::Delete => "Delete",
        };
        format!("{action} {}", self.resource.as_str())
    }

    /// Every permission the server knows about.
    pub fn catalog() -> Vec<Permission> {
        Resource::ALL
            .iter()
            .flat_map(|r| Action::ALL.iter().map(|a| Permission::new(*r, *a)))
            .collect()
    }
}

impl std::str::FromStr for Permission {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, action) = s.split_once('.').ok_or(AuthError::InsufficientPermissions)?;
        let action = Action::ALL
            .into_iter()
            .find(|a| a.as_str() == action)
            .ok_or(AuthError::InsufficientPermissions)?;
        Ok(Self::new(resource.parse()?, action))
    }
}

/// Roles seeded at bootstrap. Custom roles live only in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    SalesManager,
    SalesRep,
    Viewer,
}

impl Role {
    pub const ALL: [Role; 4] = [Self::Admin, Self::SalesManager, Self::SalesRep, Self::Viewer];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::SalesManager => "sales_manager",
            Self::SalesRep => "sales_rep",
            Self::Viewer => "viewer",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Admin => "Administrator",
            Self::SalesManager => "Sales Manager",
            Self::SalesRep => "Sales Representative",
            Self::Viewer => "Viewer",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Admin => "Full access to every module and to administration",
            Self::SalesManager => "Manages all CRM and sales records, reads administration",
            Self::SalesRep => "Works leads, deals, activities and sales documents",
            Self::Viewer => "Read-only access to business records",
        }
    }

    pub fn permissions(&self) -> Vec<Permission> {
        match self {
            Self::Admin => Permission::catalog(),
            Self::SalesManager => Permission::catalog()
                .into_iter()
                .filter(|p| p.resource.is_business() || p.action == Action::View)
                .collect(),
            Self::SalesRep => {
                const WORKED: [Resource; 7] = [
                    Resource::Accounts,
                    Resource::Contacts,
                    Resource::Leads,
                    Resource::Deals,
                    Resource::Activities,
                    Resource::Quotes,
                    Resource::Orders,
                ];
                Permission::catalog()
                    .into_iter()
                    .filter(|p| p.resource.is_business())
                    .filter(|p| match p.action {
                        Action::View => true,
                        Action::Add | Action::Change => WORKED.contains(&p.resource),
                        Action::Delete => p.resource == Resource::Activities,
                    })
                    .collect()
            }
            Self::Viewer => Permission::catalog()
                .into_iter()
                .filter(|p| p.resource.is_business() && p.action == Action::View)
                .collect(),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.name() == s.to_lowercase())
            .ok_or(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub permissions: HashSet<String>,
    pub organization_id: Option<Uuid>,
    pub is_superuser: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
}

impl Default for AuthenticatedUser {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl AuthenticatedUser {
    pub fn new(user_id: Uuid, username: String) -> Self {
        Self {
            user_id,
            username,
            email: None,
            roles: Vec::new(),
            permissions: HashSet::new(),
            organization_id: None,
            is_superuser: false,
            token_id: None,
        }
    }

    pub fn anonymous() -> Self {
        Self::new(Uuid::nil(), "anonymous".to_string())
    }

    pub fn from_claims(claims: &Claims) -> Result<Self, AuthError> {
        let user_id = claims.user_id().map_err(|_| AuthError::InvalidToken)?;
        let organization_id = claims
            .organization_id()
            .map_err(|_| AuthError::InvalidToken)?;
        let roles = claims.roles.clone().unwrap_or_default();
        let is_superuser = roles.iter().any(|r| r == SUPERUSER_ROLE);

        Ok(Self {
            user_id,
            username: claims.username.clone().unwrap_or_default(),
            email: claims.email.clone(),
            permissions: claims
                .permissions
                .clone()
                .unwrap_or_default()
                .into_iter()
                .collect(),
            roles,
            organization_id,
            is_superuser,
            token_id: Some(claims.jti.clone()),
        })
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        let role = role.into();
        if !self.roles.contains(&role) {
            self.roles.push(role);
        }
        self
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions.extend(permissions.into_iter().map(Into::into));
        self
    }

    pub fn with_organization(mut self, org_id: Uuid) -> Self {
        self.organization_id = Some(org_id);
        self
    }

    pub fn with_superuser(mut self, is_superuser: bool) -> Self {
        self.is_superuser = is_superuser;
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id != Uuid::nil()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Superusers hold every permission implicitly.
    pub fn has_permission(&self, codename: &str) -> bool {
        self.is_superuser || self.permissions.contains(codename)
    }

    pub fn can(&self, resource: Resource, action: Action) -> bool {
        self.has_permission(&Permission::new(resource, action).codename())
    }

    pub fn require(&self, resource: Resource, action: Action) -> Result<(), ApiError> {
        if self.can(resource, action) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!(
                "Missing permission {}",
                Permission::new(resource, action).codename()
            )))
        }
    }

    pub fn can_access_organization(&self, org_id: &Uuid) -> bool {
        self.is_superuser || self.organization_id.as_ref() == Some(org_id)
    }

    /// The company every query of this request is scoped to.
    pub fn org_id(&self) -> Result<Uuid, ApiError> {
        self.organization_id
            .ok_or_else(|| ApiError::Forbidden("No company selected for this session".into()))
    }

    pub fn sorted_permissions(&self) -> Vec<String> {
        let mut permissions: Vec<String> = self.permissions.iter().cloned().collect();
        permissions.sort();
        permissions
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .filter(|user| user.is_authenticated())
            .cloned()
            .ok_or(AuthError::MissingToken)
    }
}
