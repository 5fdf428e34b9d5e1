use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::shared::detail::{self, DetailView, EditForm, Editable, TabSpec};
use crate::core::shared::error::ApiError;
use crate::core::shared::listing::{self, ListParams, ListResponse, Listable};
use crate::core::shared::models::{
    NewRbacRole, NewRbacRolePermission, RbacPermission, RbacRole,
};
use crate::core::shared::schema::{
    rbac_permissions, rbac_role_permissions, rbac_roles, rbac_user_roles,
};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{non_blank, run_blocking};
use crate::security::auth_api::AuthenticatedUser;
use crate::security::validation::{validate_codename, ValidationError, Validator};

impl Listable for RbacRole {
    const SEARCH_FIELDS: &'static [&'static str] = &["name", "display_name", "description"];
    const SORT_FIELDS: &'static [&'static str] =
        &["name", "display_name", "is_system", "is_active", "created_at"];
}

impl Editable for RbacRole {
    const ENTITY: &'static str = "Role";
    const TABS: &'static [TabSpec] = &[
        TabSpec {
            name: "Role",
            fields: &["name", "display_name", "description"],
        },
        TabSpec {
            name: "Status",
            fields: &["is_system", "is_active"],
        },
        TabSpec {
            name: "System",
            fields: &["id", "created_at", "updated_at"],
        },
    ];
    const EDITABLE_FIELDS: &'static [&'static str] = &["display_name", "description", "is_active"];
    const REQUIRED_FIELDS: &'static [&'static str] = &["display_name"];

    fn record_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetPermissionsRequest {
    pub permissions: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RoleFilters {
    pub is_system: Option<bool>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PermissionFilters {
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RoleResponse {
    #[serde(flatten)]
    pub role: RbacRole,
    pub permissions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PermissionGroup {
    pub category: String,
    pub permissions: Vec<RbacPermission>,
}

pub fn configure_rbac_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/admin/roles", get(list_roles).post(create_role))
        .route(
            "/api/admin/roles/{id}",
            get(get_role)
                .put(update_role)
                .patch(update_role)
                .delete(delete_role),
        )
        .route("/api/admin/roles/{id}/detail", get(get_role_detail))
        .route("/api/admin/roles/{id}/form", get(get_role_form))
        .route(
            "/api/admin/roles/{id}/permissions",
            get(get_role_permissions).put(set_role_permissions),
        )
        .route("/api/admin/permissions", get(list_permissions))
}

/// `Sales Lead` and `sales-lead` both become `sales_lead`.
pub fn normalize_role_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

fn validate_role_name(name: &str) -> Option<ValidationError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    (!valid).then(|| ValidationError::InvalidFormat {
        field: "name".to_string(),
        expected: "lowercase letters, digits and underscores".to_string(),
    })
}

/// Groups permissions by category, keeping the incoming order inside a group.
pub fn group_permissions(permissions: Vec<RbacPermission>) -> Vec<PermissionGroup> {
    let mut groups: Vec<PermissionGroup> = Vec::new();
    for permission in permissions {
        match groups
            .iter_mut()
            .find(|g| g.category == permission.category)
        {
            Some(group) => group.permissions.push(permission),
            None => groups.push(PermissionGroup {
                category: permission.category.clone(),
                permissions: vec![permission],
            }),
        }
    }
    groups
}

fn load_role(conn: &mut PgConnection, id: Uuid) -> Result<RbacRole, ApiError> {
    rbac_roles::table
        .find(id)
        .select(RbacRole::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Role"))
}

fn ensure_mutable(role: &RbacRole) -> Result<(), ApiError> {
    if role.is_system {
        Err(ApiError::Conflict(format!(
            "System role '{}' cannot be modified",
            role.name
        )))
    } else {
        Ok(())
    }
}

fn role_permission_names(conn: &mut PgConnection, role_id: Uuid) -> QueryResult<Vec<String>> {
    rbac_role_permissions::table
        .inner_join(
            rbac_permissions::table
                .on(rbac_permissions::id.eq(rbac_role_permissions::permission_id)),
        )
        .filter(rbac_role_permissions::role_id.eq(role_id))
        .select(rbac_permissions::name)
        .order(rbac_permissions::name.asc())
        .load(conn)
}

/// Replaces the permissions of `role_id` with the given codenames.
fn replace_permissions(
    conn: &mut PgConnection,
    role_id: Uuid,
    codenames: &[String],
) -> Result<Vec<String>, ApiError> {
    let mut check = Validator::new();
    for codename in codenames {
        check = check.custom(|| validate_codename(codename).err());
    }
    check.validate()?;

    let found: Vec<RbacPermission> = rbac_permissions::table
        .filter(rbac_permissions::name.eq_any(codenames))
        .select(RbacPermission::as_select())
        .load(conn)?;
    let unknown: Vec<&str> = codenames
        .iter()
        .filter(|c| !found.iter().any(|p| &p.name == *c))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        return Err(ApiError::validation(format!(
            "Unknown permissions: {}",
            unknown.join(", ")
        )));
    }

    diesel::delete(
        rbac_role_permissions::table.filter(rbac_role_permissions::role_id.eq(role_id)),
    )
    .execute(conn)?;

    let now = Utc::now();
    let grants: Vec<NewRbacRolePermission> = found
        .iter()
        .map(|p| NewRbacRolePermission {
            id: Uuid::new_v4(),
            role_id,
            permission_id: p.id,
            granted_at: now,
        })
        .collect();
    if !grants.is_empty() {
        diesel::insert_into(rbac_role_permissions::table)
            .values(&grants)
            .execute(conn)?;
    }

    Ok(role_permission_names(conn, role_id)?)
}

pub async fn list_roles(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
    Query(filters): Query<RoleFilters>,
) -> Result<Json<ListResponse<RbacRole>>, ApiError> {
    let rows = run_blocking(&state.conn, move |conn| {
        let mut query = rbac_roles::table
            .select(RbacRole::as_select())
            .order(rbac_roles::created_at.asc())
            .into_boxed();
        if let Some(system) = filters.is_system {
            query = query.filter(rbac_roles::is_system.eq(system));
        }
        if let Some(active) = filters.is_active {
            query = query.filter(rbac_roles::is_active.eq(active));
        }
        Ok(query.load::<RbacRole>(conn)?)
    })
    .await?;
    Ok(Json(listing::apply(rows, &params)?))
}

pub async fn create_role(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateRoleRequest>,
) -> Result<(StatusCode, Json<RoleResponse>), ApiError> {
    let name = normalize_role_name(&req.name);
    let display_name = req.display_name.trim().to_string();
    Validator::new()
        .custom(|| validate_role_name(&name))
        .length(&display_name, "display_name", Some(1), Some(255))
        .validate()?;

    let created = run_blocking(&state.conn, move |conn| {
        conn.transaction::<_, ApiError, _>(|conn| {
            let now = Utc::now();
            let role: RbacRole = diesel::insert_into(rbac_roles::table)
                .values(&NewRbacRole {
                    id: Uuid::new_v4(),
                    name,
                    display_name,
                    description: non_blank(req.description),
                    is_system: false,
                    is_active: true,
                    created_at: now,
                    updated_at: now,
                })
                .returning(RbacRole::as_returning())
                .get_result(conn)?;
            let permissions = replace_permissions(conn, role.id, &req.permissions)?;
            Ok(RoleResponse { role, permissions })
        })
    })
    .await?;

    info!(
        "Created role: {} ({}) by {}",
        created.role.display_name, created.role.id, user.username
    );
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_role(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RoleResponse>, ApiError> {
    let response = run_blocking(&state.conn, move |conn| {
        let role = load_role(conn, id)?;
        let permissions = role_permission_names(conn, id)?;
        Ok(RoleResponse { role, permissions })
    })
    .await?;
    Ok(Json(response))
}

pub async fn get_role_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DetailView>, ApiError> {
    let role = run_blocking(&state.conn, move |conn| load_role(conn, id)).await?;
    Ok(Json(DetailView::build(&role)?))
}

pub async fn get_role_form(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<EditForm>, ApiError> {
    let role = run_blocking(&state.conn, move |conn| load_role(conn, id)).await?;
    Ok(Json(EditForm::prepopulate(&role)?))
}

pub async fn update_role(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(input): Json<Map<String, Value>>,
) -> Result<Json<RbacRole>, ApiError> {
    let saved = run_blocking(&state.conn, move |conn| {
        let current = load_role(conn, id)?;
        ensure_mutable(&current)?;
        let (updated, changes) = detail::submit(&current, input)?;
        if changes.is_empty() {
            return Ok(current);
        }
        Ok(diesel::update(rbac_roles::table.find(id))
            .set((
                rbac_roles::display_name.eq(updated.display_name.trim()),
                rbac_roles::description.eq(non_blank(updated.description)),
                rbac_roles::is_active.eq(updated.is_active),
                rbac_roles::updated_at.eq(Utc::now()),
            ))
            .returning(RbacRole::as_returning())
            .get_result(conn)?)
    })
    .await?;
    info!("Role {} updated by {}", saved.name, user.username);
    Ok(Json(saved))
}

/// Removes a custom role together with its grants.
pub async fn delete_role(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let name = run_blocking(&state.conn, move |conn| {
        let role = load_role(conn, id)?;
        ensure_mutable(&role)?;
        conn.transaction::<_, ApiError, _>(|conn| {
            diesel::delete(rbac_user_roles::table.filter(rbac_user_roles::role_id.eq(id)))
                .execute(conn)?;
            diesel::delete(rbac_roles::table.find(id)).execute(conn)?;
            Ok(())
        })?;
        Ok(role.name)
    })
    .await?;
    info!("Role {name} deleted by {}", user.username);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_role_permissions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<String>>, ApiError> {
    let names = run_blocking(&state.conn, move |conn| {
        load_role(conn, id)?;
        Ok(role_permission_names(conn, id)?)
    })
    .await?;
    Ok(Json(names))
}

pub async fn set_role_permissions(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<SetPermissionsRequest>,
) -> Result<Json<Vec<String>>, ApiError> {
    let names = run_blocking(&state.conn, move |conn| {
        let role = load_role(conn, id)?;
        ensure_mutable(&role)?;
        conn.transaction(|conn| replace_permissions(conn, id, &req.permissions))
    })
    .await?;
    info!(
        "Role {id} now grants {} permissions (set by {})",
        names.len(),
        user.username
    );
    Ok(Json(names))
}

pub async fn list_permissions(
    State(state): State<Arc<AppState>>,
    Query(filters): Query<PermissionFilters>,
) -> Result<Json<Vec<PermissionGroup>>, ApiError> {
    let rows = run_blocking(&state.conn, move |conn| {
        let mut query = rbac_permissions::table
            .select(RbacPermission::as_select())
            .order((
                rbac_permissions::category.asc(),
                rbac_permissions::resource_type.asc(),
                rbac_permissions::name.asc(),
            ))
            .into_boxed();
        if let Some(category) = filters.category {
            query = query.filter(rbac_permissions::category.eq(category));
        }
        Ok(query.load::<RbacPermission>(conn)?)
    })
    .await?;
    Ok(Json(group_permissions(rows)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permission(name: &str, category: &str) -> RbacPermission {
        let (resource, action) = name.split_once('.').unwrap_or((name, "view"));
        RbacPermission {
            id: Uuid::new_v4(),
            name: name.into(),
            display_name: name.into(),
            resource_type: resource.into(),
            action: action.into(),
            category: category.into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_normalize_role_name() {
        assert_eq!(normalize_role_name(" Regional Manager "), "regional_manager");
        assert_eq!(normalize_role_name("key-account"), "key_account");
    }

    #[test]
    fn test_validate_role_name() {
        assert!(validate_role_name("sales_rep").is_none());
        assert!(validate_role_name("").is_some());
        assert!(validate_role_name("ops!").is_some());
    }

    #[test]
    fn test_group_permissions_by_category() {
        let groups = group_permissions(vec![
            permission("accounts.view", "crm"),
            permission("accounts.add", "crm"),
            permission("invoices.view", "sales"),
            permission("contacts.view", "crm"),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].category, "crm");
        assert_eq!(groups[0].permissions.len(), 3);
        assert_eq!(groups[1].permissions[0].name, "invoices.view");
    }

    #[test]
    fn test_system_roles_are_immutable() {
        let now = Utc::now();
        let mut role = RbacRole {
            id: Uuid::new_v4(),
            name: "admin".into(),
            display_name: "Administrator".into(),
            description: None,
            is_system: true,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        assert!(matches!(ensure_mutable(&role), Err(ApiError::Conflict(_))));
        role.is_system = false;
        assert!(ensure_mutable(&role).is_ok());
    }
}
