use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
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
    NewOrganizationMember, NewRbacUserRole, NewUser, RbacRole, User,
};
use crate::core::shared::schema::{organization_members, rbac_roles, rbac_user_roles, users};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{non_blank, run_blocking};
use crate::directory::identity::{is_member, org_user_ids};
use crate::security::auth_api::AuthenticatedUser;
use crate::security::password::{generate_password, hash_password, password_policy_errors};
use crate::security::validation::Validator;

impl Listable for User {
    const SEARCH_FIELDS: &'static [&'static str] =
        &["username", "email", "first_name", "last_name", "job_title"];
    const SORT_FIELDS: &'static [&'static str] = &[
        "username",
        "email",
        "first_name",
        "last_name",
        "is_active",
        "last_login_at",
        "created_at",
    ];
}

impl Editable for User {
    const ENTITY: &'static str = "User";
    const TABS: &'static [TabSpec] = &[
        TabSpec {
            name: "Profile",
            fields: &["username", "email", "first_name", "last_name", "phone", "job_title"],
        },
        TabSpec {
            name: "Access",
            fields: &["is_active", "is_superuser", "last_login_at"],
        },
        TabSpec {
            name: "System",
            fields: &["id", "org_id", "created_at", "updated_at"],
        },
    ];
    const EDITABLE_FIELDS: &'static [&'static str] =
        &["email", "first_name", "last_name", "phone", "job_title", "is_active"];
    const REQUIRED_FIELDS: &'static [&'static str] = &["email"];

    fn record_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub job_title: Option<String>,
    pub is_superuser: Option<bool>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserFilters {
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    #[serde(flatten)]
    pub user: User,
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    /// Present only when the server generated the initial password.
    pub generated_password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SetPasswordRequest {
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SetPasswordResponse {
    pub success: bool,
    pub generated_password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetRolesRequest {
    pub roles: Vec<String>,
}

pub fn configure_user_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/admin/users", get(list_users).post(create_user))
        .route(
            "/api/admin/users/{id}",
            get(get_user)
                .put(update_user)
                .patch(update_user)
                .delete(deactivate_user),
        )
        .route("/api/admin/users/{id}/detail", get(get_user_detail))
        .route("/api/admin/users/{id}/form", get(get_user_form))
        .route(
            "/api/admin/users/{id}/password",
            axum::routing::post(set_password),
        )
        .route(
            "/api/admin/users/{id}/roles",
            get(get_user_roles).put(set_user_roles),
        )
}

pub(crate) fn load_org_user(
    conn: &mut PgConnection,
    org_id: Uuid,
    id: Uuid,
) -> Result<User, ApiError> {
    let user: User = users::table
        .find(id)
        .select(User::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("User"))?;
    if !is_member(conn, &user, org_id)? {
        return Err(ApiError::not_found("User"));
    }
    Ok(user)
}

fn user_roles(conn: &mut PgConnection, user_id: Uuid) -> QueryResult<Vec<RbacRole>> {
    rbac_user_roles::table
        .inner_join(rbac_roles::table.on(rbac_roles::id.eq(rbac_user_roles::role_id)))
        .filter(rbac_user_roles::user_id.eq(user_id))
        .select(RbacRole::as_select())
        .order(rbac_roles::name.asc())
        .load(conn)
}

/// Replaces the roles of `user_id` with the named roles.
fn replace_roles(
    conn: &mut PgConnection,
    user_id: Uuid,
    names: &[String],
    granted_by: Uuid,
) -> Result<Vec<String>, ApiError> {
    let roles: Vec<RbacRole> = rbac_roles::table
        .filter(rbac_roles::name.eq_any(names))
        .filter(rbac_roles::is_active.eq(true))
        .select(RbacRole::as_select())
        .load(conn)?;

    let unknown: Vec<&str> = names
        .iter()
        .filter(|name| !roles.iter().any(|r| &r.name == *name))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        return Err(ApiError::validation(format!(
            "Unknown roles: {}",
            unknown.join(", ")
        )));
    }

    diesel::delete(rbac_user_roles::table.filter(rbac_user_roles::user_id.eq(user_id)))
        .execute(conn)?;

    let now = Utc::now();
    let grants: Vec<NewRbacUserRole> = roles
        .iter()
        .map(|role| NewRbacUserRole {
            id: Uuid::new_v4(),
            user_id,
            role_id: role.id,
            granted_by: Some(granted_by),
            granted_at: now,
        })
        .collect();
    if !grants.is_empty() {
        diesel::insert_into(rbac_user_roles::table)
            .values(&grants)
            .execute(conn)?;
    }

    let mut granted: Vec<String> = roles.into_iter().map(|r| r.name).collect();
    granted.sort();
    Ok(granted)
}

fn check_password(password: &str, username: &str) -> Result<(), ApiError> {
    let issues = password_policy_errors(password, Some(username));
    if issues.is_empty() {
        Ok(())
    } else {
        Err(ApiError::validation(issues.join("; ")))
    }
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(params): Query<ListParams>,
    Query(filters): Query<UserFilters>,
) -> Result<Json<ListResponse<User>>, ApiError> {
    let org_id = user.org_id()?;
    let rows = run_blocking(&state.conn, move |conn| {
        let ids = org_user_ids(conn, org_id)?;
        let mut query = users::table
            .filter(users::id.eq_any(ids))
            .select(User::as_select())
            .order(users::created_at.asc())
            .into_boxed();
        if let Some(active) = filters.is_active {
            query = query.filter(users::is_active.eq(active));
        }
        if let Some(superuser) = filters.is_superuser {
            query = query.filter(users::is_superuser.eq(superuser));
        }
        Ok(query.load::<User>(conn)?)
    })
    .await?;

    Ok(Json(listing::apply(rows, &params)?))
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<CreateUserResponse>), ApiError> {
    let org_id = user.org_id()?;
    let username = req.username.trim().to_string();
    let email = req.email.trim().to_lowercase();

    Validator::new()
        .username(&username)
        .email(&email)
        .phone_opt(req.phone.as_deref())
        .validate()?;

    let wants_superuser = req.is_superuser.unwrap_or(false);
    if wants_superuser && !user.is_superuser {
        return Err(ApiError::Forbidden(
            "Only a superuser can create another superuser".into(),
        ));
    }

    let generated = req.password.is_none().then(generate_password);
    let password = req
        .password
        .clone()
        .or_else(|| generated.clone())
        .unwrap_or_default();
    check_password(&password, &username)?;

    let granted_by = user.user_id;
    let created = run_blocking(&state.conn, move |conn| {
        let password_hash = hash_password(&password)
            .map_err(|e| ApiError::Internal(format!("Password hashing failed: {e}")))?;
        conn.transaction::<_, ApiError, _>(|conn| {
            let now = Utc::now();
            let new_user = NewUser {
                id: Uuid::new_v4(),
                org_id,
                username,
                email,
                password_hash,
                first_name: non_blank(req.first_name),
                last_name: non_blank(req.last_name),
                phone: non_blank(req.phone),
                job_title: non_blank(req.job_title),
                is_active: true,
                is_superuser: wants_superuser,
                created_at: now,
                updated_at: now,
            };
            let created: User = diesel::insert_into(users::table)
                .values(&new_user)
                .returning(User::as_returning())
                .get_result(conn)?;

            diesel::insert_into(organization_members::table)
                .values(&NewOrganizationMember {
                    id: Uuid::new_v4(),
                    org_id,
                    user_id: created.id,
                    created_at: now,
                })
                .execute(conn)?;

            let roles = replace_roles(conn, created.id, &req.roles, granted_by)?;
            Ok(UserResponse {
                user: created,
                roles,
            })
        })
    })
    .await?;

    info!(
        "User {} created in company {org_id} by {}",
        created.user.username, user.username
    );
    Ok((
        StatusCode::CREATED,
        Json(CreateUserResponse {
            user: created,
            generated_password: generated,
        }),
    ))
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<UserResponse>, ApiError> {
    let org_id = user.org_id()?;
    let response = run_blocking(&state.conn, move |conn| {
        let found = load_org_user(conn, org_id, id)?;
        let roles = user_roles(conn, id)?.into_iter().map(|r| r.name).collect();
        Ok(UserResponse { user: found, roles })
    })
    .await?;
    Ok(Json(response))
}

pub async fn get_user_detail(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DetailView>, ApiError> {
    let org_id = user.org_id()?;
    let found = run_blocking(&state.conn, move |conn| load_org_user(conn, org_id, id)).await?;
    Ok(Json(DetailView::build(&found)?))
}

pub async fn get_user_form(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<EditForm>, ApiError> {
    let org_id = user.org_id()?;
    let found = run_blocking(&state.conn, move |conn| load_org_user(conn, org_id, id)).await?;
    Ok(Json(EditForm::prepopulate(&found)?))
}

pub async fn update_user(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(input): Json<Map<String, Value>>,
) -> Result<Json<User>, ApiError> {
    let org_id = user.org_id()?;
    let acting = user.user_id;
    let updated = run_blocking(&state.conn, move |conn| {
        let current = load_org_user(conn, org_id, id)?;
        let (mut updated, changes) = detail::submit(&current, input)?;
        if changes.is_empty() {
            return Ok(current);
        }

        updated.email = updated.email.trim().to_lowercase();
        Validator::new()
            .email(&updated.email)
            .phone_opt(updated.phone.as_deref())
            .validate()?;
        if id == acting && !updated.is_active {
            return Err(ApiError::validation("You cannot deactivate your own account"));
        }

        let saved: User = diesel::update(users::table.find(id))
            .set((
                users::email.eq(&updated.email),
                users::first_name.eq(non_blank(updated.first_name.clone())),
                users::last_name.eq(non_blank(updated.last_name.clone())),
                users::phone.eq(non_blank(updated.phone.clone())),
                users::job_title.eq(non_blank(updated.job_title.clone())),
                users::is_active.eq(updated.is_active),
                users::updated_at.eq(Utc::now()),
            ))
            .returning(User::as_returning())
            .get_result(conn)?;
        info!(
            "User {} updated fields: {}",
            saved.username,
            changes.keys().cloned().collect::<Vec<_>>().join(", ")
        );
        Ok(saved)
    })
    .await?;
    Ok(Json(updated))
}

/// Users are never removed, only deactivated.
pub async fn deactivate_user(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let org_id = user.org_id()?;
    if id == user.user_id {
        return Err(ApiError::validation("You cannot deactivate your own account"));
    }
    run_blocking(&state.conn, move |conn| {
        load_org_user(conn, org_id, id)?;
        diesel::update(users::table.find(id))
            .set((users::is_active.eq(false), users::updated_at.eq(Utc::now())))
            .execute(conn)?;
        Ok(())
    })
    .await?;
    info!("User {id} deactivated by {}", user.username);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_password(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    body: Option<Json<SetPasswordRequest>>,
) -> Result<Json<SetPasswordResponse>, ApiError> {
    let org_id = user.org_id()?;
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let generated = req.password.is_none().then(generate_password);
    let password = req
        .password
        .or_else(|| generated.clone())
        .unwrap_or_default();

    run_blocking(&state.conn, move |conn| {
        let target = load_org_user(conn, org_id, id)?;
        check_password(&password, &target.username)?;
        let password_hash = hash_password(&password)
            .map_err(|e| ApiError::Internal(format!("Password hashing failed: {e}")))?;
        diesel::update(users::table.find(id))
            .set((
                users::password_hash.eq(password_hash),
                users::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;
        Ok(())
    })
    .await?;

    info!("Password reset for user {id} by {}", user.username);
    Ok(Json(SetPasswordResponse {
        success: true,
        generated_password: generated,
    }))
}

pub async fn get_user_roles(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<RbacRole>>, ApiError> {
    let org_id = user.org_id()?;
    let roles = run_blocking(&state.conn, move |conn| {
        load_org_user(conn, org_id, id)?;
        Ok(user_roles(conn, id)?)
    })
    .await?;
    Ok(Json(roles))
}

pub async fn set_user_roles(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<SetRolesRequest>,
) -> Result<Json<Vec<String>>, ApiError> {
    let org_id = user.org_id()?;
    let granted_by = user.user_id;
    let roles = run_blocking(&state.conn, move |conn| {
        load_org_user(conn, org_id, id)?;
        conn.transaction(|conn| replace_roles(conn, id, &req.roles, granted_by))
    })
    .await?;
    info!(
        "Roles of user {id} set to [{}] by {}",
        roles.join(", "),
        user.username
    );
    Ok(Json(roles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_user() -> User {
        User {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            username: "jsmith".into(),
            email: "j.smith@example.com".into(),
            password_hash: "$argon2id$secret".into(),
            first_name: Some("Jane".into()),
            last_name: Some("Smith".into()),
            phone: None,
            job_title: Some("Account Executive".into()),
            is_active: true,
            is_superuser: false,
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_user_json_never_exposes_password_hash() {
        let value = serde_json::to_value(sample_user()).expect("json");
        assert!(value.get("password_hash").is_none());
        assert_eq!(value["username"], "jsmith");
    }

    #[test]
    fn test_user_form_fields() {
        let form = EditForm::prepopulate(&sample_user()).expect("form");
        assert_eq!(form.values.len(), User::EDITABLE_FIELDS.len());
        assert!(!form.values.contains_key("username"));
        assert!(!form.values.contains_key("is_superuser"));
    }

    #[test]
    fn test_username_is_read_only() {
        let input = match json!({"username": "root"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert!(detail::submit(&sample_user(), input).is_err());
    }

    #[test]
    fn test_user_search_matches_job_title() {
        let rows = listing::filter_records(vec![sample_user()], "executive");
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_check_password_reports_policy() {
        assert!(check_password("short", "jsmith").is_err());
        assert!(check_password("Sunflower42garden", "jsmith").is_ok());
    }
}
