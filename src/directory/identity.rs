//! Resolves who a user is inside a company: membership, roles and the
//! permission codenames that end up in their access token.

use diesel::prelude::*;
use uuid::Uuid;

use crate::core::shared::error::ApiError;
use crate::core::shared::models::{Organization, User};
use crate::core::shared::schema::{
    organization_members, organizations, rbac_permissions, rbac_role_permissions, rbac_roles,
    rbac_user_roles, users,
};
use crate::security::auth_api::{Permission, SUPERUSER_ROLE};
use crate::security::jwt::TokenSubject;

#[derive(Debug, Clone)]
pub struct Identity {
    pub user: User,
    pub organization_id: Uuid,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl Identity {
    pub fn token_subject(&self) -> TokenSubject {
        TokenSubject {
            user_id: self.user.id,
            username: self.user.username.clone(),
            email: Some(self.user.email.clone()),
            organization_id: Some(self.organization_id),
            roles: self.roles.clone(),
            permissions: self.permissions.clone(),
        }
    }
}

/// Names of the active roles granted to `user_id`.
pub fn load_roles(conn: &mut PgConnection, user_id: Uuid) -> QueryResult<Vec<String>> {
    rbac_user_roles::table
        .inner_join(rbac_roles::table.on(rbac_roles::id.eq(rbac_user_roles::role_id)))
        .filter(rbac_user_roles::user_id.eq(user_id))
        .filter(rbac_roles::is_active.eq(true))
        .select(rbac_roles::name)
        .order(rbac_roles::name.asc())
        .load(conn)
}

/// Distinct permission codenames reachable through the user's active roles.
pub fn load_permissions(conn: &mut PgConnection, user_id: Uuid) -> QueryResult<Vec<String>> {
    rbac_user_roles::table
        .inner_join(rbac_roles::table.on(rbac_roles::id.eq(rbac_user_roles::role_id)))
        .inner_join(
            rbac_role_permissions::table.on(rbac_role_permissions::role_id.eq(rbac_roles::id)),
        )
        .inner_join(
            rbac_permissions::table
                .on(rbac_permissions::id.eq(rbac_role_permissions::permission_id)),
        )
        .filter(rbac_user_roles::user_id.eq(user_id))
        .filter(rbac_roles::is_active.eq(true))
        .select(rbac_permissions::name)
        .distinct()
        .order(rbac_permissions::name.asc())
        .load(conn)
}

pub fn is_member(conn: &mut PgConnection, user: &User, org_id: Uuid) -> QueryResult<bool> {
    if user.org_id == org_id {
        return Ok(true);
    }
    diesel::select(diesel::dsl::exists(
        organization_members::table
            .filter(organization_members::org_id.eq(org_id))
            .filter(organization_members::user_id.eq(user.id)),
    ))
    .get_result(conn)
}

/// Active companies the user may switch to. Superusers see every company.
pub fn member_organizations(
    conn: &mut PgConnection,
    user: &User,
) -> QueryResult<Vec<Organization>> {
    let mut query = organizations::table
        .filter(organizations::is_active.eq(true))
        .select(Organization::as_select())
        .order(organizations::name.asc())
        .into_boxed();

    if !user.is_superuser {
        let member_orgs = organization_members::table
            .filter(organization_members::user_id.eq(user.id))
            .select(organization_members::org_id);
        query = query.filter(
            organizations::id
                .eq(user.org_id)
                .or(organizations::id.eq_any(member_orgs)),
        );
    }

    query.load(conn)
}

/// Ids of every user belonging to `org_id`, by home company or membership.
pub fn org_user_ids(conn: &mut PgConnection, org_id: Uuid) -> QueryResult<Vec<Uuid>> {
    let mut ids: Vec<Uuid> = users::table
        .filter(users::org_id.eq(org_id))
        .select(users::id)
        .load(conn)?;
    let members: Vec<Uuid> = organization_members::table
        .filter(organization_members::org_id.eq(org_id))
        .select(organization_members::user_id)
        .load(conn)?;
    for id in members {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Builds the identity of `user_id` inside `requested_org`, or inside the
/// user's home company when none is requested.
pub fn resolve_identity(
    conn: &mut PgConnection,
    user_id: Uuid,
    requested_org: Option<Uuid>,
) -> Result<Identity, ApiError> {
    let user: User = users::table
        .find(user_id)
        .select(User::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::Unauthorized("User no longer exists".into()))?;

    if !user.is_active {
        return Err(ApiError::Unauthorized("Account is disabled".into()));
    }

    let organization_id = requested_org.unwrap_or(user.org_id);
    if !user.is_superuser && !is_member(conn, &user, organization_id)? {
        return Err(ApiError::Forbidden(
            "You are not a member of this company".into(),
        ));
    }

    let active: bool = organizations::table
        .find(organization_id)
        .select(organizations::is_active)
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Company"))?;
    if !active {
        return Err(ApiError::Forbidden("Company is inactive".into()));
    }

    let mut roles = load_roles(conn, user.id)?;
    let permissions = if user.is_superuser {
        roles.push(SUPERUSER_ROLE.to_string());
        Permission::catalog().iter().map(Permission::codename).collect()
    } else {
        load_permissions(conn, user.id)?
    };

    Ok(Identity {
        user,
        organization_id,
        roles,
        permissions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            username: "mgarcia".into(),
            email: "m.garcia@example.com".into(),
            password_hash: String::new(),
            first_name: Some("Maria".into()),
            last_name: None,
            phone: None,
            job_title: None,
            is_active: true,
            is_superuser: false,
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_token_subject_carries_identity() {
        let user = user();
        let org = Uuid::new_v4();
        let identity = Identity {
            user: user.clone(),
            organization_id: org,
            roles: vec!["sales_rep".into()],
            permissions: vec!["leads.add".into(), "leads.view".into()],
        };
        let subject = identity.token_subject();
        assert_eq!(subject.user_id, user.id);
        assert_eq!(subject.username, "mgarcia");
        assert_eq!(subject.email.as_deref(), Some("m.garcia@example.com"));
        assert_eq!(subject.organization_id, Some(org));
        assert_eq!(subject.roles, vec!["sales_rep".to_string()]);
        assert_eq!(subject.permissions.len(), 2);
    }
}
