//! First-run seeding: default company, permission catalog, system roles,
//! pipeline stages and the initial administrator.
//!
//! Every step checks for existing rows first, so running it on each start
//! is safe.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use diesel::prelude::*;
use log::{info, warn};
use uuid::Uuid;

use crate::core::config::BootstrapConfig;
use crate::core::shared::models::{
    NewOrganization, NewOrganizationMember, NewRbacPermission, NewRbacRole,
    NewRbacRolePermission, NewRbacUserRole, NewUser, Organization,
};
use crate::core::shared::schema::{
    crm_pipeline_stages, organization_members, organizations, rbac_permissions,
    rbac_role_permissions, rbac_roles, rbac_user_roles, users,
};
use crate::core::shared::utils::{slugify, DbPool};
use crate::crm::pipeline::default_stages;
use crate::security::auth_api::{Permission, Role};
use crate::security::password::{generate_password, hash_password};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub org_id: Uuid,
    pub company_created: bool,
    pub permissions_added: usize,
    pub roles_added: usize,
    pub stages_added: usize,
    pub admin_created: bool,
}

/// Runs the seeding on the blocking pool.
pub async fn run_bootstrap(pool: DbPool, config: BootstrapConfig) -> Result<BootstrapReport> {
    let report = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().context("bootstrap needs a database connection")?;
        conn.transaction::<_, anyhow::Error, _>(|conn| seed(conn, &config))
    })
    .await
    .map_err(|e| anyhow!("bootstrap task failed: {e}"))??;

    info!(
        "Bootstrap complete: company {} (new: {}), {} permissions, {} roles, {} stages added, admin created: {}",
        report.org_id,
        report.company_created,
        report.permissions_added,
        report.roles_added,
        report.stages_added,
        report.admin_created
    );
    Ok(report)
}

pub fn seed(conn: &mut PgConnection, config: &BootstrapConfig) -> Result<BootstrapReport> {
    let (org_id, company_created) = ensure_company(conn, &config.company_name)?;
    let permissions_added = ensure_permission_catalog(conn)?;
    let roles_added = ensure_system_roles(conn)?;
    let stages_added = ensure_pipeline(conn, org_id)?;
    let admin_created = ensure_admin(conn, org_id, config)?;
    Ok(BootstrapReport {
        org_id,
        company_created,
        permissions_added,
        roles_added,
        stages_added,
        admin_created,
    })
}

fn ensure_company(conn: &mut PgConnection, name: &str) -> Result<(Uuid, bool)> {
    let existing = organizations::table
        .order(organizations::created_at.asc())
        .select(Organization::as_select())
        .first::<Organization>(conn)
        .optional()?;
    if let Some(org) = existing {
        return Ok((org.id, false));
    }

    let now = Utc::now();
    let slug = match slugify(name) {
        s if s.is_empty() => "default".to_string(),
        s => s,
    };
    let org = NewOrganization {
        id: Uuid::new_v4(),
        name: name.trim().to_string(),
        slug,
        default_currency: "USD".to_string(),
        timezone: "UTC".to_string(),
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    diesel::insert_into(organizations::table)
        .values(&org)
        .execute(conn)?;
    info!("Created default company '{}'", org.name);
    Ok((org.id, true))
}

fn ensure_permission_catalog(conn: &mut PgConnection) -> Result<usize> {
    let now = Utc::now();
    let rows: Vec<NewRbacPermission> = Permission::catalog()
        .into_iter()
        .map(|p| NewRbacPermission {
            id: Uuid::new_v4(),
            name: p.codename(),
            display_name: p.display_name(),
            resource_type: p.resource.as_str().to_string(),
            action: p.action.as_str().to_string(),
            category: p.resource.category().to_string(),
            created_at: now,
        })
        .collect();
    Ok(diesel::insert_into(rbac_permissions::table)
        .values(&rows)
        .on_conflict(rbac_permissions::name)
        .do_nothing()
        .execute(conn)?)
}

/// Creates missing system roles and tops up their grants. Grants an
/// administrator added to a system role by hand are left alone.
fn ensure_system_roles(conn: &mut PgConnection) -> Result<usize> {
    let now = Utc::now();
    let roles: Vec<NewRbacRole> = Role::ALL
        .iter()
        .map(|role| NewRbacRole {
            id: Uuid::new_v4(),
            name: role.name().to_string(),
            display_name: role.display_name().to_string(),
            description: Some(role.description().to_string()),
            is_system: true,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
        .collect();
    let added = diesel::insert_into(rbac_roles::table)
        .values(&roles)
        .on_conflict(rbac_roles::name)
        .do_nothing()
        .execute(conn)?;

    let permission_ids: Vec<(String, Uuid)> = rbac_permissions::table
        .select((rbac_permissions::name, rbac_permissions::id))
        .load(conn)?;

    for role in Role::ALL {
        let role_id = role_id(conn, role.name())?;
        let grants: Vec<NewRbacRolePermission> = role
            .permissions()
            .iter()
            .filter_map(|p| {
                let codename = p.codename();
                permission_ids
                    .iter()
                    .find(|(name, _)| *name == codename)
                    .map(|(_, id)| *id)
            })
            .map(|permission_id| NewRbacRolePermission {
                id: Uuid::new_v4(),
                role_id,
                permission_id,
                granted_at: now,
            })
            .collect();
        diesel::insert_into(rbac_role_permissions::table)
            .values(&grants)
            .on_conflict((rbac_role_permissions::role_id, rbac_role_permissions::permission_id))
            .do_nothing()
            .execute(conn)?;
    }
    Ok(added)
}

fn role_id(conn: &mut PgConnection, name: &str) -> Result<Uuid> {
    rbac_roles::table
        .filter(rbac_roles::name.eq(name))
        .select(rbac_roles::id)
        .first::<Uuid>(conn)
        .with_context(|| format!("role '{name}' missing after seeding"))
}

fn ensure_pipeline(conn: &mut PgConnection, org_id: Uuid) -> Result<usize> {
    let count: i64 = crm_pipeline_stages::table
        .filter(crm_pipeline_stages::org_id.eq(org_id))
        .count()
        .get_result(conn)?;
    if count > 0 {
        return Ok(0);
    }
    Ok(diesel::insert_into(crm_pipeline_stages::table)
        .values(&default_stages(org_id))
        .execute(conn)?)
}

/// The configured password, or a generated one that is logged once.
fn admin_password(config: &BootstrapConfig) -> (String, bool) {
    match config.admin_password.as_deref().map(str::trim) {
        Some(p) if !p.is_empty() => (p.to_string(), false),
        _ => (generate_password(), true),
    }
}

fn ensure_admin(conn: &mut PgConnection, org_id: Uuid, config: &BootstrapConfig) -> Result<bool> {
    let username = config.admin_username.trim().to_lowercase();
    let exists: bool = diesel::select(diesel::dsl::exists(
        users::table.filter(users::username.eq(&username)),
    ))
    .get_result(conn)?;
    if exists {
        return Ok(false);
    }

    let (password, generated) = admin_password(config);
    let password_hash = hash_password(&password)?;
    let now = Utc::now();
    let admin = NewUser {
        id: Uuid::new_v4(),
        org_id,
        username: username.clone(),
        email: config.admin_email.trim().to_lowercase(),
        password_hash,
        first_name: None,
        last_name: None,
        phone: None,
        job_title: Some("Administrator".to_string()),
        is_active: true,
        is_superuser: true,
        created_at: now,
        updated_at: now,
    };
    diesel::insert_into(users::table).values(&admin).execute(conn)?;
    diesel::insert_into(organization_members::table)
        .values(&NewOrganizationMember {
            id: Uuid::new_v4(),
            org_id,
            user_id: admin.id,
            created_at: now,
        })
        .execute(conn)?;
    diesel::insert_into(rbac_user_roles::table)
        .values(&NewRbacUserRole {
            id: Uuid::new_v4(),
            user_id: admin.id,
            role_id: role_id(conn, Role::Admin.name())?,
            granted_by: None,
            granted_at: now,
        })
        .execute(conn)?;

    if generated {
        warn!("Created administrator '{username}' with generated password: {password}");
        warn!("Change this password after the first sign-in");
    } else {
        info!("Created administrator '{username}'");
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(password: Option<&str>) -> BootstrapConfig {
        BootstrapConfig {
            company_name: "Acme".into(),
            admin_username: "admin".into(),
            admin_email: "admin@acme.test".into(),
            admin_password: password.map(String::from),
        }
    }

    #[test]
    fn test_configured_admin_password_is_used() {
        let (password, generated) = admin_password(&config(Some(" S3cret-pass ")));
        assert_eq!(password, "S3cret-pass");
        assert!(!generated);
    }

    #[test]
    fn test_blank_admin_password_is_generated() {
        let (password, generated) = admin_password(&config(Some("  ")));
        assert!(generated);
        assert!(password.len() >= 12);
        let (_, generated) = admin_password(&config(None));
        assert!(generated);
    }

    #[test]
    fn test_admin_role_covers_catalog() {
        assert_eq!(Role::Admin.permissions().len(), Permission::catalog().len());
        assert!(Role::Viewer.permissions().len() < Role::SalesRep.permissions().len());
    }
}
