//! The current company of a session and switching between companies.

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::shared::detail::{self, Editable, TabSpec};
use crate::core::shared::error::ApiError;
use crate::core::shared::models::{Organization, User};
use crate::core::shared::schema::{organizations, users};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::run_blocking;
use crate::directory::auth_routes::LoginResponse;
use crate::directory::identity::{member_organizations, resolve_identity};
use crate::security::auth_api::AuthenticatedUser;
use crate::security::validation::Validator;

impl Editable for Organization {
    const ENTITY: &'static str = "Company";
    const TABS: &'static [TabSpec] = &[
        TabSpec {
            name: "General",
            fields: &["name", "slug", "industry", "website"],
        },
        TabSpec {
            name: "Contact",
            fields: &["phone", "email", "address"],
        },
        TabSpec {
            name: "Preferences",
            fields: &["default_currency", "timezone"],
        },
        TabSpec {
            name: "System",
            fields: &["id", "is_active", "created_at", "updated_at"],
        },
    ];
    const EDITABLE_FIELDS: &'static [&'static str] = &[
        "name",
        "industry",
        "website",
        "phone",
        "email",
        "address",
        "default_currency",
        "timezone",
    ];
    const REQUIRED_FIELDS: &'static [&'static str] = &["name", "default_currency", "timezone"];

    fn record_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompanySummary {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub is_current: bool,
}

impl CompanySummary {
    pub fn list(orgs: Vec<Organization>, current: Option<Uuid>) -> Vec<Self> {
        orgs.into_iter()
            .map(|org| Self {
                is_current: Some(org.id) == current,
                id: org.id,
                name: org.name,
                slug: org.slug,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct SwitchCompanyRequest {
    pub organization_id: Uuid,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/company/current",
            get(get_current_company)
                .put(update_current_company)
                .patch(update_current_company),
        )
        .route("/api/company/list", get(list_companies))
        .route("/api/company/switch", post(switch_company))
}

pub(crate) fn load_company(conn: &mut PgConnection, org_id: Uuid) -> Result<Organization, ApiError> {
    organizations::table
        .find(org_id)
        .select(Organization::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Company"))
}

pub(crate) fn load_companies_for(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> Result<Vec<Organization>, ApiError> {
    let user: User = users::table
        .find(user_id)
        .select(User::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::Unauthorized("User no longer exists".into()))?;
    Ok(member_organizations(conn, &user)?)
}

fn validate_company(org: &Organization) -> Result<(), ApiError> {
    Validator::new()
        .length(&org.name, "name", Some(1), Some(255))
        .currency(&org.default_currency)
        .email_opt(org.email.as_deref())
        .url_opt(org.website.as_deref())
        .phone_opt(org.phone.as_deref())
        .validate()?;
    Ok(())
}

pub async fn get_current_company(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<Organization>, ApiError> {
    let org_id = user.org_id()?;
    let org = run_blocking(&state.conn, move |conn| load_company(conn, org_id)).await?;
    Ok(Json(org))
}

pub async fn update_current_company(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(input): Json<Map<String, Value>>,
) -> Result<Json<Organization>, ApiError> {
    let org_id = user.org_id()?;
    let saved = run_blocking(&state.conn, move |conn| {
        let current = load_company(conn, org_id)?;
        let (mut updated, changes) = detail::submit(&current, input)?;
        if changes.is_empty() {
            return Ok(current);
        }
        updated.default_currency = updated.default_currency.to_uppercase();
        validate_company(&updated)?;
        updated.updated_at = Utc::now();

        Ok(diesel::update(organizations::table.find(org_id))
            .set(&updated)
            .returning(Organization::as_returning())
            .get_result(conn)?)
    })
    .await?;
    info!("Company {} updated by {}", saved.name, user.username);
    Ok(Json(saved))
}

pub async fn list_companies(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<CompanySummary>>, ApiError> {
    let current = user.organization_id;
    let user_id = user.user_id;
    let orgs = run_blocking(&state.conn, move |conn| load_companies_for(conn, user_id)).await?;
    Ok(Json(CompanySummary::list(orgs, current)))
}

/// Issues a fresh token pair scoped to another company the user belongs to.
pub async fn switch_company(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<SwitchCompanyRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user_id = user.user_id;
    let target = req.organization_id;
    let identity = run_blocking(&state.conn, move |conn| {
        resolve_identity(conn, user_id, Some(target))
    })
    .await?;

    let tokens = state
        .jwt_manager
        .issue(&identity.token_subject())
        .map_err(|e| ApiError::Internal(format!("Failed to issue tokens: {e}")))?;

    if let Some(jti) = &user.token_id {
        let expires_at =
            Utc::now() + chrono::Duration::minutes(state.jwt_manager.config().access_token_expiry_minutes);
        state.jwt_manager.revoke_token(jti, expires_at.timestamp()).await;
    }

    info!("User {} switched to company {target}", user.username);
    Ok(Json(LoginResponse::new(tokens, &identity)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn company(name: &str) -> Organization {
        Organization {
            id: Uuid::new_v4(),
            name: name.into(),
            slug: crate::core::shared::utils::slugify(name),
            industry: None,
            website: None,
            phone: None,
            email: None,
            address: None,
            default_currency: "USD".into(),
            timezone: "UTC".into(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_company_summary_marks_current() {
        let a = company("Acme");
        let b = company("Globex");
        let current = b.id;
        let list = CompanySummary::list(vec![a, b], Some(current));
        assert!(!list[0].is_current);
        assert!(list[1].is_current);
    }

    #[test]
    fn test_company_edit_rejects_slug_and_blank_name() {
        let org = company("Acme");
        let slug = match json!({"slug": "other"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert!(detail::submit(&org, slug).is_err());

        let blank = match json!({"name": " "}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert!(detail::submit(&org, blank).is_err());
    }

    #[test]
    fn test_validate_company_currency() {
        let mut org = company("Acme");
        assert!(validate_company(&org).is_ok());
        org.default_currency = "dollars".into();
        assert!(validate_company(&org).is_err());
    }
}
