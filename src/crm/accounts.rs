use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::shared::detail::{self, DetailView, EditForm, Editable, TabSpec};
use crate::core::shared::error::ApiError;
use crate::core::shared::listing::{self, ListParams, ListResponse, Listable};
use crate::core::shared::schema::{crm_accounts, crm_contacts};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{non_blank, run_blocking};
use crate::crm::contacts::Contact;
use crate::crm::{ensure_territory, normalize_tags, unlink_dependents, Parent};
use crate::security::auth_api::AuthenticatedUser;
use crate::security::validation::Validator;

pub const ACCOUNT_TYPES: &[&str] = &["prospect", "customer", "partner", "vendor", "other"];

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crm_accounts)]
#[diesel(treat_none_as_null = true)]
pub struct Account {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub account_type: String,
    pub website: Option<String>,
    pub industry: Option<String>,
    pub employees_count: Option<i32>,
    pub annual_revenue: Option<f64>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub territory_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Listable for Account {
    const SEARCH_FIELDS: &'static [&'static str] =
        &["name", "industry", "email", "phone", "city", "country", "website", "tags"];
    const SORT_FIELDS: &'static [&'static str] = &[
        "name",
        "account_type",
        "industry",
        "employees_count",
        "annual_revenue",
        "city",
        "country",
        "created_at",
        "updated_at",
    ];
}

impl Editable for Account {
    const ENTITY: &'static str = "Account";
    const TABS: &'static [TabSpec] = &[
        TabSpec {
            name: "Overview",
            fields: &[
                "name",
                "account_type",
                "industry",
                "website",
                "employees_count",
                "annual_revenue",
                "tags",
            ],
        },
        TabSpec {
            name: "Contact",
            fields: &[
                "phone",
                "email",
                "address_line1",
                "address_line2",
                "city",
                "state",
                "postal_code",
                "country",
            ],
        },
        TabSpec {
            name: "Notes",
            fields: &["description"],
        },
        TabSpec {
            name: "System",
            fields: &["id", "territory_id", "owner_id", "created_at", "updated_at"],
        },
    ];
    const EDITABLE_FIELDS: &'static [&'static str] = &[
        "name",
        "account_type",
        "website",
        "industry",
        "employees_count",
        "annual_revenue",
        "phone",
        "email",
        "address_line1",
        "address_line2",
        "city",
        "state",
        "postal_code",
        "country",
        "description",
        "tags",
        "territory_id",
        "owner_id",
    ];
    const REQUIRED_FIELDS: &'static [&'static str] = &["name", "account_type"];

    fn record_id(&self) -> Uuid {
        self.id
    }
}

impl Account {
    fn validate(&self) -> Result<(), ApiError> {
        let mut v = Validator::new()
            .length(self.name.trim(), "name", Some(1), Some(255))
            .one_of(&self.account_type, "account_type", ACCOUNT_TYPES)
            .email_opt(self.email.as_deref())
            .phone_opt(self.phone.as_deref())
            .url_opt(self.website.as_deref());
        if let Some(count) = self.employees_count {
            v = v.range(&count, "employees_count", Some(&0), None);
        }
        if let Some(revenue) = self.annual_revenue {
            v = v.range(&revenue, "annual_revenue", Some(&0.0), None);
        }
        Ok(v.validate()?)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateAccountRequest {
    pub name: String,
    pub account_type: Option<String>,
    pub website: Option<String>,
    pub industry: Option<String>,
    pub employees_count: Option<i32>,
    pub annual_revenue: Option<f64>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub territory_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
}

impl CreateAccountRequest {
    fn into_account(self, org_id: Uuid, owner: Uuid) -> Account {
        let now = Utc::now();
        Account {
            id: Uuid::new_v4(),
            org_id,
            name: self.name.trim().to_string(),
            account_type: self
                .account_type
                .unwrap_or_else(|| "prospect".to_string()),
            website: non_blank(self.website),
            industry: non_blank(self.industry),
            employees_count: self.employees_count,
            annual_revenue: self.annual_revenue,
            phone: non_blank(self.phone),
            email: non_blank(self.email).map(|e| e.to_lowercase()),
            address_line1: non_blank(self.address_line1),
            address_line2: non_blank(self.address_line2),
            city: non_blank(self.city),
            state: non_blank(self.state),
            postal_code: non_blank(self.postal_code),
            country: non_blank(self.country),
            description: non_blank(self.description),
            tags: normalize_tags(self.tags),
            territory_id: self.territory_id,
            owner_id: self.owner_id.or(Some(owner)),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AccountFilters {
    pub account_type: Option<String>,
    pub industry: Option<String>,
    pub territory_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/crm/accounts", get(list_accounts).post(create_account))
        .route(
            "/api/crm/accounts/{id}",
            get(get_account)
                .put(update_account)
                .patch(update_account)
                .delete(delete_account),
        )
        .route("/api/crm/accounts/{id}/detail", get(get_account_detail))
        .route("/api/crm/accounts/{id}/form", get(get_account_form))
        .route("/api/crm/accounts/{id}/contacts", get(list_account_contacts))
}

pub(crate) fn load_account(
    conn: &mut PgConnection,
    org_id: Uuid,
    id: Uuid,
) -> Result<Account, ApiError> {
    crm_accounts::table
        .filter(crm_accounts::id.eq(id))
        .filter(crm_accounts::org_id.eq(org_id))
        .filter(crm_accounts::deleted_at.is_null())
        .select(Account::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Account"))
}

pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(params): Query<ListParams>,
    Query(filters): Query<AccountFilters>,
) -> Result<Json<ListResponse<Account>>, ApiError> {
    let org_id = user.org_id()?;
    let rows = run_blocking(&state.conn, move |conn| {
        let mut query = crm_accounts::table
            .filter(crm_accounts::org_id.eq(org_id))
            .filter(crm_accounts::deleted_at.is_null())
            .select(Account::as_select())
            .order(crm_accounts::created_at.asc())
            .into_boxed();
        if let Some(account_type) = filters.account_type {
            query = query.filter(crm_accounts::account_type.eq(account_type));
        }
        if let Some(industry) = filters.industry {
            query = query.filter(crm_accounts::industry.eq(industry));
        }
        if let Some(territory) = filters.territory_id {
            query = query.filter(crm_accounts::territory_id.eq(territory));
        }
        if let Some(owner) = filters.owner_id {
            query = query.filter(crm_accounts::owner_id.eq(owner));
        }
        Ok(query.load::<Account>(conn)?)
    })
    .await?;
    Ok(Json(listing::apply(rows, &params)?))
}

pub async fn create_account(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<Account>), ApiError> {
    let org_id = user.org_id()?;
    let account = req.into_account(org_id, user.user_id);
    account.validate()?;
    let created = run_blocking(&state.conn, move |conn| {
        ensure_territory(conn, org_id, account.territory_id)?;
        Ok(diesel::insert_into(crm_accounts::table)
            .values(&account)
            .returning(Account::as_returning())
            .get_result(conn)?)
    })
    .await?;
    info!("Account {} created by {}", created.name, user.username);
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_account(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Account>, ApiError> {
    let org_id = user.org_id()?;
    let account = run_blocking(&state.conn, move |conn| load_account(conn, org_id, id)).await?;
    Ok(Json(account))
}

pub async fn get_account_detail(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DetailView>, ApiError> {
    let org_id = user.org_id()?;
    let account = run_blocking(&state.conn, move |conn| load_account(conn, org_id, id)).await?;
    Ok(Json(DetailView::build(&account)?))
}

pub async fn get_account_form(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<EditForm>, ApiError> {
    let org_id = user.org_id()?;
    let account = run_blocking(&state.conn, move |conn| load_account(conn, org_id, id)).await?;
    Ok(Json(EditForm::prepopulate(&account)?))
}

pub async fn update_account(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(input): Json<Map<String, Value>>,
) -> Result<Json<Account>, ApiError> {
    let org_id = user.org_id()?;
    let updated = run_blocking(&state.conn, move |conn| {
        let current = load_account(conn, org_id, id)?;
        let (mut updated, changes) = detail::submit(&current, input)?;
        if changes.is_empty() {
            return Ok(current);
        }
        updated.name = updated.name.trim().to_string();
        updated.email = non_blank(updated.email).map(|e| e.to_lowercase());
        updated.tags = normalize_tags(updated.tags);
        updated.validate()?;
        if changes.contains_key("territory_id") {
            ensure_territory(conn, org_id, updated.territory_id)?;
        }
        updated.updated_at = Utc::now();
        Ok(diesel::update(crm_accounts::table.find(id))
            .set(&updated)
            .returning(Account::as_returning())
            .get_result(conn)?)
    })
    .await?;
    Ok(Json(updated))
}

/// Soft-deletes the account. Contacts, leads, deals, activities and sales
/// documents that pointed at it keep their data but lose the link.
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let org_id = user.org_id()?;
    let detached = run_blocking(&state.conn, move |conn| {
        load_account(conn, org_id, id)?;
        let now = Utc::now();
        conn.transaction::<_, ApiError, _>(|conn| {
            let detached = unlink_dependents(conn, Parent::Account, id, now)?;
            diesel::update(crm_accounts::table.find(id))
                .set(crm_accounts::deleted_at.eq(Some(now)))
                .execute(conn)?;
            Ok(detached)
        })
    })
    .await?;
    info!(
        "Account {id} deleted by {}, {detached} linked records detached",
        user.username
    );
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_account_contacts(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse<Contact>>, ApiError> {
    let org_id = user.org_id()?;
    let rows = run_blocking(&state.conn, move |conn| {
        load_account(conn, org_id, id)?;
        Ok(crm_contacts::table
            .filter(crm_contacts::account_id.eq(id))
            .filter(crm_contacts::org_id.eq(org_id))
            .filter(crm_contacts::deleted_at.is_null())
            .order(crm_contacts::created_at.asc())
            .select(Contact::as_select())
            .load(conn)?)
    })
    .await?;
    Ok(Json(listing::apply(rows, &params)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Account {
        CreateAccountRequest {
            name: "  Acme Corp ".into(),
            email: Some("Sales@Acme.io".into()),
            tags: vec!["vip".into(), " vip".into()],
            ..Default::default()
        }
        .into_account(Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn test_create_request_normalizes() {
        let account = sample();
        assert_eq!(account.name, "Acme Corp");
        assert_eq!(account.account_type, "prospect");
        assert_eq!(account.email.as_deref(), Some("sales@acme.io"));
        assert_eq!(account.tags, vec!["vip".to_string()]);
        assert!(account.owner_id.is_some());
        assert!(account.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut account = sample();
        account.account_type = "enemy".into();
        assert!(account.validate().is_err());

        let mut account = sample();
        account.employees_count = Some(-3);
        assert!(account.validate().is_err());
    }

    #[test]
    fn test_form_round_trip() {
        let account = sample();
        let form = EditForm::prepopulate(&account).expect("form");
        assert_eq!(form.values.len(), Account::EDITABLE_FIELDS.len());
        assert!(!form.values.contains_key("org_id"));

        let mut input = Map::new();
        input.insert("industry".into(), json!("Manufacturing"));
        input.insert("website".into(), json!(null));
        let (updated, changes) = detail::submit(&account, input).expect("submit");
        assert_eq!(updated.industry.as_deref(), Some("Manufacturing"));
        assert_eq!(changes.len(), 1);
        assert_eq!(updated.name, account.name);
    }

    #[test]
    fn test_search_matches_tags() {
        let mut other = sample();
        other.name = "Globex".into();
        other.tags = vec!["partner".into()];
        let params = ListParams {
            search: Some("VIP".into()),
            ..Default::default()
        };
        let result = listing::apply(vec![sample(), other], &params).expect("list");
        assert_eq!(result.count, 1);
        assert_eq!(result.results[0].name, "Acme Corp");
    }
}
