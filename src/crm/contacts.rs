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
use crate::core::shared::schema::crm_contacts;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{non_blank, run_blocking};
use crate::crm::{ensure_account, normalize_tags, unlink_dependents, Parent};
use crate::security::auth_api::AuthenticatedUser;
use crate::security::validation::Validator;

pub const CONTACT_STATUSES: &[&str] = &["active", "inactive", "bounced", "unsubscribed"];

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crm_contacts)]
#[diesel(treat_none_as_null = true)]
pub struct Contact {
    pub id: Uuid,
    pub org_id: Uuid,
    pub account_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub mobile: Option<String>,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub source: Option<String>,
    pub status: String,
    pub tags: Vec<String>,
    pub address_line1: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub notes: Option<String>,
    pub owner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Contact {
    pub fn full_name(&self) -> String {
        match self.last_name.as_deref() {
            Some(last) if !last.is_empty() => format!("{} {last}", self.first_name),
            _ => self.first_name.clone(),
        }
    }

    fn validate(&self) -> Result<(), ApiError> {
        Ok(Validator::new()
            .length(self.first_name.trim(), "first_name", Some(1), Some(100))
            .one_of(&self.status, "status", CONTACT_STATUSES)
            .email_opt(self.email.as_deref())
            .phone_opt(self.phone.as_deref())
            .phone_opt(self.mobile.as_deref())
            .validate()?)
    }
}

impl Listable for Contact {
    const SEARCH_FIELDS: &'static [&'static str] = &[
        "first_name",
        "last_name",
        "email",
        "phone",
        "mobile",
        "job_title",
        "department",
        "city",
        "tags",
    ];
    const SORT_FIELDS: &'static [&'static str] = &[
        "first_name",
        "last_name",
        "email",
        "job_title",
        "status",
        "city",
        "created_at",
        "updated_at",
    ];
}

impl Editable for Contact {
    const ENTITY: &'static str = "Contact";
    const TABS: &'static [TabSpec] = &[
        TabSpec {
            name: "Profile",
            fields: &[
                "first_name",
                "last_name",
                "job_title",
                "department",
                "account_id",
                "status",
                "source",
                "tags",
            ],
        },
        TabSpec {
            name: "Contact",
            fields: &[
                "email",
                "phone",
                "mobile",
                "address_line1",
                "city",
                "state",
                "postal_code",
                "country",
            ],
        },
        TabSpec {
            name: "Notes",
            fields: &["notes"],
        },
        TabSpec {
            name: "System",
            fields: &["id", "owner_id", "created_at", "updated_at"],
        },
    ];
    const EDITABLE_FIELDS: &'static [&'static str] = &[
        "account_id",
        "first_name",
        "last_name",
        "email",
        "phone",
        "mobile",
        "job_title",
        "department",
        "source",
        "status",
        "tags",
        "address_line1",
        "city",
        "state",
        "postal_code",
        "country",
        "notes",
        "owner_id",
    ];
    const REQUIRED_FIELDS: &'static [&'static str] = &["first_name", "status"];

    fn record_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateContactRequest {
    pub first_name: String,
    pub last_name: Option<String>,
    pub account_id: Option<Uuid>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub mobile: Option<String>,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub source: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub address_line1: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub notes: Option<String>,
    pub owner_id: Option<Uuid>,
}

impl CreateContactRequest {
    fn into_contact(self, org_id: Uuid, owner: Uuid) -> Contact {
        let now = Utc::now();
        Contact {
            id: Uuid::new_v4(),
            org_id,
            account_id: self.account_id,
            first_name: self.first_name.trim().to_string(),
            last_name: non_blank(self.last_name),
            email: non_blank(self.email).map(|e| e.to_lowercase()),
            phone: non_blank(self.phone),
            mobile: non_blank(self.mobile),
            job_title: non_blank(self.job_title),
            department: non_blank(self.department),
            source: non_blank(self.source),
            status: self.status.unwrap_or_else(|| "active".to_string()),
            tags: normalize_tags(self.tags),
            address_line1: non_blank(self.address_line1),
            city: non_blank(self.city),
            state: non_blank(self.state),
            postal_code: non_blank(self.postal_code),
            country: non_blank(self.country),
            notes: non_blank(self.notes),
            owner_id: self.owner_id.or(Some(owner)),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ContactFilters {
    pub account_id: Option<Uuid>,
    pub status: Option<String>,
    pub owner_id: Option<Uuid>,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/crm/contacts", get(list_contacts).post(create_contact))
        .route(
            "/api/crm/contacts/{id}",
            get(get_contact)
                .put(update_contact)
                .patch(update_contact)
                .delete(delete_contact),
        )
        .route("/api/crm/contacts/{id}/detail", get(get_contact_detail))
        .route("/api/crm/contacts/{id}/form", get(get_contact_form))
}

pub(crate) fn load_contact(
    conn: &mut PgConnection,
    org_id: Uuid,
    id: Uuid,
) -> Result<Contact, ApiError> {
    crm_contacts::table
        .filter(crm_contacts::id.eq(id))
        .filter(crm_contacts::org_id.eq(org_id))
        .filter(crm_contacts::deleted_at.is_null())
        .select(Contact::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Contact"))
}

pub async fn list_contacts(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(params): Query<ListParams>,
    Query(filters): Query<ContactFilters>,
) -> Result<Json<ListResponse<Contact>>, ApiError> {
    let org_id = user.org_id()?;
    let rows = run_blocking(&state.conn, move |conn| {
        let mut query = crm_contacts::table
            .filter(crm_contacts::org_id.eq(org_id))
            .filter(crm_contacts::deleted_at.is_null())
            .select(Contact::as_select())
            .order(crm_contacts::created_at.asc())
            .into_boxed();
        if let Some(account) = filters.account_id {
            query = query.filter(crm_contacts::account_id.eq(account));
        }
        if let Some(status) = filters.status {
            query = query.filter(crm_contacts::status.eq(status));
        }
        if let Some(owner) = filters.owner_id {
            query = query.filter(crm_contacts::owner_id.eq(owner));
        }
        Ok(query.load::<Contact>(conn)?)
    })
    .await?;
    Ok(Json(listing::apply(rows, &params)?))
}

pub async fn create_contact(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateContactRequest>,
) -> Result<(StatusCode, Json<Contact>), ApiError> {
    let org_id = user.org_id()?;
    let contact = req.into_contact(org_id, user.user_id);
    contact.validate()?;
    let created = run_blocking(&state.conn, move |conn| {
        ensure_account(conn, org_id, contact.account_id)?;
        Ok(diesel::insert_into(crm_contacts::table)
            .values(&contact)
            .returning(Contact::as_returning())
            .get_result(conn)?)
    })
    .await?;
    info!("Contact {} created by {}", created.full_name(), user.username);
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_contact(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Contact>, ApiError> {
    let org_id = user.org_id()?;
    let contact = run_blocking(&state.conn, move |conn| load_contact(conn, org_id, id)).await?;
    Ok(Json(contact))
}

pub async fn get_contact_detail(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DetailView>, ApiError> {
    let org_id = user.org_id()?;
    let contact = run_blocking(&state.conn, move |conn| load_contact(conn, org_id, id)).await?;
    Ok(Json(DetailView::build(&contact)?))
}

pub async fn get_contact_form(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<EditForm>, ApiError> {
    let org_id = user.org_id()?;
    let contact = run_blocking(&state.conn, move |conn| load_contact(conn, org_id, id)).await?;
    Ok(Json(EditForm::prepopulate(&contact)?))
}

pub async fn update_contact(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(input): Json<Map<String, Value>>,
) -> Result<Json<Contact>, ApiError> {
    let org_id = user.org_id()?;
    let updated = run_blocking(&state.conn, move |conn| {
        let current = load_contact(conn, org_id, id)?;
        let (mut updated, changes) = detail::submit(&current, input)?;
        if changes.is_empty() {
            return Ok(current);
        }
        updated.first_name = updated.first_name.trim().to_string();
        updated.email = non_blank(updated.email).map(|e| e.to_lowercase());
        updated.tags = normalize_tags(updated.tags);
        updated.validate()?;
        if changes.contains_key("account_id") {
            ensure_account(conn, org_id, updated.account_id)?;
        }
        updated.updated_at = Utc::now();
        Ok(diesel::update(crm_contacts::table.find(id))
            .set(&updated)
            .returning(Contact::as_returning())
            .get_result(conn)?)
    })
    .await?;
    Ok(Json(updated))
}

pub async fn delete_contact(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let org_id = user.org_id()?;
    let detached = run_blocking(&state.conn, move |conn| {
        load_contact(conn, org_id, id)?;
        let now = Utc::now();
        conn.transaction::<_, ApiError, _>(|conn| {
            let detached = unlink_dependents(conn, Parent::Contact, id, now)?;
            diesel::update(crm_contacts::table.find(id))
                .set(crm_contacts::deleted_at.eq(Some(now)))
                .execute(conn)?;
            Ok(detached)
        })
    })
    .await?;
    info!(
        "Contact {id} deleted by {}, {detached} linked records detached",
        user.username
    );
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Contact {
        CreateContactRequest {
            first_name: " Ada ".into(),
            last_name: Some("Lovelace".into()),
            email: Some("ADA@example.com".into()),
            job_title: Some("Analyst".into()),
            ..Default::default()
        }
        .into_contact(Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn test_create_request_defaults() {
        let contact = sample();
        assert_eq!(contact.first_name, "Ada");
        assert_eq!(contact.status, "active");
        assert_eq!(contact.email.as_deref(), Some("ada@example.com"));
        assert_eq!(contact.full_name(), "Ada Lovelace");
        assert!(contact.validate().is_ok());
    }

    #[test]
    fn test_blank_first_name_is_rejected_by_form() {
        let contact = sample();
        let mut input = Map::new();
        input.insert("first_name".into(), json!("   "));
        assert!(detail::submit(&contact, input).is_err());
    }

    #[test]
    fn test_form_rejects_read_only_fields() {
        let contact = sample();
        let mut input = Map::new();
        input.insert("org_id".into(), json!(Uuid::new_v4()));
        assert!(detail::submit(&contact, input).is_err());
    }

    #[test]
    fn test_detail_tabs_cover_account() {
        let contact = sample();
        let view = DetailView::build(&contact).expect("detail");
        assert_eq!(view.entity, "Contact");
        let profile = &view.tabs[0];
        assert!(profile.fields.iter().any(|f| f.name == "account_id" && f.editable));
        let system = view.tabs.last().expect("system tab");
        let id_field = system.fields.iter().find(|f| f.name == "id").expect("id field");
        assert!(!id_field.editable);
    }

    #[test]
    fn test_unknown_status_fails_validation() {
        let mut contact = sample();
        contact.status = "vip".into();
        assert!(contact.validate().is_err());
    }
}
