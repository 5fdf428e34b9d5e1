use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::shared::detail::{self, DetailView, EditForm, Editable, TabSpec};
use crate::core::shared::error::ApiError;
use crate::core::shared::listing::{self, ListParams, ListResponse, Listable};
use crate::core::shared::schema::{crm_deals, crm_leads};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{non_blank, run_blocking};
use crate::crm::deals::Deal;
use crate::crm::pipeline::{lead_status_probability, resolve_stage, LEAD_STATUSES};
use crate::crm::{ensure_account, ensure_contact, normalize_tags, unlink_dependents, Parent};
use crate::security::auth_api::{Action, AuthenticatedUser, Resource};
use crate::security::validation::Validator;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crm_leads)]
#[diesel(treat_none_as_null = true)]
pub struct Lead {
    pub id: Uuid,
    pub org_id: Uuid,
    pub title: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: String,
    pub probability: i32,
    pub value: Option<f64>,
    pub currency: Option<String>,
    pub source: Option<String>,
    pub expected_close_date: Option<NaiveDate>,
    pub contact_id: Option<Uuid>,
    pub account_id: Option<Uuid>,
    pub converted_deal_id: Option<Uuid>,
    pub disqualified_reason: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub owner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Lead {
    pub fn is_converted(&self) -> bool {
        self.status == "converted"
    }

    /// Applies a status change coming from the edit form.
    fn change_status(&mut self, previous: &str, now: DateTime<Utc>) -> Result<(), ApiError> {
        if previous == "converted" {
            return Err(ApiError::Conflict(
                "A converted lead keeps its status".into(),
            ));
        }
        if self.status == "converted" {
            return Err(ApiError::validation(
                "Use the convert action to turn a lead into a deal",
            ));
        }
        let Some(probability) = lead_status_probability(&self.status) else {
            return Err(ApiError::validation(format!(
                "status must be one of {}",
                LEAD_STATUSES.join(", ")
            )));
        };
        self.probability = probability;
        if self.status == "unqualified" {
            self.closed_at = Some(now);
        } else {
            self.closed_at = None;
            self.disqualified_reason = None;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ApiError> {
        let mut v = Validator::new()
            .length(self.title.trim(), "title", Some(1), Some(255))
            .one_of(&self.status, "status", LEAD_STATUSES)
            .range(&self.probability, "probability", Some(&0), Some(&100))
            .email_opt(self.email.as_deref())
            .phone_opt(self.phone.as_deref());
        if let Some(currency) = self.currency.as_deref() {
            v = v.currency(currency);
        }
        Ok(v.validate()?)
    }

    /// The deal a lead turns into on conversion.
    pub fn to_deal(&self, req: ConvertLeadRequest, now: DateTime<Utc>) -> Deal {
        Deal {
            id: Uuid::new_v4(),
            org_id: self.org_id,
            lead_id: Some(self.id),
            account_id: self.account_id,
            contact_id: self.contact_id,
            name: non_blank(req.name).unwrap_or_else(|| self.title.clone()),
            description: self.description.clone(),
            value: req.value.or(self.value),
            currency: self.currency.clone(),
            stage_id: None,
            stage: String::new(),
            probability: 0,
            source: self.source.clone(),
            expected_close_date: req.expected_close_date.or(self.expected_close_date),
            actual_close_date: None,
            won: None,
            lost_reason: None,
            owner_id: self.owner_id,
            tags: self.tags.clone(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

impl Listable for Lead {
    const SEARCH_FIELDS: &'static [&'static str] = &[
        "title",
        "first_name",
        "last_name",
        "company",
        "email",
        "phone",
        "source",
        "status",
        "tags",
    ];
    const SORT_FIELDS: &'static [&'static str] = &[
        "title",
        "company",
        "status",
        "probability",
        "value",
        "source",
        "expected_close_date",
        "created_at",
        "updated_at",
    ];
}

impl Editable for Lead {
    const ENTITY: &'static str = "Lead";
    const TABS: &'static [TabSpec] = &[
        TabSpec {
            name: "Overview",
            fields: &[
                "title",
                "status",
                "probability",
                "value",
                "currency",
                "expected_close_date",
                "source",
                "tags",
            ],
        },
        TabSpec {
            name: "Person",
            fields: &["first_name", "last_name", "company", "email", "phone"],
        },
        TabSpec {
            name: "Relations",
            fields: &["account_id", "contact_id", "converted_deal_id", "owner_id"],
        },
        TabSpec {
            name: "Notes",
            fields: &["description", "disqualified_reason"],
        },
    ];
    const EDITABLE_FIELDS: &'static [&'static str] = &[
        "title",
        "first_name",
        "last_name",
        "company",
        "email",
        "phone",
        "status",
        "value",
        "currency",
        "source",
        "expected_close_date",
        "contact_id",
        "account_id",
        "disqualified_reason",
        "description",
        "tags",
        "owner_id",
    ];
    const REQUIRED_FIELDS: &'static [&'static str] = &["title", "status"];

    fn record_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateLeadRequest {
    pub title: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: Option<String>,
    pub value: Option<f64>,
    pub currency: Option<String>,
    pub source: Option<String>,
    pub expected_close_date: Option<NaiveDate>,
    pub contact_id: Option<Uuid>,
    pub account_id: Option<Uuid>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub owner_id: Option<Uuid>,
}

impl CreateLeadRequest {
    fn into_lead(self, org_id: Uuid, owner: Uuid) -> Result<Lead, ApiError> {
        let status = self.status.unwrap_or_else(|| "new".to_string());
        if status == "converted" {
            return Err(ApiError::validation("A new lead cannot start out converted"));
        }
        let probability = lead_status_probability(&status).ok_or_else(|| {
            ApiError::validation(format!("status must be one of {}", LEAD_STATUSES.join(", ")))
        })?;
        let now = Utc::now();
        Ok(Lead {
            id: Uuid::new_v4(),
            org_id,
            title: self.title.trim().to_string(),
            first_name: non_blank(self.first_name),
            last_name: non_blank(self.last_name),
            company: non_blank(self.company),
            email: non_blank(self.email).map(|e| e.to_lowercase()),
            phone: non_blank(self.phone),
            closed_at: (status == "unqualified").then_some(now),
            status,
            probability,
            value: self.value,
            currency: non_blank(self.currency).map(|c| c.to_uppercase()),
            source: non_blank(self.source),
            expected_close_date: self.expected_close_date,
            contact_id: self.contact_id,
            account_id: self.account_id,
            converted_deal_id: None,
            disqualified_reason: None,
            description: non_blank(self.description),
            tags: normalize_tags(self.tags),
            owner_id: self.owner_id.or(Some(owner)),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ConvertLeadRequest {
    /// Deal name; defaults to the lead title.
    pub name: Option<String>,
    pub stage: Option<String>,
    pub value: Option<f64>,
    pub expected_close_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct ConvertLeadResponse {
    pub lead: Lead,
    pub deal: Deal,
}

#[derive(Debug, Default, Deserialize)]
pub struct LeadFilters {
    pub status: Option<String>,
    pub source: Option<String>,
    pub owner_id: Option<Uuid>,
    pub account_id: Option<Uuid>,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/crm/leads", get(list_leads).post(create_lead))
        .route(
            "/api/crm/leads/{id}",
            get(get_lead)
                .put(update_lead)
                .patch(update_lead)
                .delete(delete_lead),
        )
        .route("/api/crm/leads/{id}/detail", get(get_lead_detail))
        .route("/api/crm/leads/{id}/form", get(get_lead_form))
        .route("/api/crm/leads/{id}/convert", post(convert_lead))
}

pub(crate) fn load_lead(conn: &mut PgConnection, org_id: Uuid, id: Uuid) -> Result<Lead, ApiError> {
    crm_leads::table
        .filter(crm_leads::id.eq(id))
        .filter(crm_leads::org_id.eq(org_id))
        .filter(crm_leads::deleted_at.is_null())
        .select(Lead::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Lead"))
}

pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(params): Query<ListParams>,
    Query(filters): Query<LeadFilters>,
) -> Result<Json<ListResponse<Lead>>, ApiError> {
    let org_id = user.org_id()?;
    let rows = run_blocking(&state.conn, move |conn| {
        let mut query = crm_leads::table
            .filter(crm_leads::org_id.eq(org_id))
            .filter(crm_leads::deleted_at.is_null())
            .select(Lead::as_select())
            .order(crm_leads::created_at.asc())
            .into_boxed();
        if let Some(status) = filters.status {
            query = query.filter(crm_leads::status.eq(status));
        }
        if let Some(source) = filters.source {
            query = query.filter(crm_leads::source.eq(source));
        }
        if let Some(owner) = filters.owner_id {
            query = query.filter(crm_leads::owner_id.eq(owner));
        }
        if let Some(account) = filters.account_id {
            query = query.filter(crm_leads::account_id.eq(account));
        }
        Ok(query.load::<Lead>(conn)?)
    })
    .await?;
    Ok(Json(listing::apply(rows, &params)?))
}

pub async fn create_lead(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateLeadRequest>,
) -> Result<(StatusCode, Json<Lead>), ApiError> {
    let org_id = user.org_id()?;
    let lead = req.into_lead(org_id, user.user_id)?;
    lead.validate()?;
    let created = run_blocking(&state.conn, move |conn| {
        ensure_account(conn, org_id, lead.account_id)?;
        ensure_contact(conn, org_id, lead.contact_id)?;
        Ok(diesel::insert_into(crm_leads::table)
            .values(&lead)
            .returning(Lead::as_returning())
            .get_result(conn)?)
    })
    .await?;
    info!("Lead {} created by {}", created.title, user.username);
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_lead(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Lead>, ApiError> {
    let org_id = user.org_id()?;
    let lead = run_blocking(&state.conn, move |conn| load_lead(conn, org_id, id)).await?;
    Ok(Json(lead))
}

pub async fn get_lead_detail(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DetailView>, ApiError> {
    let org_id = user.org_id()?;
    let lead = run_blocking(&state.conn, move |conn| load_lead(conn, org_id, id)).await?;
    Ok(Json(DetailView::build(&lead)?))
}

pub async fn get_lead_form(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<EditForm>, ApiError> {
    let org_id = user.org_id()?;
    let lead = run_blocking(&state.conn, move |conn| load_lead(conn, org_id, id)).await?;
    Ok(Json(EditForm::prepopulate(&lead)?))
}

pub async fn update_lead(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(input): Json<Map<String, Value>>,
) -> Result<Json<Lead>, ApiError> {
    let org_id = user.org_id()?;
    let updated = run_blocking(&state.conn, move |conn| {
        let current = load_lead(conn, org_id, id)?;
        let (mut updated, changes) = detail::submit(&current, input)?;
        if changes.is_empty() {
            return Ok(current);
        }
        let now = Utc::now();
        if changes.contains_key("status") {
            updated.change_status(&current.status, now)?;
        }
        updated.title = updated.title.trim().to_string();
        updated.email = non_blank(updated.email).map(|e| e.to_lowercase());
        updated.currency = non_blank(updated.currency).map(|c| c.to_uppercase());
        updated.tags = normalize_tags(updated.tags);
        updated.validate()?;
        if changes.contains_key("account_id") {
            ensure_account(conn, org_id, updated.account_id)?;
        }
        if changes.contains_key("contact_id") {
            ensure_contact(conn, org_id, updated.contact_id)?;
        }
        updated.updated_at = now;
        Ok(diesel::update(crm_leads::table.find(id))
            .set(&updated)
            .returning(Lead::as_returning())
            .get_result(conn)?)
    })
    .await?;
    Ok(Json(updated))
}

/// Creates a deal from the lead and marks the lead converted, atomically.
pub async fn convert_lead(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    body: Option<Json<ConvertLeadRequest>>,
) -> Result<(StatusCode, Json<ConvertLeadResponse>), ApiError> {
    user.require(Resource::Deals, Action::Add)?;
    let org_id = user.org_id()?;
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let converted = run_blocking(&state.conn, move |conn| {
        let lead = load_lead(conn, org_id, id)?;
        if lead.is_converted() {
            return Err(ApiError::Conflict("Lead is already converted".into()));
        }
        if lead.status == "unqualified" {
            return Err(ApiError::Conflict(
                "An unqualified lead cannot be converted".into(),
            ));
        }
        let placement = resolve_stage(
            conn,
            org_id,
            req.stage.as_deref().unwrap_or("qualification"),
        )?;
        let now = Utc::now();
        let mut deal = lead.to_deal(req, now);
        deal.place(placement, now.date_naive());

        conn.transaction::<_, ApiError, _>(|conn| {
            let deal: Deal = diesel::insert_into(crm_deals::table)
                .values(&deal)
                .returning(Deal::as_returning())
                .get_result(conn)?;
            let lead: Lead = diesel::update(crm_leads::table.find(lead.id))
                .set((
                    crm_leads::status.eq("converted"),
                    crm_leads::probability.eq(lead_status_probability("converted").unwrap_or(100)),
                    crm_leads::converted_deal_id.eq(Some(deal.id)),
                    crm_leads::closed_at.eq(Some(now)),
                    crm_leads::updated_at.eq(now),
                ))
                .returning(Lead::as_returning())
                .get_result(conn)?;
            Ok(ConvertLeadResponse { lead, deal })
        })
    })
    .await?;
    info!(
        "Lead {} converted to deal {} by {}",
        converted.lead.id, converted.deal.id, user.username
    );
    Ok((StatusCode::CREATED, Json(converted)))
}

pub async fn delete_lead(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let org_id = user.org_id()?;
    let detached = run_blocking(&state.conn, move |conn| {
        load_lead(conn, org_id, id)?;
        let now = Utc::now();
        conn.transaction::<_, ApiError, _>(|conn| {
            let detached = unlink_dependents(conn, Parent::Lead, id, now)?;
            diesel::update(crm_leads::table.find(id))
                .set(crm_leads::deleted_at.eq(Some(now)))
                .execute(conn)?;
            Ok(detached)
        })
    })
    .await?;
    info!(
        "Lead {id} deleted by {}, {detached} linked records detached",
        user.username
    );
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Lead {
        CreateLeadRequest {
            title: "Warehouse scanners".into(),
            company: Some("Initech".into()),
            value: Some(12_000.0),
            currency: Some("usd".into()),
            ..Default::default()
        }
        .into_lead(Uuid::new_v4(), Uuid::new_v4())
        .expect("lead")
    }

    #[test]
    fn test_new_lead_defaults() {
        let lead = sample();
        assert_eq!(lead.status, "new");
        assert_eq!(lead.probability, 10);
        assert_eq!(lead.currency.as_deref(), Some("USD"));
        assert!(lead.closed_at.is_none());
        assert!(lead.validate().is_ok());
    }

    #[test]
    fn test_create_rejects_converted_or_unknown_status() {
        let converted = CreateLeadRequest {
            title: "x".into(),
            status: Some("converted".into()),
            ..Default::default()
        };
        assert!(converted.into_lead(Uuid::new_v4(), Uuid::new_v4()).is_err());

        let unknown = CreateLeadRequest {
            title: "x".into(),
            status: Some("hot".into()),
            ..Default::default()
        };
        assert!(unknown.into_lead(Uuid::new_v4(), Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_status_change_updates_probability() {
        let now = Utc::now();
        let mut lead = sample();
        lead.status = "qualified".into();
        lead.change_status("new", now).expect("qualify");
        assert_eq!(lead.probability, 40);

        lead.status = "unqualified".into();
        lead.change_status("qualified", now).expect("disqualify");
        assert_eq!(lead.probability, 0);
        assert_eq!(lead.closed_at, Some(now));

        lead.status = "contacted".into();
        lead.change_status("unqualified", now).expect("reopen");
        assert_eq!(lead.probability, 20);
        assert!(lead.closed_at.is_none());
    }

    #[test]
    fn test_status_change_guards_conversion() {
        let now = Utc::now();
        let mut lead = sample();
        lead.status = "converted".into();
        assert!(lead.change_status("new", now).is_err());

        let mut lead = sample();
        lead.status = "new".into();
        assert!(matches!(
            lead.change_status("converted", now),
            Err(ApiError::Conflict(_))
        ));
    }

    #[test]
    fn test_to_deal_carries_lead_fields() {
        let lead = sample();
        let now = Utc::now();
        let deal = lead.to_deal(ConvertLeadRequest::default(), now);
        assert_eq!(deal.name, lead.title);
        assert_eq!(deal.lead_id, Some(lead.id));
        assert_eq!(deal.org_id, lead.org_id);
        assert_eq!(deal.value, Some(12_000.0));
        assert!(deal.is_open());

        let named = lead.to_deal(
            ConvertLeadRequest {
                name: Some("Scanner rollout".into()),
                value: Some(15_000.0),
                ..Default::default()
            },
            now,
        );
        assert_eq!(named.name, "Scanner rollout");
        assert_eq!(named.value, Some(15_000.0));
    }
}
