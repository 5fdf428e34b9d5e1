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
use crate::core::shared::schema::crm_deals;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{non_blank, run_blocking};
use crate::crm::pipeline::{resolve_stage, StagePlacement};
use crate::crm::{ensure_account, ensure_contact, ensure_lead, normalize_tags, unlink_dependents, Parent};
use crate::security::auth_api::AuthenticatedUser;
use crate::security::validation::Validator;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crm_deals)]
#[diesel(treat_none_as_null = true)]
pub struct Deal {
    pub id: Uuid,
    pub org_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub account_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub value: Option<f64>,
    pub currency: Option<String>,
    pub stage_id: Option<Uuid>,
    pub stage: String,
    pub probability: i32,
    pub source: Option<String>,
    pub expected_close_date: Option<NaiveDate>,
    pub actual_close_date: Option<NaiveDate>,
    pub won: Option<bool>,
    pub lost_reason: Option<String>,
    pub owner_id: Option<Uuid>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Deal {
    pub fn is_open(&self) -> bool {
        self.won.is_none()
    }

    /// Value weighted by the win probability.
    pub fn weighted_value(&self) -> f64 {
        self.value.unwrap_or(0.0) * f64::from(self.probability) / 100.0
    }

    /// Moves the deal to `placement`. Entering a closing stage stamps the
    /// close date, leaving one reopens the deal.
    pub fn place(&mut self, placement: StagePlacement, today: NaiveDate) {
        self.stage_id = placement.stage_id;
        self.stage = placement.stage;
        self.probability = placement.probability;
        match placement.won {
            Some(won) => {
                if self.won != Some(won) {
                    self.actual_close_date = Some(today);
                }
                self.won = Some(won);
                if won {
                    self.lost_reason = None;
                }
            }
            None => {
                self.won = None;
                self.actual_close_date = None;
                self.lost_reason = None;
            }
        }
    }

    fn validate(&self) -> Result<(), ApiError> {
        let mut v = Validator::new().length(self.name.trim(), "name", Some(1), Some(255));
        if let Some(currency) = self.currency.as_deref() {
            v = v.currency(currency);
        }
        if let Some(value) = self.value {
            v = v.range(&value, "value", Some(&0.0), None);
        }
        Ok(v.validate()?)
    }
}

impl Listable for Deal {
    const SEARCH_FIELDS: &'static [&'static str] =
        &["name", "description", "stage", "source", "tags"];
    const SORT_FIELDS: &'static [&'static str] = &[
        "name",
        "value",
        "stage",
        "probability",
        "expected_close_date",
        "actual_close_date",
        "created_at",
        "updated_at",
    ];
}

impl Editable for Deal {
    const ENTITY: &'static str = "Deal";
    const TABS: &'static [TabSpec] = &[
        TabSpec {
            name: "Overview",
            fields: &[
                "name",
                "stage",
                "probability",
                "value",
                "currency",
                "expected_close_date",
                "source",
                "tags",
            ],
        },
        TabSpec {
            name: "Relations",
            fields: &["account_id", "contact_id", "lead_id", "owner_id"],
        },
        TabSpec {
            name: "Outcome",
            fields: &["won", "actual_close_date", "lost_reason"],
        },
        TabSpec {
            name: "Notes",
            fields: &["description"],
        },
    ];
    const EDITABLE_FIELDS: &'static [&'static str] = &[
        "name",
        "description",
        "value",
        "currency",
        "stage",
        "source",
        "expected_close_date",
        "account_id",
        "contact_id",
        "owner_id",
        "tags",
    ];
    const REQUIRED_FIELDS: &'static [&'static str] = &["name", "stage"];

    fn record_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateDealRequest {
    pub name: String,
    pub description: Option<String>,
    pub value: Option<f64>,
    pub currency: Option<String>,
    pub stage: Option<String>,
    pub source: Option<String>,
    pub expected_close_date: Option<NaiveDate>,
    pub lead_id: Option<Uuid>,
    pub account_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CloseDealRequest {
    pub won: bool,
    pub actual_close_date: Option<NaiveDate>,
    pub lost_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DealFilters {
    pub stage: Option<String>,
    pub account_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    /// `true` keeps open deals, `false` closed ones.
    pub open: Option<bool>,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/crm/deals", get(list_deals).post(create_deal))
        .route(
            "/api/crm/deals/{id}",
            get(get_deal)
                .put(update_deal)
                .patch(update_deal)
                .delete(delete_deal),
        )
        .route("/api/crm/deals/{id}/detail", get(get_deal_detail))
        .route("/api/crm/deals/{id}/form", get(get_deal_form))
        .route("/api/crm/deals/{id}/close", post(close_deal))
}

pub(crate) fn load_deal(conn: &mut PgConnection, org_id: Uuid, id: Uuid) -> Result<Deal, ApiError> {
    crm_deals::table
        .filter(crm_deals::id.eq(id))
        .filter(crm_deals::org_id.eq(org_id))
        .filter(crm_deals::deleted_at.is_null())
        .select(Deal::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Deal"))
}

/// Open and closed deals of a company, oldest first.
pub(crate) fn load_org_deals(conn: &mut PgConnection, org_id: Uuid) -> QueryResult<Vec<Deal>> {
    crm_deals::table
        .filter(crm_deals::org_id.eq(org_id))
        .filter(crm_deals::deleted_at.is_null())
        .order(crm_deals::created_at.asc())
        .select(Deal::as_select())
        .load(conn)
}

fn check_relations(conn: &mut PgConnection, deal: &Deal) -> Result<(), ApiError> {
    ensure_account(conn, deal.org_id, deal.account_id)?;
    ensure_contact(conn, deal.org_id, deal.contact_id)?;
    ensure_lead(conn, deal.org_id, deal.lead_id)
}

pub async fn list_deals(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(params): Query<ListParams>,
    Query(filters): Query<DealFilters>,
) -> Result<Json<ListResponse<Deal>>, ApiError> {
    let org_id = user.org_id()?;
    let rows = run_blocking(&state.conn, move |conn| {
        let mut query = crm_deals::table
            .filter(crm_deals::org_id.eq(org_id))
            .filter(crm_deals::deleted_at.is_null())
            .select(Deal::as_select())
            .order(crm_deals::created_at.asc())
            .into_boxed();
        if let Some(stage) = filters.stage {
            query = query.filter(crm_deals::stage.eq(stage.to_lowercase()));
        }
        if let Some(account) = filters.account_id {
            query = query.filter(crm_deals::account_id.eq(account));
        }
        if let Some(contact) = filters.contact_id {
            query = query.filter(crm_deals::contact_id.eq(contact));
        }
        if let Some(owner) = filters.owner_id {
            query = query.filter(crm_deals::owner_id.eq(owner));
        }
        match filters.open {
            Some(true) => query = query.filter(crm_deals::won.is_null()),
            Some(false) => query = query.filter(crm_deals::won.is_not_null()),
            None => {}
        }
        Ok(query.load::<Deal>(conn)?)
    })
    .await?;
    Ok(Json(listing::apply(rows, &params)?))
}

pub async fn create_deal(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateDealRequest>,
) -> Result<(StatusCode, Json<Deal>), ApiError> {
    let org_id = user.org_id()?;
    let owner = user.user_id;
    let created = run_blocking(&state.conn, move |conn| {
        let placement = resolve_stage(conn, org_id, req.stage.as_deref().unwrap_or("qualification"))?;
        let now = Utc::now();
        let mut deal = Deal {
            id: Uuid::new_v4(),
            org_id,
            lead_id: req.lead_id,
            account_id: req.account_id,
            contact_id: req.contact_id,
            name: req.name.trim().to_string(),
            description: non_blank(req.description),
            value: req.value,
            currency: non_blank(req.currency).map(|c| c.to_uppercase()),
            stage_id: None,
            stage: String::new(),
            probability: 0,
            source: non_blank(req.source),
            expected_close_date: req.expected_close_date,
            actual_close_date: None,
            won: None,
            lost_reason: None,
            owner_id: req.owner_id.or(Some(owner)),
            tags: normalize_tags(req.tags),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        deal.place(placement, now.date_naive());
        deal.validate()?;
        check_relations(conn, &deal)?;
        Ok(diesel::insert_into(crm_deals::table)
            .values(&deal)
            .returning(Deal::as_returning())
            .get_result(conn)?)
    })
    .await?;
    info!("Deal {} created by {}", created.name, user.username);
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_deal(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Deal>, ApiError> {
    let org_id = user.org_id()?;
    let deal = run_blocking(&state.conn, move |conn| load_deal(conn, org_id, id)).await?;
    Ok(Json(deal))
}

pub async fn get_deal_detail(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DetailView>, ApiError> {
    let org_id = user.org_id()?;
    let deal = run_blocking(&state.conn, move |conn| load_deal(conn, org_id, id)).await?;
    Ok(Json(DetailView::build(&deal)?))
}

pub async fn get_deal_form(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<EditForm>, ApiError> {
    let org_id = user.org_id()?;
    let deal = run_blocking(&state.conn, move |conn| load_deal(conn, org_id, id)).await?;
    Ok(Json(EditForm::prepopulate(&deal)?))
}

pub async fn update_deal(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(input): Json<Map<String, Value>>,
) -> Result<Json<Deal>, ApiError> {
    let org_id = user.org_id()?;
    let updated = run_blocking(&state.conn, move |conn| {
        let current = load_deal(conn, org_id, id)?;
        let (mut updated, changes) = detail::submit(&current, input)?;
        if changes.is_empty() {
            return Ok(current);
        }
        let now = Utc::now();
        if changes.contains_key("stage") {
            let placement = resolve_stage(conn, org_id, &updated.stage)?;
            updated.place(placement, now.date_naive());
        }
        updated.name = updated.name.trim().to_string();
        updated.currency = non_blank(updated.currency).map(|c| c.to_uppercase());
        updated.tags = normalize_tags(updated.tags);
        updated.validate()?;
        if changes.contains_key("account_id") || changes.contains_key("contact_id") {
            check_relations(conn, &updated)?;
        }
        updated.updated_at = now;
        let saved: Deal = diesel::update(crm_deals::table.find(id))
            .set(&updated)
            .returning(Deal::as_returning())
            .get_result(conn)?;
        if current.stage != saved.stage {
            info!("Deal {} moved from {} to {}", saved.id, current.stage, saved.stage);
        }
        Ok(saved)
    })
    .await?;
    Ok(Json(updated))
}

pub async fn close_deal(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<CloseDealRequest>,
) -> Result<Json<Deal>, ApiError> {
    let org_id = user.org_id()?;
    let closed = run_blocking(&state.conn, move |conn| {
        let mut deal = load_deal(conn, org_id, id)?;
        if !deal.is_open() {
            return Err(ApiError::Conflict("Deal is already closed".into()));
        }
        let now = Utc::now();
        let placement = resolve_stage(conn, org_id, if req.won { "won" } else { "lost" })
            .unwrap_or_else(|_| StagePlacement {
                stage_id: None,
                stage: if req.won { "won" } else { "lost" }.to_string(),
                probability: if req.won { 100 } else { 0 },
                won: Some(req.won),
            });
        deal.place(
            StagePlacement {
                won: Some(req.won),
                ..placement
            },
            now.date_naive(),
        );
        if let Some(date) = req.actual_close_date {
            deal.actual_close_date = Some(date);
        }
        if !req.won {
            deal.lost_reason = non_blank(req.lost_reason);
        }
        deal.updated_at = now;
        Ok(diesel::update(crm_deals::table.find(id))
            .set(&deal)
            .returning(Deal::as_returning())
            .get_result(conn)?)
    })
    .await?;
    info!(
        "Deal {} closed as {} by {}",
        closed.name,
        if closed.won == Some(true) { "won" } else { "lost" },
        user.username
    );
    Ok(Json(closed))
}

pub async fn delete_deal(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let org_id = user.org_id()?;
    let detached = run_blocking(&state.conn, move |conn| {
        load_deal(conn, org_id, id)?;
        let now = Utc::now();
        conn.transaction::<_, ApiError, _>(|conn| {
            let detached = unlink_dependents(conn, Parent::Deal, id, now)?;
            diesel::update(crm_deals::table.find(id))
                .set(crm_deals::deleted_at.eq(Some(now)))
                .execute(conn)?;
            Ok(detached)
        })
    })
    .await?;
    info!(
        "Deal {id} deleted by {}, {detached} linked records detached",
        user.username
    );
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_deal() -> Deal {
        let now = Utc::now();
        Deal {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            lead_id: None,
            account_id: None,
            contact_id: None,
            name: "Fleet renewal".into(),
            description: None,
            value: Some(20_000.0),
            currency: Some("EUR".into()),
            stage_id: None,
            stage: "qualification".into(),
            probability: 25,
            source: None,
            expected_close_date: None,
            actual_close_date: None,
            won: None,
            lost_reason: None,
            owner_id: None,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn placement(stage: &str, probability: i32, won: Option<bool>) -> StagePlacement {
        StagePlacement {
            stage_id: None,
            stage: stage.into(),
            probability,
            won,
        }
    }

    #[test]
    fn test_weighted_value() {
        let deal = sample_deal();
        assert!((deal.weighted_value() - 5_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_place_into_closing_stage_and_back() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 14).expect("date");
        let mut deal = sample_deal();

        deal.place(placement("won", 100, Some(true)), today);
        assert_eq!(deal.won, Some(true));
        assert_eq!(deal.probability, 100);
        assert_eq!(deal.actual_close_date, Some(today));
        assert!(!deal.is_open());

        deal.place(placement("negotiation", 75, None), today);
        assert!(deal.is_open());
        assert_eq!(deal.actual_close_date, None);
        assert_eq!(deal.stage, "negotiation");
    }

    #[test]
    fn test_validation() {
        let mut deal = sample_deal();
        assert!(deal.validate().is_ok());
        deal.currency = Some("euro".into());
        assert!(deal.validate().is_err());
        let mut deal = sample_deal();
        deal.value = Some(-1.0);
        assert!(deal.validate().is_err());
    }

    #[test]
    fn test_outcome_fields_are_read_only() {
        let deal = sample_deal();
        let mut input = Map::new();
        input.insert("won".into(), serde_json::json!(true));
        assert!(detail::submit(&deal, input).is_err());
    }
}
