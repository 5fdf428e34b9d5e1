//! Tasks, events, calls, emails and meetings attached to CRM records.
//!
//! All kinds share one table. `/api/activities/tasks` and
//! `/api/activities/events` are views over it that pin the kind, while
//! `/api/activities/activities` sees every kind.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
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
use crate::core::shared::schema::crm_activities;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{non_blank, run_blocking};
use crate::crm::{ensure_account, ensure_contact, ensure_deal, ensure_lead};
use crate::security::auth_api::AuthenticatedUser;
use crate::security::validation::Validator;

pub const ACTIVITY_KINDS: &[&str] = &["task", "event", "call", "email", "meeting"];
pub const ACTIVITY_STATUSES: &[&str] = &["open", "in_progress", "completed", "cancelled"];
pub const PRIORITIES: &[&str] = &["low", "normal", "high", "urgent"];

/// Which kinds a collection endpoint works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityScope {
    All,
    Tasks,
    Events,
}

impl ActivityScope {
    pub fn kinds(self) -> &'static [&'static str] {
        match self {
            Self::All => ACTIVITY_KINDS,
            Self::Tasks => &["task"],
            Self::Events => &["event", "meeting"],
        }
    }

    fn default_kind(self) -> Option<&'static str> {
        match self {
            Self::All => None,
            Self::Tasks => Some("task"),
            Self::Events => Some("event"),
        }
    }

    /// Resolves the kind of a new activity posted to this collection.
    pub fn kind_for(self, requested: Option<&str>) -> Result<String, ApiError> {
        let kind = match (requested, self.default_kind()) {
            (Some(kind), _) => kind.trim().to_lowercase(),
            (None, Some(kind)) => kind.to_string(),
            (None, None) => return Err(ApiError::validation("kind is required")),
        };
        if self.kinds().contains(&kind.as_str()) {
            Ok(kind)
        } else {
            Err(ApiError::validation(format!(
                "kind must be one of {}",
                self.kinds().join(", ")
            )))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crm_activities)]
#[diesel(treat_none_as_null = true)]
pub struct Activity {
    pub id: Uuid,
    pub org_id: Uuid,
    pub kind: String,
    pub subject: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: String,
    pub due_date: Option<DateTime<Utc>>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub account_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub lead_id: Option<Uuid>,
    pub deal_id: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcome: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Activity {
    pub fn is_done(&self) -> bool {
        matches!(self.status.as_str(), "completed" | "cancelled")
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_done() && self.due_date.is_some_and(|due| due < now)
    }

    fn validate(&self) -> Result<(), ApiError> {
        Validator::new()
            .length(self.subject.trim(), "subject", Some(1), Some(255))
            .one_of(&self.kind, "kind", ACTIVITY_KINDS)
            .one_of(&self.status, "status", ACTIVITY_STATUSES)
            .one_of(&self.priority, "priority", PRIORITIES)
            .validate()?;
        if matches!(self.kind.as_str(), "event" | "meeting") && self.start_at.is_none() {
            return Err(ApiError::validation("Events and meetings need start_at"));
        }
        if let (Some(start), Some(end)) = (self.start_at, self.end_at) {
            if end < start {
                return Err(ApiError::validation("end_at must not be before start_at"));
            }
        }
        Ok(())
    }

    /// Keeps `completed_at` in step with the status.
    fn sync_completion(&mut self, now: DateTime<Utc>) {
        if self.status == "completed" {
            self.completed_at.get_or_insert(now);
        } else {
            self.completed_at = None;
        }
    }
}

impl Listable for Activity {
    const SEARCH_FIELDS: &'static [&'static str] =
        &["subject", "description", "location", "kind", "status", "outcome"];
    const SORT_FIELDS: &'static [&'static str] = &[
        "subject",
        "kind",
        "status",
        "priority",
        "due_date",
        "start_at",
        "completed_at",
        "created_at",
        "updated_at",
    ];
}

impl Editable for Activity {
    const ENTITY: &'static str = "Activity";
    const TABS: &'static [TabSpec] = &[
        TabSpec {
            name: "General",
            fields: &["kind", "subject", "status", "priority", "assigned_to", "description"],
        },
        TabSpec {
            name: "Schedule",
            fields: &["due_date", "start_at", "end_at", "location"],
        },
        TabSpec {
            name: "Related",
            fields: &["account_id", "contact_id", "lead_id", "deal_id"],
        },
        TabSpec {
            name: "Outcome",
            fields: &["completed_at", "outcome"],
        },
    ];
    const EDITABLE_FIELDS: &'static [&'static str] = &[
        "subject",
        "description",
        "status",
        "priority",
        "due_date",
        "start_at",
        "end_at",
        "location",
        "account_id",
        "contact_id",
        "lead_id",
        "deal_id",
        "assigned_to",
        "outcome",
    ];
    const REQUIRED_FIELDS: &'static [&'static str] = &["subject", "status", "priority"];

    fn record_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateActivityRequest {
    pub kind: Option<String>,
    pub subject: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub account_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub lead_id: Option<Uuid>,
    pub deal_id: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
}

impl CreateActivityRequest {
    fn into_activity(self, kind: String, org_id: Uuid, owner: Uuid) -> Activity {
        let now = Utc::now();
        let mut activity = Activity {
            id: Uuid::new_v4(),
            org_id,
            kind,
            subject: self.subject.trim().to_string(),
            description: non_blank(self.description),
            status: self.status.unwrap_or_else(|| "open".to_string()),
            priority: self.priority.unwrap_or_else(|| "normal".to_string()),
            due_date: self.due_date,
            start_at: self.start_at,
            end_at: self.end_at,
            location: non_blank(self.location),
            account_id: self.account_id,
            contact_id: self.contact_id,
            lead_id: self.lead_id,
            deal_id: self.deal_id,
            assigned_to: self.assigned_to.or(Some(owner)),
            owner_id: Some(owner),
            completed_at: None,
            outcome: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        activity.sync_completion(now);
        activity
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ActivityFilters {
    pub kind: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assigned_to: Option<Uuid>,
    pub account_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub lead_id: Option<Uuid>,
    pub deal_id: Option<Uuid>,
    /// Only activities assigned to the caller.
    pub mine: Option<bool>,
    pub overdue: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteActivityRequest {
    pub outcome: Option<String>,
}

pub fn configure_activity_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/activities/activities",
            get(list_all).post(create_any),
        )
        .route("/api/activities/tasks", get(list_tasks).post(create_task))
        .route("/api/activities/events", get(list_events).post(create_event))
        .route(
            "/api/activities/activities/{id}",
            get(get_activity)
                .put(update_activity)
                .patch(update_activity)
                .delete(delete_activity),
        )
        .route(
            "/api/activities/activities/{id}/complete",
            post(complete_activity),
        )
        .route(
            "/api/activities/activities/{id}/detail",
            get(get_activity_detail),
        )
        .route("/api/activities/activities/{id}/form", get(get_activity_form))
}

pub(crate) fn load_activity(
    conn: &mut PgConnection,
    org_id: Uuid,
    id: Uuid,
) -> Result<Activity, ApiError> {
    crm_activities::table
        .filter(crm_activities::id.eq(id))
        .filter(crm_activities::org_id.eq(org_id))
        .filter(crm_activities::deleted_at.is_null())
        .select(Activity::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Activity"))
}

fn check_relations(conn: &mut PgConnection, activity: &Activity) -> Result<(), ApiError> {
    ensure_account(conn, activity.org_id, activity.account_id)?;
    ensure_contact(conn, activity.org_id, activity.contact_id)?;
    ensure_lead(conn, activity.org_id, activity.lead_id)?;
    ensure_deal(conn, activity.org_id, activity.deal_id)
}

async fn list_scoped(
    state: Arc<AppState>,
    user: AuthenticatedUser,
    scope: ActivityScope,
    params: ListParams,
    filters: ActivityFilters,
) -> Result<Json<ListResponse<Activity>>, ApiError> {
    let org_id = user.org_id()?;
    let caller = user.user_id;
    let kinds: Vec<&'static str> = match filters.kind.as_deref() {
        Some(kind) => {
            let kind = scope.kind_for(Some(kind))?;
            scope.kinds().iter().copied().filter(|k| *k == kind).collect()
        }
        None => scope.kinds().to_vec(),
    };
    let rows = run_blocking(&state.conn, move |conn| {
        let mut query = crm_activities::table
            .filter(crm_activities::org_id.eq(org_id))
            .filter(crm_activities::deleted_at.is_null())
            .filter(crm_activities::kind.eq_any(kinds))
            .select(Activity::as_select())
            .order(crm_activities::created_at.asc())
            .into_boxed();
        if let Some(status) = filters.status {
            query = query.filter(crm_activities::status.eq(status));
        }
        if let Some(priority) = filters.priority {
            query = query.filter(crm_activities::priority.eq(priority));
        }
        if filters.mine.unwrap_or(false) {
            query = query.filter(crm_activities::assigned_to.eq(caller));
        } else if let Some(assignee) = filters.assigned_to {
            query = query.filter(crm_activities::assigned_to.eq(assignee));
        }
        if let Some(account) = filters.account_id {
            query = query.filter(crm_activities::account_id.eq(account));
        }
        if let Some(contact) = filters.contact_id {
            query = query.filter(crm_activities::contact_id.eq(contact));
        }
        if let Some(lead) = filters.lead_id {
            query = query.filter(crm_activities::lead_id.eq(lead));
        }
        if let Some(deal) = filters.deal_id {
            query = query.filter(crm_activities::deal_id.eq(deal));
        }
        let mut rows = query.load::<Activity>(conn)?;
        if filters.overdue.unwrap_or(false) {
            let now = Utc::now();
            rows.retain(|a| a.is_overdue(now));
        }
        Ok(rows)
    })
    .await?;
    Ok(Json(listing::apply(rows, &params)?))
}

async fn create_scoped(
    state: Arc<AppState>,
    user: AuthenticatedUser,
    scope: ActivityScope,
    req: CreateActivityRequest,
) -> Result<(StatusCode, Json<Activity>), ApiError> {
    let org_id = user.org_id()?;
    let kind = scope.kind_for(req.kind.as_deref())?;
    let activity = req.into_activity(kind, org_id, user.user_id);
    activity.validate()?;
    let created = run_blocking(&state.conn, move |conn| {
        check_relations(conn, &activity)?;
        Ok(diesel::insert_into(crm_activities::table)
            .values(&activity)
            .returning(Activity::as_returning())
            .get_result(conn)?)
    })
    .await?;
    info!(
        "{} '{}' created by {}",
        created.kind, created.subject, user.username
    );
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_all(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(params): Query<ListParams>,
    Query(filters): Query<ActivityFilters>,
) -> Result<Json<ListResponse<Activity>>, ApiError> {
    list_scoped(state, user, ActivityScope::All, params, filters).await
}

pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(params): Query<ListParams>,
    Query(filters): Query<ActivityFilters>,
) -> Result<Json<ListResponse<Activity>>, ApiError> {
    list_scoped(state, user, ActivityScope::Tasks, params, filters).await
}

pub async fn list_events(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(params): Query<ListParams>,
    Query(filters): Query<ActivityFilters>,
) -> Result<Json<ListResponse<Activity>>, ApiError> {
    list_scoped(state, user, ActivityScope::Events, params, filters).await
}

pub async fn create_any(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateActivityRequest>,
) -> Result<(StatusCode, Json<Activity>), ApiError> {
    create_scoped(state, user, ActivityScope::All, req).await
}

pub async fn create_task(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateActivityRequest>,
) -> Result<(StatusCode, Json<Activity>), ApiError> {
    create_scoped(state, user, ActivityScope::Tasks, req).await
}

pub async fn create_event(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateActivityRequest>,
) -> Result<(StatusCode, Json<Activity>), ApiError> {
    create_scoped(state, user, ActivityScope::Events, req).await
}

pub async fn get_activity(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Activity>, ApiError> {
    let org_id = user.org_id()?;
    let activity = run_blocking(&state.conn, move |conn| load_activity(conn, org_id, id)).await?;
    Ok(Json(activity))
}

pub async fn get_activity_detail(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DetailView>, ApiError> {
    let org_id = user.org_id()?;
    let activity = run_blocking(&state.conn, move |conn| load_activity(conn, org_id, id)).await?;
    Ok(Json(DetailView::build(&activity)?))
}

pub async fn get_activity_form(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<EditForm>, ApiError> {
    let org_id = user.org_id()?;
    let activity = run_blocking(&state.conn, move |conn| load_activity(conn, org_id, id)).await?;
    Ok(Json(EditForm::prepopulate(&activity)?))
}

pub async fn update_activity(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(input): Json<Map<String, Value>>,
) -> Result<Json<Activity>, ApiError> {
    let org_id = user.org_id()?;
    let updated = run_blocking(&state.conn, move |conn| {
        let current = load_activity(conn, org_id, id)?;
        let (mut updated, changes) = detail::submit(&current, input)?;
        if changes.is_empty() {
            return Ok(current);
        }
        let now = Utc::now();
        updated.subject = updated.subject.trim().to_string();
        updated.sync_completion(now);
        updated.validate()?;
        if ["account_id", "contact_id", "lead_id", "deal_id"]
            .iter()
            .any(|f| changes.contains_key(*f))
        {
            check_relations(conn, &updated)?;
        }
        updated.updated_at = now;
        Ok(diesel::update(crm_activities::table.find(id))
            .set(&updated)
            .returning(Activity::as_returning())
            .get_result(conn)?)
    })
    .await?;
    Ok(Json(updated))
}

pub async fn complete_activity(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    body: Option<Json<CompleteActivityRequest>>,
) -> Result<Json<Activity>, ApiError> {
    let org_id = user.org_id()?;
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let completed = run_blocking(&state.conn, move |conn| {
        let activity = load_activity(conn, org_id, id)?;
        if activity.is_done() {
            return Err(ApiError::Conflict(format!(
                "Activity is already {}",
                activity.status
            )));
        }
        let now = Utc::now();
        Ok(diesel::update(crm_activities::table.find(id))
            .set((
                crm_activities::status.eq("completed"),
                crm_activities::completed_at.eq(Some(now)),
                crm_activities::outcome.eq(non_blank(req.outcome).or(activity.outcome)),
                crm_activities::updated_at.eq(now),
            ))
            .returning(Activity::as_returning())
            .get_result(conn)?)
    })
    .await?;
    info!("Activity {} completed by {}", completed.id, user.username);
    Ok(Json(completed))
}

pub async fn delete_activity(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let org_id = user.org_id()?;
    run_blocking(&state.conn, move |conn| {
        load_activity(conn, org_id, id)?;
        diesel::update(crm_activities::table.find(id))
            .set(crm_activities::deleted_at.eq(Some(Utc::now())))
            .execute(conn)?;
        Ok(())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn task(subject: &str) -> Activity {
        CreateActivityRequest {
            subject: subject.into(),
            ..Default::default()
        }
        .into_activity("task".into(), Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn test_scope_kinds() {
        assert_eq!(ActivityScope::Tasks.kind_for(None).expect("kind"), "task");
        assert_eq!(ActivityScope::Events.kind_for(None).expect("kind"), "event");
        assert_eq!(
            ActivityScope::Events.kind_for(Some("Meeting")).expect("kind"),
            "meeting"
        );
        assert!(ActivityScope::Tasks.kind_for(Some("call")).is_err());
        assert!(ActivityScope::All.kind_for(None).is_err());
        assert_eq!(ActivityScope::All.kind_for(Some("call")).expect("kind"), "call");
    }

    #[test]
    fn test_new_task_defaults() {
        let t = task("Send proposal");
        assert_eq!(t.status, "open");
        assert_eq!(t.priority, "normal");
        assert_eq!(t.assigned_to, t.owner_id);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_events_need_a_start() {
        let mut event = task("Demo");
        event.kind = "event".into();
        assert!(event.validate().is_err());

        let start = Utc::now();
        event.start_at = Some(start);
        event.end_at = Some(start - Duration::hours(1));
        assert!(event.validate().is_err());
        event.end_at = Some(start + Duration::hours(1));
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_overdue() {
        let now = Utc::now();
        let mut t = task("Call back");
        assert!(!t.is_overdue(now));
        t.due_date = Some(now - Duration::days(1));
        assert!(t.is_overdue(now));
        t.status = "completed".into();
        assert!(!t.is_overdue(now));
    }

    #[test]
    fn test_completion_follows_status() {
        let now = Utc::now();
        let t = task("Follow up");
        let mut input = Map::new();
        input.insert("status".into(), json!("completed"));
        let (mut done, _) = detail::submit(&t, input).expect("submit");
        done.sync_completion(now);
        assert_eq!(done.completed_at, Some(now));

        done.status = "open".into();
        done.sync_completion(now);
        assert!(done.completed_at.is_none());
    }

    #[test]
    fn test_kind_is_read_only() {
        let t = task("x");
        let mut input = Map::new();
        input.insert("kind".into(), json!("call"));
        assert!(detail::submit(&t, input).is_err());
    }
}
