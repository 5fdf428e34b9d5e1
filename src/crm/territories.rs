use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get},
    Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::shared::detail::{self, DetailView, EditForm, Editable, TabSpec};
use crate::core::shared::error::ApiError;
use crate::core::shared::listing::{self, ListParams, ListResponse, Listable};
use crate::core::shared::schema::{crm_accounts, crm_territories};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{non_blank, run_blocking};
use crate::crm::accounts::{load_account, Account};
use crate::crm::ensure_territory;
use crate::security::auth_api::AuthenticatedUser;
use crate::security::validation::Validator;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crm_territories)]
#[diesel(treat_none_as_null = true)]
pub struct Territory {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub region: Option<String>,
    pub parent_id: Option<Uuid>,
    pub manager_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Listable for Territory {
    const SEARCH_FIELDS: &'static [&'static str] = &["name", "description", "region"];
    const SORT_FIELDS: &'static [&'static str] =
        &["name", "region", "is_active", "created_at", "updated_at"];
}

impl Editable for Territory {
    const ENTITY: &'static str = "Territory";
    const TABS: &'static [TabSpec] = &[
        TabSpec {
            name: "General",
            fields: &["name", "region", "parent_id", "manager_id", "is_active"],
        },
        TabSpec {
            name: "Notes",
            fields: &["description"],
        },
        TabSpec {
            name: "System",
            fields: &["id", "created_at", "updated_at"],
        },
    ];
    const EDITABLE_FIELDS: &'static [&'static str] =
        &["name", "description", "region", "parent_id", "manager_id", "is_active"];
    const REQUIRED_FIELDS: &'static [&'static str] = &["name"];

    fn record_id(&self) -> Uuid {
        self.id
    }
}

/// Fails if making `parent` the parent of `territory` would close a loop.
/// `parents` maps every territory of the company to its current parent.
pub fn check_parent_chain(
    territory: Uuid,
    parent: Option<Uuid>,
    parents: &HashMap<Uuid, Option<Uuid>>,
) -> Result<(), ApiError> {
    let mut cursor = parent;
    let mut steps = 0usize;
    while let Some(current) = cursor {
        if current == territory {
            return Err(ApiError::validation(
                "A territory cannot be its own ancestor",
            ));
        }
        steps += 1;
        if steps > parents.len() {
            // an existing loop that does not pass through `territory`
            return Err(ApiError::validation("Territory hierarchy contains a cycle"));
        }
        cursor = parents.get(&current).copied().flatten();
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateTerritoryRequest {
    pub name: String,
    pub description: Option<String>,
    pub region: Option<String>,
    pub parent_id: Option<Uuid>,
    pub manager_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TerritoryFilters {
    pub region: Option<String>,
    pub parent_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct AssignAccountsRequest {
    pub account_ids: Vec<Uuid>,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/crm/territories",
            get(list_territories).post(create_territory),
        )
        .route(
            "/api/crm/territories/{id}",
            get(get_territory)
                .put(update_territory)
                .patch(update_territory)
                .delete(delete_territory),
        )
        .route("/api/crm/territories/{id}/detail", get(get_territory_detail))
        .route("/api/crm/territories/{id}/form", get(get_territory_form))
        .route(
            "/api/crm/territories/{id}/accounts",
            get(list_territory_accounts).post(assign_accounts),
        )
        .route(
            "/api/crm/territories/{id}/accounts/{account_id}",
            delete(unassign_account),
        )
}

fn load_territory(conn: &mut PgConnection, org_id: Uuid, id: Uuid) -> Result<Territory, ApiError> {
    crm_territories::table
        .filter(crm_territories::id.eq(id))
        .filter(crm_territories::org_id.eq(org_id))
        .filter(crm_territories::deleted_at.is_null())
        .select(Territory::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Territory"))
}

fn parent_map(conn: &mut PgConnection, org_id: Uuid) -> QueryResult<HashMap<Uuid, Option<Uuid>>> {
    let rows: Vec<(Uuid, Option<Uuid>)> = crm_territories::table
        .filter(crm_territories::org_id.eq(org_id))
        .filter(crm_territories::deleted_at.is_null())
        .select((crm_territories::id, crm_territories::parent_id))
        .load(conn)?;
    Ok(rows.into_iter().collect())
}

fn validate_name(name: &str) -> Result<(), ApiError> {
    Ok(Validator::new()
        .length(name, "name", Some(1), Some(255))
        .validate()?)
}

pub async fn list_territories(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(params): Query<ListParams>,
    Query(filters): Query<TerritoryFilters>,
) -> Result<Json<ListResponse<Territory>>, ApiError> {
    let org_id = user.org_id()?;
    let rows = run_blocking(&state.conn, move |conn| {
        let mut query = crm_territories::table
            .filter(crm_territories::org_id.eq(org_id))
            .filter(crm_territories::deleted_at.is_null())
            .select(Territory::as_select())
            .order(crm_territories::created_at.asc())
            .into_boxed();
        if let Some(region) = filters.region {
            query = query.filter(crm_territories::region.eq(region));
        }
        if let Some(parent) = filters.parent_id {
            query = query.filter(crm_territories::parent_id.eq(parent));
        }
        if let Some(active) = filters.is_active {
            query = query.filter(crm_territories::is_active.eq(active));
        }
        Ok(query.load::<Territory>(conn)?)
    })
    .await?;
    Ok(Json(listing::apply(rows, &params)?))
}

pub async fn create_territory(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateTerritoryRequest>,
) -> Result<(StatusCode, Json<Territory>), ApiError> {
    let org_id = user.org_id()?;
    let name = req.name.trim().to_string();
    validate_name(&name)?;
    let created = run_blocking(&state.conn, move |conn| {
        ensure_territory(conn, org_id, req.parent_id)?;
        let now = Utc::now();
        let territory = Territory {
            id: Uuid::new_v4(),
            org_id,
            name,
            description: non_blank(req.description),
            region: non_blank(req.region),
            parent_id: req.parent_id,
            manager_id: req.manager_id,
            is_active: req.is_active.unwrap_or(true),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        Ok(diesel::insert_into(crm_territories::table)
            .values(&territory)
            .returning(Territory::as_returning())
            .get_result(conn)?)
    })
    .await?;
    info!("Territory {} created by {}", created.name, user.username);
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_territory(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Territory>, ApiError> {
    let org_id = user.org_id()?;
    let territory = run_blocking(&state.conn, move |conn| load_territory(conn, org_id, id)).await?;
    Ok(Json(territory))
}

pub async fn get_territory_detail(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DetailView>, ApiError> {
    let org_id = user.org_id()?;
    let territory = run_blocking(&state.conn, move |conn| load_territory(conn, org_id, id)).await?;
    Ok(Json(DetailView::build(&territory)?))
}

pub async fn get_territory_form(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<EditForm>, ApiError> {
    let org_id = user.org_id()?;
    let territory = run_blocking(&state.conn, move |conn| load_territory(conn, org_id, id)).await?;
    Ok(Json(EditForm::prepopulate(&territory)?))
}

pub async fn update_territory(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(input): Json<Map<String, Value>>,
) -> Result<Json<Territory>, ApiError> {
    let org_id = user.org_id()?;
    let updated = run_blocking(&state.conn, move |conn| {
        let current = load_territory(conn, org_id, id)?;
        let (mut updated, changes) = detail::submit(&current, input)?;
        if changes.is_empty() {
            return Ok(current);
        }
        updated.name = updated.name.trim().to_string();
        validate_name(&updated.name)?;
        if changes.contains_key("parent_id") {
            ensure_territory(conn, org_id, updated.parent_id)?;
            check_parent_chain(id, updated.parent_id, &parent_map(conn, org_id)?)?;
        }
        updated.updated_at = Utc::now();
        Ok(diesel::update(crm_territories::table.find(id))
            .set(&updated)
            .returning(Territory::as_returning())
            .get_result(conn)?)
    })
    .await?;
    Ok(Json(updated))
}

/// Soft-deletes the territory. Its children move up to its parent and its
/// accounts become unassigned.
pub async fn delete_territory(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let org_id = user.org_id()?;
    run_blocking(&state.conn, move |conn| {
        let territory = load_territory(conn, org_id, id)?;
        let now = Utc::now();
        conn.transaction::<_, ApiError, _>(|conn| {
            diesel::update(crm_territories::table.filter(crm_territories::parent_id.eq(id)))
                .set((
                    crm_territories::parent_id.eq(territory.parent_id),
                    crm_territories::updated_at.eq(now),
                ))
                .execute(conn)?;
            diesel::update(crm_accounts::table.filter(crm_accounts::territory_id.eq(id)))
                .set(crm_accounts::territory_id.eq(None::<Uuid>))
                .execute(conn)?;
            diesel::update(crm_territories::table.find(id))
                .set(crm_territories::deleted_at.eq(Some(now)))
                .execute(conn)?;
            Ok(())
        })
    })
    .await?;
    info!("Territory {id} deleted by {}", user.username);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_territory_accounts(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse<Account>>, ApiError> {
    let org_id = user.org_id()?;
    let rows = run_blocking(&state.conn, move |conn| {
        load_territory(conn, org_id, id)?;
        Ok(crm_accounts::table
            .filter(crm_accounts::territory_id.eq(id))
            .filter(crm_accounts::org_id.eq(org_id))
            .filter(crm_accounts::deleted_at.is_null())
            .order(crm_accounts::created_at.asc())
            .select(Account::as_select())
            .load(conn)?)
    })
    .await?;
    Ok(Json(listing::apply(rows, &params)?))
}

pub async fn assign_accounts(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignAccountsRequest>,
) -> Result<Json<Vec<Account>>, ApiError> {
    let org_id = user.org_id()?;
    if req.account_ids.is_empty() {
        return Err(ApiError::validation("account_ids must not be empty"));
    }
    let assigned = run_blocking(&state.conn, move |conn| {
        load_territory(conn, org_id, id)?;
        conn.transaction::<_, ApiError, _>(|conn| {
            let now = Utc::now();
            let mut assigned = Vec::with_capacity(req.account_ids.len());
            for &account_id in &req.account_ids {
                load_account(conn, org_id, account_id)?;
                let account: Account = diesel::update(crm_accounts::table.find(account_id))
                    .set((
                        crm_accounts::territory_id.eq(Some(id)),
                        crm_accounts::updated_at.eq(now),
                    ))
                    .returning(Account::as_returning())
                    .get_result(conn)?;
                assigned.push(account);
            }
            Ok(assigned)
        })
    })
    .await?;
    info!(
        "{} accounts assigned to territory {id} by {}",
        assigned.len(),
        user.username
    );
    Ok(Json(assigned))
}

pub async fn unassign_account(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path((id, account_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let org_id = user.org_id()?;
    run_blocking(&state.conn, move |conn| {
        load_territory(conn, org_id, id)?;
        let account = load_account(conn, org_id, account_id)?;
        if account.territory_id != Some(id) {
            return Err(ApiError::not_found("Account in this territory"));
        }
        diesel::update(crm_accounts::table.find(account_id))
            .set((
                crm_accounts::territory_id.eq(None::<Uuid>),
                crm_accounts::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;
        Ok(())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_chain_accepts_tree() {
        let (emea, dach, berlin) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let parents = HashMap::from([(emea, None), (dach, Some(emea)), (berlin, Some(dach))]);
        assert!(check_parent_chain(berlin, Some(dach), &parents).is_ok());
        assert!(check_parent_chain(dach, None, &parents).is_ok());
    }

    #[test]
    fn test_parent_chain_rejects_cycles() {
        let (emea, dach, berlin) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let parents = HashMap::from([(emea, None), (dach, Some(emea)), (berlin, Some(dach))]);
        assert!(check_parent_chain(emea, Some(berlin), &parents).is_err());
        assert!(check_parent_chain(dach, Some(dach), &parents).is_err());
    }

    #[test]
    fn test_parent_chain_detects_existing_loop() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let parents = HashMap::from([(a, Some(b)), (b, Some(a)), (c, None)]);
        assert!(check_parent_chain(c, Some(a), &parents).is_err());
    }
}
