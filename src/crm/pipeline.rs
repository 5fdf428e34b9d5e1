//! Deal pipeline stages and the probability tables for leads and deals.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use diesel::dsl::exists;
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::shared::error::ApiError;
use crate::core::shared::schema::{crm_deals, crm_pipeline_stages};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::run_blocking;
use crate::security::auth_api::AuthenticatedUser;
use crate::security::validation::Validator;

pub const LEAD_STATUSES: &[&str] = &["new", "contacted", "qualified", "unqualified", "converted"];

/// Win probability implied by a lead status.
pub fn lead_status_probability(status: &str) -> Option<i32> {
    match status {
        "new" => Some(10),
        "contacted" => Some(20),
        "qualified" => Some(40),
        "unqualified" => Some(0),
        "converted" => Some(100),
        _ => None,
    }
}

/// `(name, probability, is_won, is_lost, color)` of the stages every company starts with.
pub const DEFAULT_STAGES: &[(&str, i32, bool, bool, &str)] = &[
    ("qualification", 25, false, false, "#94a3b8"),
    ("proposal", 50, false, false, "#60a5fa"),
    ("negotiation", 75, false, false, "#f59e0b"),
    ("won", 100, true, false, "#22c55e"),
    ("lost", 0, false, true, "#ef4444"),
];

pub fn default_stage_probability(stage: &str) -> Option<i32> {
    DEFAULT_STAGES
        .iter()
        .find(|(name, ..)| *name == stage)
        .map(|(_, probability, ..)| *probability)
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Selectable, Insertable)]
#[diesel(table_name = crm_pipeline_stages)]
pub struct PipelineStage {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub stage_order: i32,
    pub probability: i32,
    pub is_won: bool,
    pub is_lost: bool,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Where a deal sits once its stage name has been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlacement {
    pub stage_id: Option<Uuid>,
    pub stage: String,
    pub probability: i32,
    pub won: Option<bool>,
}

impl StagePlacement {
    pub fn from_stage(stage: &PipelineStage) -> Self {
        let won = if stage.is_won {
            Some(true)
        } else if stage.is_lost {
            Some(false)
        } else {
            None
        };
        Self {
            stage_id: Some(stage.id),
            stage: stage.name.clone(),
            probability: stage.probability,
            won,
        }
    }
}

pub fn default_stages(org_id: Uuid) -> Vec<PipelineStage> {
    let now = Utc::now();
    DEFAULT_STAGES
        .iter()
        .enumerate()
        .map(|(i, (name, probability, is_won, is_lost, color))| PipelineStage {
            id: Uuid::new_v4(),
            org_id,
            name: (*name).to_string(),
            stage_order: i as i32 + 1,
            probability: *probability,
            is_won: *is_won,
            is_lost: *is_lost,
            color: Some((*color).to_string()),
            created_at: now,
        })
        .collect()
}

pub fn load_stages(conn: &mut PgConnection, org_id: Uuid) -> QueryResult<Vec<PipelineStage>> {
    crm_pipeline_stages::table
        .filter(crm_pipeline_stages::org_id.eq(org_id))
        .order((crm_pipeline_stages::stage_order.asc(), crm_pipeline_stages::name.asc()))
        .select(PipelineStage::as_select())
        .load(conn)
}

/// Resolves a stage name against the company pipeline, falling back to the
/// built-in stages when the company has none configured.
pub fn resolve_stage(
    conn: &mut PgConnection,
    org_id: Uuid,
    name: &str,
) -> Result<StagePlacement, ApiError> {
    let name = name.trim().to_lowercase();
    let stages = load_stages(conn, org_id)?;
    if let Some(stage) = stages.iter().find(|s| s.name.to_lowercase() == name) {
        return Ok(StagePlacement::from_stage(stage));
    }
    if stages.is_empty() {
        if let Some(probability) = default_stage_probability(&name) {
            let won = match name.as_str() {
                "won" => Some(true),
                "lost" => Some(false),
                _ => None,
            };
            return Ok(StagePlacement {
                stage_id: None,
                stage: name,
                probability,
                won,
            });
        }
    }
    let known: Vec<String> = if stages.is_empty() {
        DEFAULT_STAGES.iter().map(|(n, ..)| n.to_string()).collect()
    } else {
        stages.into_iter().map(|s| s.name).collect()
    };
    Err(ApiError::validation(format!(
        "Unknown pipeline stage '{name}'. Allowed: {}",
        known.join(", ")
    )))
}

#[derive(Debug, Deserialize)]
pub struct StageRequest {
    pub name: String,
    pub stage_order: Option<i32>,
    pub probability: i32,
    #[serde(default)]
    pub is_won: bool,
    #[serde(default)]
    pub is_lost: bool,
    pub color: Option<String>,
}

impl StageRequest {
    fn validate(&self) -> Result<(), ApiError> {
        Validator::new()
            .length(self.name.trim(), "name", Some(1), Some(100))
            .range(&self.probability, "probability", Some(&0), Some(&100))
            .validate()?;
        if self.is_won && self.is_lost {
            return Err(ApiError::validation("A stage cannot be both won and lost"));
        }
        Ok(())
    }
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/crm/pipeline/stages", get(list_stages).post(create_stage))
        .route(
            "/api/crm/pipeline/stages/{id}",
            get(get_stage)
                .put(update_stage)
                .patch(update_stage)
                .delete(delete_stage),
        )
}

fn load_stage(conn: &mut PgConnection, org_id: Uuid, id: Uuid) -> Result<PipelineStage, ApiError> {
    crm_pipeline_stages::table
        .filter(crm_pipeline_stages::id.eq(id))
        .filter(crm_pipeline_stages::org_id.eq(org_id))
        .select(PipelineStage::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Pipeline stage"))
}

pub async fn list_stages(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<PipelineStage>>, ApiError> {
    let org_id = user.org_id()?;
    let stages = run_blocking(&state.conn, move |conn| Ok(load_stages(conn, org_id)?)).await?;
    Ok(Json(stages))
}

pub async fn get_stage(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PipelineStage>, ApiError> {
    let org_id = user.org_id()?;
    let stage = run_blocking(&state.conn, move |conn| load_stage(conn, org_id, id)).await?;
    Ok(Json(stage))
}

pub async fn create_stage(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<StageRequest>,
) -> Result<(StatusCode, Json<PipelineStage>), ApiError> {
    let org_id = user.org_id()?;
    req.validate()?;
    let created = run_blocking(&state.conn, move |conn| {
        let next_order = match req.stage_order {
            Some(order) => order,
            None => {
                let max: Option<i32> = crm_pipeline_stages::table
                    .filter(crm_pipeline_stages::org_id.eq(org_id))
                    .select(diesel::dsl::max(crm_pipeline_stages::stage_order))
                    .first(conn)?;
                max.unwrap_or(0) + 1
            }
        };
        let stage = PipelineStage {
            id: Uuid::new_v4(),
            org_id,
            name: req.name.trim().to_lowercase(),
            stage_order: next_order,
            probability: req.probability,
            is_won: req.is_won,
            is_lost: req.is_lost,
            color: req.color,
            created_at: Utc::now(),
        };
        Ok(diesel::insert_into(crm_pipeline_stages::table)
            .values(&stage)
            .returning(PipelineStage::as_returning())
            .get_result(conn)?)
    })
    .await?;
    info!("Pipeline stage {} created by {}", created.name, user.username);
    Ok((StatusCode::CREATED, Json(created)))
}

/// Renaming a stage carries the open deals that sit in it along.
pub async fn update_stage(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<StageRequest>,
) -> Result<Json<PipelineStage>, ApiError> {
    let org_id = user.org_id()?;
    req.validate()?;
    let updated = run_blocking(&state.conn, move |conn| {
        let current = load_stage(conn, org_id, id)?;
        let name = req.name.trim().to_lowercase();
        conn.transaction::<_, ApiError, _>(|conn| {
            let saved: PipelineStage = diesel::update(crm_pipeline_stages::table.find(id))
                .set((
                    crm_pipeline_stages::name.eq(&name),
                    crm_pipeline_stages::stage_order
                        .eq(req.stage_order.unwrap_or(current.stage_order)),
                    crm_pipeline_stages::probability.eq(req.probability),
                    crm_pipeline_stages::is_won.eq(req.is_won),
                    crm_pipeline_stages::is_lost.eq(req.is_lost),
                    crm_pipeline_stages::color.eq(&req.color),
                ))
                .returning(PipelineStage::as_returning())
                .get_result(conn)?;
            diesel::update(
                crm_deals::table
                    .filter(crm_deals::stage_id.eq(id))
                    .filter(crm_deals::won.is_null()),
            )
            .set((
                crm_deals::stage.eq(&name),
                crm_deals::probability.eq(req.probability),
            ))
            .execute(conn)?;
            Ok(saved)
        })
    })
    .await?;
    Ok(Json(updated))
}

pub async fn delete_stage(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let org_id = user.org_id()?;
    run_blocking(&state.conn, move |conn| {
        load_stage(conn, org_id, id)?;
        let in_use: bool = diesel::select(exists(
            crm_deals::table
                .filter(crm_deals::stage_id.eq(id))
                .filter(crm_deals::deleted_at.is_null()),
        ))
        .get_result(conn)?;
        if in_use {
            return Err(ApiError::Conflict(
                "Pipeline stage still has deals; move them first".into(),
            ));
        }
        diesel::delete(crm_pipeline_stages::table.find(id)).execute(conn)?;
        Ok(())
    })
    .await?;
    info!("Pipeline stage {id} deleted by {}", user.username);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lead_status_probabilities() {
        assert_eq!(lead_status_probability("new"), Some(10));
        assert_eq!(lead_status_probability("contacted"), Some(20));
        assert_eq!(lead_status_probability("qualified"), Some(40));
        assert_eq!(lead_status_probability("unqualified"), Some(0));
        assert_eq!(lead_status_probability("archived"), None);
        assert!(LEAD_STATUSES
            .iter()
            .all(|s| lead_status_probability(s).is_some()));
    }

    #[test]
    fn test_default_stage_probabilities() {
        assert_eq!(default_stage_probability("qualification"), Some(25));
        assert_eq!(default_stage_probability("proposal"), Some(50));
        assert_eq!(default_stage_probability("negotiation"), Some(75));
        assert_eq!(default_stage_probability("won"), Some(100));
        assert_eq!(default_stage_probability("lost"), Some(0));
        assert_eq!(default_stage_probability("closed"), None);
    }

    #[test]
    fn test_default_stages_are_ordered() {
        let org = Uuid::new_v4();
        let stages = default_stages(org);
        assert_eq!(stages.len(), DEFAULT_STAGES.len());
        assert!(stages.windows(2).all(|w| w[0].stage_order < w[1].stage_order));
        assert!(stages.iter().all(|s| s.org_id == org));

        let won = StagePlacement::from_stage(&stages[3]);
        assert_eq!(won.won, Some(true));
        assert_eq!(won.probability, 100);
        let lost = StagePlacement::from_stage(&stages[4]);
        assert_eq!(lost.won, Some(false));
        let open = StagePlacement::from_stage(&stages[0]);
        assert_eq!(open.won, None);
    }

    #[test]
    fn test_stage_request_validation() {
        let req = StageRequest {
            name: "demo".into(),
            stage_order: None,
            probability: 60,
            is_won: false,
            is_lost: false,
            color: None,
        };
        assert!(req.validate().is_ok());
        assert!(StageRequest { probability: 101, ..req }.validate().is_err());

        let both = StageRequest {
            name: "odd".into(),
            stage_order: None,
            probability: 0,
            is_won: true,
            is_lost: true,
            color: None,
        };
        assert!(both.validate().is_err());
    }
}
