use axum::{extract::State, Json};
use chrono::Utc;
use diesel::prelude::*;
use std::sync::Arc;
use uuid::Uuid;

use crate::activities::Activity;
use crate::core::shared::error::ApiError;
use crate::core::shared::schema::{crm_accounts, crm_activities, crm_contacts, crm_leads, products};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::run_blocking;
use crate::crm::deals::load_org_deals;
use crate::crm::pipeline::{default_stages, load_stages};
use crate::dashboards::types::{DashboardInputs, DashboardSummary, RecordTotals};
use crate::sales::invoices::load_org_invoices;
use crate::security::auth_api::AuthenticatedUser;

fn record_totals(conn: &mut PgConnection, org_id: Uuid) -> QueryResult<RecordTotals> {
    let accounts = crm_accounts::table
        .filter(crm_accounts::org_id.eq(org_id))
        .filter(crm_accounts::deleted_at.is_null())
        .count()
        .get_result(conn)?;
    let contacts = crm_contacts::table
        .filter(crm_contacts::org_id.eq(org_id))
        .filter(crm_contacts::deleted_at.is_null())
        .count()
        .get_result(conn)?;
    let leads = crm_leads::table
        .filter(crm_leads::org_id.eq(org_id))
        .filter(crm_leads::deleted_at.is_null())
        .count()
        .get_result(conn)?;
    let open_leads = crm_leads::table
        .filter(crm_leads::org_id.eq(org_id))
        .filter(crm_leads::deleted_at.is_null())
        .filter(crm_leads::status.ne_all(vec!["converted", "unqualified"]))
        .count()
        .get_result(conn)?;
    let products = products::table
        .filter(products::org_id.eq(org_id))
        .filter(products::deleted_at.is_null())
        .count()
        .get_result(conn)?;
    Ok(RecordTotals {
        accounts,
        contacts,
        leads,
        open_leads,
        products,
    })
}

/// Pipeline stage names in order, the built-in pipeline when the company has
/// not configured one.
fn stage_order(conn: &mut PgConnection, org_id: Uuid) -> QueryResult<Vec<String>> {
    let mut stages = load_stages(conn, org_id)?;
    if stages.is_empty() {
        stages = default_stages(org_id);
    }
    Ok(stages.into_iter().map(|s| s.name).collect())
}

pub async fn handle_get_summary(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<DashboardSummary>, ApiError> {
    let org_id = user.org_id()?;
    let user_id = user.user_id;
    let summary = run_blocking(&state.conn, move |conn| {
        let totals = record_totals(conn, org_id)?;
        let stage_order = stage_order(conn, org_id)?;
        let deals = load_org_deals(conn, org_id)?;
        let activities = crm_activities::table
            .filter(crm_activities::org_id.eq(org_id))
            .filter(crm_activities::deleted_at.is_null())
            .select(Activity::as_select())
            .load::<Activity>(conn)?;
        let invoices = load_org_invoices(conn, org_id)?;

        let inputs = DashboardInputs {
            totals,
            stage_order: &stage_order,
            deals: &deals,
            activities: &activities,
            invoices: &invoices,
        };
        Ok(DashboardSummary::compute(inputs, user_id, Utc::now()))
    })
    .await?;
    Ok(Json(summary))
}
