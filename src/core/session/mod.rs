//! Hydration payload for the client-side store and per-user UI flags.
//!
//! The frontend keeps a single store (signed-in user, current company, UI
//! flags) that is filled once on mount from `GET /api/session/state`. Flags
//! are persisted as a user preference so they survive across devices.

use axum::{
    extract::State,
    response::Json,
    routing::{get, put},
    Router,
};
use chrono::Utc;
use diesel::prelude::*;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::organization::{load_companies_for, load_company, CompanySummary};
use crate::core::shared::error::ApiError;
use crate::core::shared::models::{NewUserPreference, Organization};
use crate::core::shared::schema::user_preferences;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::run_blocking;
use crate::directory::auth_routes::CurrentUserResponse;
use crate::directory::identity::resolve_identity;
use crate::security::auth_api::AuthenticatedUser;

pub const UI_FLAGS_KEY: &str = "ui_flags";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiFlags {
    pub sidebar_collapsed: bool,
    pub theme: String,
    pub dense_tables: bool,
    pub show_onboarding: bool,
    /// Flags the server does not interpret, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for UiFlags {
    fn default() -> Self {
        Self {
            sidebar_collapsed: false,
            theme: "light".to_string(),
            dense_tables: false,
            show_onboarding: true,
            extra: Map::new(),
        }
    }
}

impl UiFlags {
    /// Reads stored flags, falling back to defaults for anything unreadable.
    pub fn from_stored(value: Option<Value>) -> Self {
        value
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// Writes `patch` over the current flags. Known flags keep their types.
    pub fn merge(&self, patch: Map<String, Value>) -> Result<Self, ApiError> {
        let mut current = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for (key, value) in patch {
            if value.is_null() {
                current.remove(&key);
            } else {
                current.insert(key, value);
            }
        }
        let merged: Self = serde_json::from_value(Value::Object(current))
            .map_err(|e| ApiError::validation(format!("Invalid UI flags: {e}")))?;
        if !matches!(merged.theme.as_str(), "light" | "dark" | "system") {
            return Err(ApiError::validation(
                "theme must be one of: light, dark, system",
            ));
        }
        Ok(merged)
    }
}

#[derive(Debug, Serialize)]
pub struct SessionState {
    pub user: CurrentUserResponse,
    pub company: Organization,
    pub companies: Vec<CompanySummary>,
    pub ui_flags: UiFlags,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/session/state", get(get_session_state))
        .route("/api/session/ui-flags", put(update_ui_flags).get(get_ui_flags))
}

fn load_flags(conn: &mut PgConnection, user_id: Uuid) -> QueryResult<UiFlags> {
    let stored: Option<Value> = user_preferences::table
        .filter(user_preferences::user_id.eq(user_id))
        .filter(user_preferences::preference_key.eq(UI_FLAGS_KEY))
        .select(user_preferences::preference_value)
        .first(conn)
        .optional()?;
    Ok(UiFlags::from_stored(stored))
}

fn save_flags(conn: &mut PgConnection, user_id: Uuid, flags: &UiFlags) -> Result<(), ApiError> {
    let value = serde_json::to_value(flags)
        .map_err(|e| ApiError::Internal(format!("Failed to encode UI flags: {e}")))?;
    let now = Utc::now();
    diesel::insert_into(user_preferences::table)
        .values(&NewUserPreference {
            id: Uuid::new_v4(),
            user_id,
            preference_key: UI_FLAGS_KEY.to_string(),
            preference_value: value.clone(),
            created_at: now,
            updated_at: now,
        })
        .on_conflict((user_preferences::user_id, user_preferences::preference_key))
        .do_update()
        .set((
            user_preferences::preference_value.eq(value),
            user_preferences::updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(())
}

pub async fn get_session_state(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<SessionState>, ApiError> {
    let org = user.organization_id;
    let user_id = user.user_id;
    let session = run_blocking(&state.conn, move |conn| {
        let identity = resolve_identity(conn, user_id, org)?;
        let company = load_company(conn, identity.organization_id)?;
        let companies = CompanySummary::list(
            load_companies_for(conn, user_id)?,
            Some(identity.organization_id),
        );
        let ui_flags = load_flags(conn, user_id)?;
        Ok(SessionState {
            user: CurrentUserResponse::from(&identity),
            company,
            companies,
            ui_flags,
        })
    })
    .await?;
    debug!("Hydrated session state for {}", user.username);
    Ok(Json(session))
}

pub async fn get_ui_flags(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<UiFlags>, ApiError> {
    let user_id = user.user_id;
    let flags = run_blocking(&state.conn, move |conn| Ok(load_flags(conn, user_id)?)).await?;
    Ok(Json(flags))
}

pub async fn update_ui_flags(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(patch): Json<Map<String, Value>>,
) -> Result<Json<UiFlags>, ApiError> {
    let user_id = user.user_id;
    let flags = run_blocking(&state.conn, move |conn| {
        let merged = load_flags(conn, user_id)?.merge(patch)?;
        save_flags(conn, user_id, &merged)?;
        Ok(merged)
    })
    .await?;
    Ok(Json(flags))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_defaults_when_nothing_stored() {
        assert_eq!(UiFlags::from_stored(None), UiFlags::default());
        assert_eq!(UiFlags::from_stored(Some(json!("garbage"))), UiFlags::default());
    }

    #[test]
    fn test_merge_keeps_unrelated_flags() {
        let flags = UiFlags::default()
            .merge(patch(json!({"sidebar_collapsed": true, "pinned_report": "q3"})))
            .expect("merge");
        assert!(flags.sidebar_collapsed);
        assert_eq!(flags.theme, "light");
        assert_eq!(flags.extra.get("pinned_report"), Some(&json!("q3")));

        let flags = flags.merge(patch(json!({"theme": "dark"}))).expect("merge");
        assert!(flags.sidebar_collapsed);
        assert_eq!(flags.theme, "dark");
        assert_eq!(flags.extra.len(), 1);
    }

    #[test]
    fn test_null_resets_flag() {
        let flags = UiFlags::default()
            .merge(patch(json!({"theme": "dark", "tour": 3})))
            .expect("merge")
            .merge(patch(json!({"theme": null, "tour": null})))
            .expect("merge");
        assert_eq!(flags.theme, "light");
        assert!(flags.extra.is_empty());
    }

    #[test]
    fn test_merge_rejects_wrong_types() {
        assert!(UiFlags::default()
            .merge(patch(json!({"sidebar_collapsed": "yes"})))
            .is_err());
        assert!(UiFlags::default()
            .merge(patch(json!({"theme": "neon"})))
            .is_err());
    }
}
