//! Per-company key/value configuration.
//!
//! Well-known keys carry a type and a default; any other key is stored as the
//! JSON value the client sends.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::shared::error::ApiError;
use crate::core::shared::models::SystemSetting;
use crate::core::shared::schema::system_settings;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::run_blocking;
use crate::security::auth_api::AuthenticatedUser;

pub const QUOTE_VALIDITY_DAYS: &str = "sales.quote_validity_days";
pub const INVOICE_DUE_DAYS: &str = "sales.invoice_due_days";
pub const DEFAULT_TAX_RATE: &str = "sales.default_tax_rate";
pub const FISCAL_YEAR_START_MONTH: &str = "company.fiscal_year_start_month";
pub const LEAD_AUTO_ASSIGN: &str = "crm.lead_auto_assign";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingKind {
    Integer,
    Decimal,
    Boolean,
    Text,
}

#[derive(Debug, Clone, Copy)]
pub struct SettingDefinition {
    pub key: &'static str,
    pub kind: SettingKind,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub default: fn() -> Value,
}

pub const KNOWN_SETTINGS: &[SettingDefinition] = &[
    SettingDefinition {
        key: QUOTE_VALIDITY_DAYS,
        kind: SettingKind::Integer,
        min: Some(1),
        max: Some(365),
        default: || json!(30),
    },
    SettingDefinition {
        key: INVOICE_DUE_DAYS,
        kind: SettingKind::Integer,
        min: Some(0),
        max: Some(365),
        default: || json!(30),
    },
    SettingDefinition {
        key: DEFAULT_TAX_RATE,
        kind: SettingKind::Decimal,
        min: Some(0),
        max: Some(100),
        default: || json!("0"),
    },
    SettingDefinition {
        key: FISCAL_YEAR_START_MONTH,
        kind: SettingKind::Integer,
        min: Some(1),
        max: Some(12),
        default: || json!(1),
    },
    SettingDefinition {
        key: LEAD_AUTO_ASSIGN,
        kind: SettingKind::Boolean,
        min: None,
        max: None,
        default: || json!(false),
    },
];

pub fn definition(key: &str) -> Option<&'static SettingDefinition> {
    KNOWN_SETTINGS.iter().find(|d| d.key == key)
}

fn validate_key(key: &str) -> Result<(), ApiError> {
    let mut chars = key.chars();
    let starts_ok = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    let rest_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.');
    if starts_ok && rest_ok && key.len() <= 100 {
        Ok(())
    } else {
        Err(ApiError::validation(format!(
            "Invalid setting key '{key}': use lowercase letters, digits, '_' and '.'"
        )))
    }
}

/// Checks `value` against the definition of a well-known key.
pub fn validate_setting(key: &str, value: &Value) -> Result<(), ApiError> {
    validate_key(key)?;
    let Some(def) = definition(key) else {
        return Ok(());
    };

    let numeric = match (def.kind, value) {
        (SettingKind::Integer, Value::Number(n)) if n.is_i64() => n.as_i64().map(|v| v as f64),
        (SettingKind::Decimal, Value::Number(n)) => n.as_f64(),
        (SettingKind::Decimal, Value::String(s)) => s.trim().parse::<f64>().ok(),
        (SettingKind::Boolean, Value::Bool(_)) | (SettingKind::Text, Value::String(_)) => {
            return Ok(())
        }
        _ => None,
    };

    let Some(number) = numeric else {
        return Err(ApiError::validation(format!(
            "Setting '{key}' must be {}",
            match def.kind {
                SettingKind::Integer => "an integer",
                SettingKind::Decimal => "a decimal number",
                SettingKind::Boolean => "true or false",
                SettingKind::Text => "a string",
            }
        )));
    };

    let below = def.min.is_some_and(|min| number < min as f64);
    let above = def.max.is_some_and(|max| number > max as f64);
    if below || above {
        return Err(ApiError::validation(format!(
            "Setting '{key}' must be between {} and {}",
            def.min.unwrap_or(i64::MIN),
            def.max.unwrap_or(i64::MAX)
        )));
    }
    Ok(())
}

/// Stored settings over the defaults of every well-known key.
pub fn effective_settings(stored: Vec<SystemSetting>) -> BTreeMap<String, Value> {
    let mut settings: BTreeMap<String, Value> = KNOWN_SETTINGS
        .iter()
        .map(|d| (d.key.to_string(), (d.default)()))
        .collect();
    for setting in stored {
        settings.insert(setting.setting_key, setting.setting_value);
    }
    settings
}

pub fn load_setting(conn: &mut PgConnection, org_id: Uuid, key: &str) -> QueryResult<Value> {
    let stored: Option<Value> = system_settings::table
        .filter(system_settings::org_id.eq(org_id))
        .filter(system_settings::setting_key.eq(key))
        .select(system_settings::setting_value)
        .first(conn)
        .optional()?;
    Ok(stored
        .or_else(|| definition(key).map(|d| (d.default)()))
        .unwrap_or(Value::Null))
}

pub fn setting_i64(conn: &mut PgConnection, org_id: Uuid, key: &str, fallback: i64) -> QueryResult<i64> {
    Ok(load_setting(conn, org_id, key)?.as_i64().unwrap_or(fallback))
}

pub fn setting_decimal(conn: &mut PgConnection, org_id: Uuid, key: &str) -> QueryResult<Option<String>> {
    Ok(match load_setting(conn, org_id, key)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn upsert(
    conn: &mut PgConnection,
    org_id: Uuid,
    key: &str,
    value: &Value,
    updated_by: Uuid,
) -> QueryResult<SystemSetting> {
    let now = Utc::now();
    diesel::insert_into(system_settings::table)
        .values(&SystemSetting {
            id: Uuid::new_v4(),
            org_id,
            setting_key: key.to_string(),
            setting_value: value.clone(),
            updated_by: Some(updated_by),
            updated_at: now,
        })
        .on_conflict((system_settings::org_id, system_settings::setting_key))
        .do_update()
        .set((
            system_settings::setting_value.eq(value),
            system_settings::updated_by.eq(Some(updated_by)),
            system_settings::updated_at.eq(now),
        ))
        .returning(SystemSetting::as_returning())
        .get_result(conn)
}

#[derive(Debug, Deserialize)]
pub struct SetSettingRequest {
    pub value: Value,
}

pub fn configure_system_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/admin/settings",
            get(list_settings).put(update_settings),
        )
        .route(
            "/api/admin/settings/{key}",
            get(get_setting).put(set_setting).delete(reset_setting),
        )
}

pub async fn list_settings(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<BTreeMap<String, Value>>, ApiError> {
    let org_id = user.org_id()?;
    let stored = run_blocking(&state.conn, move |conn| {
        Ok(system_settings::table
            .filter(system_settings::org_id.eq(org_id))
            .select(SystemSetting::as_select())
            .load(conn)?)
    })
    .await?;
    Ok(Json(effective_settings(stored)))
}

/// Writes several settings at once; nothing is stored if any value is invalid.
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(values): Json<Map<String, Value>>,
) -> Result<Json<BTreeMap<String, Value>>, ApiError> {
    let org_id = user.org_id()?;
    for (key, value) in &values {
        validate_setting(key, value)?;
    }
    let updated_by = user.user_id;
    let stored = run_blocking(&state.conn, move |conn| {
        conn.transaction::<_, ApiError, _>(|conn| {
            for (key, value) in &values {
                upsert(conn, org_id, key, value, updated_by)?;
            }
            Ok(system_settings::table
                .filter(system_settings::org_id.eq(org_id))
                .select(SystemSetting::as_select())
                .load(conn)?)
        })
    })
    .await?;
    info!("Company {org_id} settings updated by {}", user.username);
    Ok(Json(effective_settings(stored)))
}

pub async fn get_setting(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let org_id = user.org_id()?;
    validate_key(&key)?;
    let value = run_blocking(&state.conn, move |conn| {
        let value = load_setting(conn, org_id, &key)?;
        if value.is_null() {
            return Err(ApiError::not_found("Setting"));
        }
        Ok(json!({ "key": key, "value": value }))
    })
    .await?;
    Ok(Json(value))
}

pub async fn set_setting(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(key): Path<String>,
    Json(req): Json<SetSettingRequest>,
) -> Result<Json<SystemSetting>, ApiError> {
    let org_id = user.org_id()?;
    validate_setting(&key, &req.value)?;
    let updated_by = user.user_id;
    let saved = run_blocking(&state.conn, move |conn| {
        Ok(upsert(conn, org_id, &key, &req.value, updated_by)?)
    })
    .await?;
    info!(
        "Setting {} of company {org_id} set by {}",
        saved.setting_key, user.username
    );
    Ok(Json(saved))
}

/// Deletes the stored value so the default applies again.
pub async fn reset_setting(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    let org_id = user.org_id()?;
    validate_key(&key)?;
    let removed = run_blocking(&state.conn, move |conn| {
        Ok(diesel::delete(
            system_settings::table
                .filter(system_settings::org_id.eq(org_id))
                .filter(system_settings::setting_key.eq(key)),
        )
        .execute(conn)?)
    })
    .await?;
    if removed == 0 {
        return Err(ApiError::not_found("Setting"));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_known_settings() {
        assert!(validate_setting(INVOICE_DUE_DAYS, &json!(45)).is_ok());
        assert!(validate_setting(INVOICE_DUE_DAYS, &json!(400)).is_err());
        assert!(validate_setting(INVOICE_DUE_DAYS, &json!("45")).is_err());
        assert!(validate_setting(DEFAULT_TAX_RATE, &json!("19.5")).is_ok());
        assert!(validate_setting(DEFAULT_TAX_RATE, &json!(120)).is_err());
        assert!(validate_setting(LEAD_AUTO_ASSIGN, &json!(true)).is_ok());
        assert!(validate_setting(LEAD_AUTO_ASSIGN, &json!(1)).is_err());
    }

    #[test]
    fn test_custom_keys_accept_any_json() {
        assert!(validate_setting("branding.primary_color", &json!("#112233")).is_ok());
        assert!(validate_setting("reports.widgets", &json!({"a": [1, 2]})).is_ok());
        assert!(validate_setting("Bad Key", &json!(1)).is_err());
        assert!(validate_setting("1starts_with_digit", &json!(1)).is_err());
    }

    #[test]
    fn test_effective_settings_overlay_defaults() {
        let stored = vec![SystemSetting {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            setting_key: INVOICE_DUE_DAYS.to_string(),
            setting_value: json!(14),
            updated_by: None,
            updated_at: Utc::now(),
        }];
        let settings = effective_settings(stored);
        assert_eq!(settings[INVOICE_DUE_DAYS], json!(14));
        assert_eq!(settings[QUOTE_VALIDITY_DAYS], json!(30));
        assert_eq!(settings.len(), KNOWN_SETTINGS.len());
    }
}
