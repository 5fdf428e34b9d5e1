//! Quotes, sales orders, invoices and payments.
//!
//! Documents are numbered per company (`QTE-000001`, `SO-000001`,
//! `INV-000001`, `PAY-000001`) and flow quote → order → invoice, each step
//! copying the previous document's lines. Totals are always recomputed from
//! the lines on the server.

use axum::Router;
use bigdecimal::{BigDecimal, Zero};
use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::shared::error::ApiError;
use crate::core::shared::schema::{crm_accounts, crm_contacts};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::non_blank;
use crate::crm::accounts::load_account;
use crate::crm::contacts::load_contact;
use crate::crm::{ensure_account, ensure_contact};
use crate::settings::system::{setting_decimal, DEFAULT_TAX_RATE};

pub mod invoices;
pub mod line_items;
pub mod orders;
pub mod payments;
pub mod quotes;
pub mod registry;
pub mod stats;
pub mod status;
pub mod totals;

pub fn configure_sales_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(quotes::configure())
        .merge(orders::configure())
        .merge(invoices::configure())
        .merge(payments::configure())
        .merge(stats::configure())
        .merge(registry::configure_registry_routes())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Customer {
    pub name: String,
    pub email: Option<String>,
}

/// Works out who a document is addressed to. An explicit name wins, then the
/// account name, then the contact's full name. A contact given together with
/// an account must belong to it.
pub(crate) fn resolve_customer(
    conn: &mut PgConnection,
    org_id: Uuid,
    account_id: Option<Uuid>,
    contact_id: Option<Uuid>,
    given_name: Option<String>,
) -> Result<Customer, ApiError> {
    ensure_account(conn, org_id, account_id)?;
    ensure_contact(conn, org_id, contact_id)?;
    let account = account_id
        .map(|id| load_account(conn, org_id, id))
        .transpose()?;
    let contact = contact_id
        .map(|id| load_contact(conn, org_id, id))
        .transpose()?;

    if let (Some(account), Some(contact)) = (&account, &contact) {
        if contact.account_id != Some(account.id) {
            return Err(ApiError::validation(format!(
                "Contact {} does not belong to account {}",
                contact.full_name(),
                account.name
            )));
        }
    }

    let name = non_blank(given_name)
        .or_else(|| account.as_ref().map(|a| a.name.clone()))
        .or_else(|| contact.as_ref().map(|c| c.full_name()))
        .ok_or_else(|| ApiError::validation("customer_name is required without an account or contact"))?;
    let email = contact
        .and_then(|c| c.email)
        .or_else(|| account.and_then(|a| a.email));
    Ok(Customer { name, email })
}

/// Where a document is sent: the contact's email, else the account's.
/// References that no longer resolve are skipped.
pub(crate) fn contact_email(
    conn: &mut PgConnection,
    org_id: Uuid,
    contact_id: Option<Uuid>,
    account_id: Option<Uuid>,
) -> Result<Option<String>, ApiError> {
    if let Some(id) = contact_id {
        let email: Option<String> = crm_contacts::table
            .filter(crm_contacts::id.eq(id))
            .filter(crm_contacts::org_id.eq(org_id))
            .filter(crm_contacts::deleted_at.is_null())
            .select(crm_contacts::email)
            .first::<Option<String>>(conn)
            .optional()?
            .flatten();
        if email.is_some() {
            return Ok(email);
        }
    }
    if let Some(id) = account_id {
        return Ok(crm_accounts::table
            .filter(crm_accounts::id.eq(id))
            .filter(crm_accounts::org_id.eq(org_id))
            .filter(crm_accounts::deleted_at.is_null())
            .select(crm_accounts::email)
            .first::<Option<String>>(conn)
            .optional()?
            .flatten());
    }
    Ok(None)
}

/// The company's default tax rate, zero when unset or unparsable.
pub(crate) fn default_tax_rate(conn: &mut PgConnection, org_id: Uuid) -> Result<BigDecimal, ApiError> {
    Ok(setting_decimal(conn, org_id, DEFAULT_TAX_RATE)?
        .and_then(|raw| BigDecimal::from_str(raw.trim()).ok())
        .unwrap_or_else(BigDecimal::zero))
}

pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Shared header checks for priced documents.
pub(crate) fn validate_pricing(
    currency: &str,
    discount_percent: &BigDecimal,
    tax_rate: &BigDecimal,
) -> Result<(), ApiError> {
    let zero = BigDecimal::zero();
    let hundred = BigDecimal::from(100);
    Ok(crate::security::validation::Validator::new()
        .currency(currency)
        .range(discount_percent, "discount_percent", Some(&zero), Some(&hundred))
        .range(tax_rate, "tax_rate", Some(&zero), Some(&hundred))
        .validate()?)
}
