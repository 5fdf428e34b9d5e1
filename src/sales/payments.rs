use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::shared::detail::{self, DetailView, EditForm, Editable, TabSpec};
use crate::core::shared::error::ApiError;
use crate::core::shared::listing::{self, ListParams, ListResponse, Listable};
use crate::core::shared::schema::{sales_invoices, sales_payments};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{document_number, non_blank, run_blocking};
use crate::sales::invoices::{load_invoice, save_invoice, Invoice};
use crate::sales::registry::PAYMENT_ADMIN;
use crate::sales::totals::round_money;
use crate::security::auth_api::AuthenticatedUser;
use crate::security::validation::Validator;

pub const PAYMENT_METHODS: &[&str] = &[
    "cash",
    "card",
    "bank_transfer",
    "check",
    "wire",
    "ach",
    "sepa",
    "other",
];

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = sales_payments)]
#[diesel(treat_none_as_null = true)]
pub struct Payment {
    pub id: Uuid,
    pub org_id: Uuid,
    pub payment_number: String,
    pub invoice_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method: String,
    pub reference: Option<String>,
    pub status: String,
    pub paid_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub recorded_by: Option<Uuid>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn is_refunded(&self) -> bool {
        self.status == "refunded"
    }

    /// Flags the payment as refunded. A payment can only be refunded once.
    fn mark_refunded(&mut self, reason: Option<String>, now: DateTime<Utc>) -> Result<(), ApiError> {
        if self.is_refunded() {
            return Err(ApiError::Conflict(format!(
                "Payment {} has already been refunded",
                self.payment_number
            )));
        }
        self.status = "refunded".to_string();
        self.refunded_at = Some(now);
        if let Some(reason) = reason {
            self.notes = Some(match self.notes.take() {
                Some(existing) => format!("{existing}\n\nRefunded: {reason}"),
                None => format!("Refunded: {reason}"),
            });
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ApiError> {
        Ok(Validator::new()
            .one_of(&self.payment_method, "payment_method", PAYMENT_METHODS)
            .length(self.reference.as_deref().unwrap_or(""), "reference", None, Some(255))
            .validate()?)
    }
}

impl Listable for Payment {
    const SEARCH_FIELDS: &'static [&'static str] = PAYMENT_ADMIN.search_fields;
    const SORT_FIELDS: &'static [&'static str] = PAYMENT_ADMIN.list_display;
}

impl Editable for Payment {
    const ENTITY: &'static str = PAYMENT_ADMIN.verbose_name;
    const TABS: &'static [TabSpec] = PAYMENT_ADMIN.fieldsets;
    const EDITABLE_FIELDS: &'static [&'static str] =
        &["payment_method", "reference", "paid_at", "notes"];
    const REQUIRED_FIELDS: &'static [&'static str] = &["payment_method", "paid_at"];

    fn record_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Deserialize)]
pub struct RecordPaymentRequest {
    pub invoice_id: Uuid,
    pub amount: BigDecimal,
    pub currency: Option<String>,
    pub payment_method: Option<String>,
    pub reference: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl RecordPaymentRequest {
    fn into_payment(self, invoice: &Invoice, payment_number: String, recorded_by: Uuid) -> Result<Payment, ApiError> {
        if let Some(currency) = non_blank(self.currency) {
            if !currency.eq_ignore_ascii_case(&invoice.currency) {
                return Err(ApiError::validation(format!(
                    "Payment currency {currency} does not match invoice currency {}",
                    invoice.currency
                )));
            }
        }
        let now = Utc::now();
        Ok(Payment {
            id: Uuid::new_v4(),
            org_id: invoice.org_id,
            payment_number,
            invoice_id: invoice.id,
            amount: round_money(&self.amount),
            currency: invoice.currency.clone(),
            payment_method: non_blank(self.payment_method)
                .map(|m| m.to_lowercase())
                .unwrap_or_else(|| "bank_transfer".to_string()),
            reference: non_blank(self.reference),
            status: "completed".to_string(),
            paid_at: self.paid_at.unwrap_or(now),
            notes: non_blank(self.notes),
            recorded_by: Some(recorded_by),
            refunded_at: None,
            created_at: now,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RefundPaymentRequest {
    pub reason: Option<String>,
}

/// A payment together with the invoice it changed.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentReceipt {
    pub payment: Payment,
    pub invoice: Invoice,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/sales/payments", get(list_payments).post(record_payment))
        .route(
            "/api/sales/payments/{id}",
            get(get_payment).put(update_payment).patch(update_payment),
        )
        .route("/api/sales/payments/{id}/detail", get(get_payment_detail))
        .route("/api/sales/payments/{id}/form", get(get_payment_form))
        .route("/api/sales/payments/{id}/refund", post(refund_payment))
        .route("/api/sales/invoices/{id}/payments", get(list_invoice_payments))
}

fn load_payment(conn: &mut PgConnection, org_id: Uuid, id: Uuid) -> Result<Payment, ApiError> {
    sales_payments::table
        .filter(sales_payments::id.eq(id))
        .filter(sales_payments::org_id.eq(org_id))
        .select(Payment::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Payment"))
}

fn lock_payment(conn: &mut PgConnection, org_id: Uuid, id: Uuid) -> Result<Payment, ApiError> {
    sales_payments::table
        .filter(sales_payments::id.eq(id))
        .filter(sales_payments::org_id.eq(org_id))
        .select(Payment::as_select())
        .for_update()
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Payment"))
}

/// Loads an invoice and locks its row until the transaction ends, so two
/// payments cannot both see the same balance.
fn lock_invoice(conn: &mut PgConnection, org_id: Uuid, id: Uuid) -> Result<Invoice, ApiError> {
    sales_invoices::table
        .filter(sales_invoices::id.eq(id))
        .filter(sales_invoices::org_id.eq(org_id))
        .filter(sales_invoices::deleted_at.is_null())
        .select(Invoice::as_select())
        .for_update()
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Invoice"))
}

fn next_payment_number(conn: &mut PgConnection, org_id: Uuid) -> QueryResult<String> {
    let existing: i64 = sales_payments::table
        .filter(sales_payments::org_id.eq(org_id))
        .count()
        .get_result(conn)?;
    Ok(document_number("PAY", existing))
}

pub async fn list_payments(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(params): Query<ListParams>,
    Query(filters): Query<HashMap<String, String>>,
) -> Result<Json<ListResponse<Payment>>, ApiError> {
    let org_id = user.org_id()?;
    let rows = run_blocking(&state.conn, move |conn| {
        Ok(sales_payments::table
            .filter(sales_payments::org_id.eq(org_id))
            .order(sales_payments::created_at.asc())
            .select(Payment::as_select())
            .load::<Payment>(conn)?)
    })
    .await?;
    let rows = PAYMENT_ADMIN.filter_rows(rows, &filters)?;
    Ok(Json(listing::apply(rows, &PAYMENT_ADMIN.list_params(params))?))
}

pub async fn list_invoice_payments(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Vec<Payment>>, ApiError> {
    let org_id = user.org_id()?;
    let payments = run_blocking(&state.conn, move |conn| {
        load_invoice(conn, org_id, invoice_id)?;
        Ok(sales_payments::table
            .filter(sales_payments::invoice_id.eq(invoice_id))
            .order(sales_payments::paid_at.asc())
            .select(Payment::as_select())
            .load::<Payment>(conn)?)
    })
    .await?;
    Ok(Json(payments))
}

pub async fn record_payment(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<PaymentReceipt>), ApiError> {
    let org_id = user.org_id()?;
    let recorded_by = user.user_id;
    let receipt = run_blocking(&state.conn, move |conn| {
        conn.transaction::<_, ApiError, _>(|conn| {
            let mut invoice = lock_invoice(conn, org_id, req.invoice_id)?;
            let number = next_payment_number(conn, org_id)?;
            let payment = req.into_payment(&invoice, number, recorded_by)?;
            payment.validate()?;
            invoice.apply_payment(&payment.amount, Utc::now())?;

            let payment = diesel::insert_into(sales_payments::table)
                .values(&payment)
                .returning(Payment::as_returning())
                .get_result(conn)?;
            let invoice = save_invoice(conn, &invoice)?;
            Ok(PaymentReceipt { payment, invoice })
        })
    })
    .await?;
    info!(
        "Payment {} of {} {} recorded on {} by {} (balance {})",
        receipt.payment.payment_number,
        receipt.payment.amount,
        receipt.payment.currency,
        receipt.invoice.invoice_number,
        user.username,
        receipt.invoice.balance_due
    );
    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>, ApiError> {
    let org_id = user.org_id()?;
    let payment = run_blocking(&state.conn, move |conn| load_payment(conn, org_id, id)).await?;
    Ok(Json(payment))
}

pub async fn get_payment_detail(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DetailView>, ApiError> {
    let org_id = user.org_id()?;
    let payment = run_blocking(&state.conn, move |conn| load_payment(conn, org_id, id)).await?;
    Ok(Json(DetailView::build(&payment)?))
}

pub async fn get_payment_form(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<EditForm>, ApiError> {
    let org_id = user.org_id()?;
    let payment = run_blocking(&state.conn, move |conn| load_payment(conn, org_id, id)).await?;
    Ok(Json(EditForm::prepopulate(&payment)?))
}

/// Only bookkeeping fields change after the fact; the amount is fixed once
/// it has been applied to the invoice.
pub async fn update_payment(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(input): Json<Map<String, Value>>,
) -> Result<Json<Payment>, ApiError> {
    let org_id = user.org_id()?;
    let updated = run_blocking(&state.conn, move |conn| {
        let current = load_payment(conn, org_id, id)?;
        let (mut updated, changes) = detail::submit(&current, input)?;
        if changes.is_empty() {
            return Ok(current);
        }
        updated.payment_method = updated.payment_method.trim().to_lowercase();
        updated.reference = non_blank(updated.reference);
        updated.validate()?;
        Ok(diesel::update(sales_payments::table.find(id))
            .set(&updated)
            .returning(Payment::as_returning())
            .get_result(conn)?)
    })
    .await?;
    Ok(Json(updated))
}

/// Refunds a payment in full and puts the amount back on the invoice.
pub async fn refund_payment(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    body: Option<Json<RefundPaymentRequest>>,
) -> Result<Json<PaymentReceipt>, ApiError> {
    let org_id = user.org_id()?;
    let reason = body.and_then(|Json(req)| non_blank(req.reason));
    let receipt = run_blocking(&state.conn, move |conn| {
        conn.transaction::<_, ApiError, _>(|conn| {
            // Both rows are locked, invoice first, before the refund check.
            let invoice_id = load_payment(conn, org_id, id)?.invoice_id;
            let mut invoice = lock_invoice(conn, org_id, invoice_id)?;
            let mut payment = lock_payment(conn, org_id, id)?;
            let now = Utc::now();
            payment.mark_refunded(reason, now)?;
            invoice.reverse_payment(&payment.amount, now)?;

            let payment = diesel::update(sales_payments::table.find(payment.id))
                .set(&payment)
                .returning(Payment::as_returning())
                .get_result(conn)?;
            let invoice = save_invoice(conn, &invoice)?;
            Ok(PaymentReceipt { payment, invoice })
        })
    })
    .await?;
    warn!(
        "Payment {} refunded by {}; {} now owes {}",
        receipt.payment.payment_number,
        user.username,
        receipt.invoice.invoice_number,
        receipt.invoice.balance_due
    );
    Ok(Json(receipt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sales::invoices::tests::sample_invoice;
    use crate::sales::quotes::tests::dec;

    fn request(amount: &str) -> RecordPaymentRequest {
        RecordPaymentRequest {
            invoice_id: Uuid::new_v4(),
            amount: dec(amount),
            currency: None,
            payment_method: None,
            reference: Some("  ".into()),
            paid_at: None,
            notes: None,
        }
    }

    #[test]
    fn test_payment_takes_invoice_currency() {
        let invoice = sample_invoice();
        let payment = request("10.005")
            .into_payment(&invoice, "PAY-000001".into(), Uuid::new_v4())
            .expect("payment");
        assert_eq!(payment.currency, invoice.currency);
        assert_eq!(payment.invoice_id, invoice.id);
        assert_eq!(payment.amount, dec("10.01"));
        assert_eq!(payment.payment_method, "bank_transfer");
        assert!(payment.reference.is_none());
        assert!(payment.validate().is_ok());
    }

    #[test]
    fn test_currency_mismatch_is_rejected() {
        let invoice = sample_invoice();
        let mut req = request("10");
        req.currency = Some("GBP".into());
        assert!(req
            .into_payment(&invoice, "PAY-000001".into(), Uuid::new_v4())
            .is_err());
    }

    #[test]
    fn test_unknown_method_fails_validation() {
        let invoice = sample_invoice();
        let mut req = request("10");
        req.payment_method = Some("Barter".into());
        let payment = req
            .into_payment(&invoice, "PAY-000002".into(), Uuid::new_v4())
            .expect("payment");
        assert!(payment.validate().is_err());
    }

    #[test]
    fn test_amount_is_not_editable() {
        let invoice = sample_invoice();
        let payment = request("10")
            .into_payment(&invoice, "PAY-000003".into(), Uuid::new_v4())
            .expect("payment");
        let mut input = Map::new();
        input.insert("amount".into(), Value::String("1.00".into()));
        assert!(detail::submit(&payment, input).is_err());
    }

    #[test]
    fn test_refunding_twice_is_rejected() {
        let mut invoice = sample_invoice();
        invoice.status = "sent".into();
        let now = Utc::now();
        let mut first = request("50")
            .into_payment(&invoice, "PAY-000004".into(), Uuid::new_v4())
            .expect("payment");
        let second = request("50")
            .into_payment(&invoice, "PAY-000005".into(), Uuid::new_v4())
            .expect("payment");
        invoice.apply_payment(&first.amount, now).expect("first");
        invoice.apply_payment(&second.amount, now).expect("second");
        assert_eq!(invoice.amount_paid, dec("100.00"));

        first.mark_refunded(Some("duplicate".into()), now).expect("refund");
        invoice.reverse_payment(&first.amount, now).expect("reverse");
        assert!(first.is_refunded());
        assert_eq!(first.notes.as_deref(), Some("Refunded: duplicate"));

        // A second refund of the same payment stops before touching the invoice.
        let err = first.mark_refunded(None, now).expect_err("second refund");
        assert!(matches!(err, ApiError::Conflict(_)));
        assert_eq!(invoice.amount_paid, dec("50.00"));
        assert_eq!(invoice.amount_paid, second.amount);
        assert_eq!(invoice.status, "partial");
    }
}
