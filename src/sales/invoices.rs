use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use diesel::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::organization::load_company;
use crate::core::shared::detail::{self, DetailView, EditForm, Editable, TabSpec};
use crate::core::shared::error::ApiError;
use crate::core::shared::listing::{self, ListParams, ListResponse, Listable};
use crate::core::shared::schema::sales_invoices;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{document_number, non_blank, run_blocking};
use crate::sales::line_items::{
    self, amounts, build_lines, insert_lines, load_lines, DocumentType, LineItem, LineItemInput,
};
use crate::sales::orders::SalesOrder;
use crate::sales::quotes::ReplaceLinesRequest;
use crate::sales::registry::INVOICE_ADMIN;
use crate::sales::status::{
    ensure_draft, next_status, INVOICE_TRANSITIONS, OPEN_INVOICE_STATUSES, PAYABLE_INVOICE_STATUSES,
};
use crate::sales::totals::{round_money, DocumentTotals, Priced};
use crate::sales::{default_tax_rate, resolve_customer, today, validate_pricing};
use crate::security::auth_api::AuthenticatedUser;
use crate::security::validation::Validator;
use crate::settings::system::{setting_i64, INVOICE_DUE_DAYS};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = sales_invoices)]
#[diesel(treat_none_as_null = true)]
pub struct Invoice {
    pub id: Uuid,
    pub org_id: Uuid,
    pub invoice_number: String,
    pub order_id: Option<Uuid>,
    pub account_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub status: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub currency: String,
    pub subtotal: BigDecimal,
    pub discount_percent: BigDecimal,
    pub discount_amount: BigDecimal,
    pub tax_rate: BigDecimal,
    pub tax_amount: BigDecimal,
    pub total: BigDecimal,
    pub amount_paid: BigDecimal,
    pub balance_due: BigDecimal,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub owner_id: Option<Uuid>,
    pub sent_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Invoice {
    /// A draft invoice for the order's customer and pricing, due on issue.
    /// Callers set the real dates and copy the lines.
    pub fn from_order(order: &SalesOrder, invoice_number: String, owner_id: Uuid, now: DateTime<Utc>) -> Self {
        let issue_date = now.date_naive();
        Self {
            id: Uuid::new_v4(),
            org_id: order.org_id,
            invoice_number,
            order_id: Some(order.id),
            account_id: order.account_id,
            contact_id: order.contact_id,
            customer_name: order.customer_name.clone(),
            customer_email: None,
            status: "draft".to_string(),
            issue_date,
            due_date: issue_date,
            currency: order.currency.clone(),
            subtotal: order.subtotal.clone(),
            discount_percent: order.discount_percent.clone(),
            discount_amount: order.discount_amount.clone(),
            tax_rate: order.tax_rate.clone(),
            tax_amount: order.tax_amount.clone(),
            total: order.total.clone(),
            amount_paid: round_money(&BigDecimal::zero()),
            balance_due: order.total.clone(),
            notes: order.notes.clone(),
            terms: None,
            owner_id: order.owner_id.or(Some(owner_id)),
            sent_at: None,
            paid_at: None,
            voided_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        OPEN_INVOICE_STATUSES.contains(&self.status.as_str()) && self.due_date < today
    }

    fn sync_balance(&mut self) {
        self.balance_due = round_money(&(&self.total - &self.amount_paid));
    }

    /// Books `amount` against the balance. The invoice becomes `paid` once
    /// nothing is left owing and `partial` before that.
    pub fn apply_payment(&mut self, amount: &BigDecimal, now: DateTime<Utc>) -> Result<(), ApiError> {
        if !PAYABLE_INVOICE_STATUSES.contains(&self.status.as_str()) {
            return Err(ApiError::Conflict(format!(
                "Cannot record a payment on an invoice that is {}",
                self.status
            )));
        }
        if *amount <= BigDecimal::zero() {
            return Err(ApiError::validation("Payment amount must be greater than zero"));
        }
        if *amount > self.balance_due {
            return Err(ApiError::validation(format!(
                "Payment of {} exceeds the balance due of {}",
                round_money(amount),
                self.balance_due
            )));
        }

        self.amount_paid = round_money(&(&self.amount_paid + amount));
        self.sync_balance();
        if self.balance_due.is_zero() {
            self.status = "paid".to_string();
            self.paid_at = Some(now);
        } else {
            self.status = "partial".to_string();
        }
        self.updated_at = now;
        Ok(())
    }

    /// Takes a refunded payment back off the invoice.
    pub fn reverse_payment(&mut self, amount: &BigDecimal, now: DateTime<Utc>) -> Result<(), ApiError> {
        if self.status == "void" {
            return Err(ApiError::Conflict("Invoice has been voided".into()));
        }
        if *amount > self.amount_paid {
            return Err(ApiError::validation(format!(
                "Refund of {} exceeds the amount paid of {}",
                round_money(amount),
                self.amount_paid
            )));
        }

        self.amount_paid = round_money(&(&self.amount_paid - amount));
        self.sync_balance();
        self.paid_at = None;
        self.status = if !self.amount_paid.is_zero() {
            "partial"
        } else if self.sent_at.is_some() {
            "sent"
        } else {
            "draft"
        }
        .to_string();
        self.updated_at = now;
        Ok(())
    }

    fn apply_action(&mut self, action: &str, now: DateTime<Utc>) -> Result<(), ApiError> {
        let next = next_status(INVOICE_TRANSITIONS, "invoice", action, &self.status)?;
        match next {
            "sent" => self.sent_at = Some(now),
            "void" => self.voided_at = Some(now),
            _ => {}
        }
        self.status = next.to_string();
        self.updated_at = now;
        Ok(())
    }

    fn validate(&self) -> Result<(), ApiError> {
        validate_pricing(&self.currency, &self.discount_percent, &self.tax_rate)?;
        Validator::new()
            .length(self.customer_name.trim(), "customer_name", Some(1), Some(255))
            .email_opt(self.customer_email.as_deref())
            .validate()?;
        if self.due_date < self.issue_date {
            return Err(ApiError::validation("due_date cannot be before issue_date"));
        }
        Ok(())
    }
}

impl Priced for Invoice {
    fn discount_percent(&self) -> &BigDecimal {
        &self.discount_percent
    }

    fn tax_rate(&self) -> &BigDecimal {
        &self.tax_rate
    }

    fn set_totals(&mut self, totals: DocumentTotals) {
        self.subtotal = totals.subtotal;
        self.discount_amount = totals.discount_amount;
        self.tax_amount = totals.tax_amount;
        self.total = totals.total;
        self.sync_balance();
    }
}

impl Listable for Invoice {
    const SEARCH_FIELDS: &'static [&'static str] = INVOICE_ADMIN.search_fields;
    const SORT_FIELDS: &'static [&'static str] = INVOICE_ADMIN.list_display;
}

impl Editable for Invoice {
    const ENTITY: &'static str = INVOICE_ADMIN.verbose_name;
    const TABS: &'static [TabSpec] = INVOICE_ADMIN.fieldsets;
    const EDITABLE_FIELDS: &'static [&'static str] = &[
        "customer_name",
        "customer_email",
        "account_id",
        "contact_id",
        "issue_date",
        "due_date",
        "currency",
        "discount_percent",
        "tax_rate",
        "notes",
        "terms",
        "owner_id",
    ];
    const REQUIRED_FIELDS: &'static [&'static str] =
        &["customer_name", "issue_date", "due_date", "currency"];

    fn record_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDocument {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub lines: Vec<LineItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateInvoiceRequest {
    pub account_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub currency: Option<String>,
    pub discount_percent: Option<BigDecimal>,
    pub tax_rate: Option<BigDecimal>,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub owner_id: Option<Uuid>,
    #[serde(default)]
    pub lines: Vec<LineItemInput>,
}

struct InvoiceDefaults {
    currency: String,
    tax_rate: BigDecimal,
    due_days: i64,
    today: NaiveDate,
}

impl CreateInvoiceRequest {
    fn into_invoice(
        self,
        org_id: Uuid,
        invoice_number: String,
        customer: crate::sales::Customer,
        owner_id: Uuid,
        defaults: InvoiceDefaults,
    ) -> Invoice {
        let now = Utc::now();
        let issue_date = self.issue_date.unwrap_or(defaults.today);
        let zero = round_money(&BigDecimal::zero());
        Invoice {
            id: Uuid::new_v4(),
            org_id,
            invoice_number,
            order_id: None,
            account_id: self.account_id,
            contact_id: self.contact_id,
            customer_name: customer.name,
            customer_email: non_blank(self.customer_email)
                .or(customer.email)
                .map(|e| e.to_lowercase()),
            status: "draft".to_string(),
            issue_date,
            due_date: self
                .due_date
                .unwrap_or(issue_date + Duration::days(defaults.due_days)),
            currency: non_blank(self.currency)
                .unwrap_or(defaults.currency)
                .to_uppercase(),
            subtotal: zero.clone(),
            discount_percent: round_money(&self.discount_percent.unwrap_or_else(BigDecimal::zero)),
            discount_amount: zero.clone(),
            tax_rate: round_money(&self.tax_rate.unwrap_or(defaults.tax_rate)),
            tax_amount: zero.clone(),
            total: zero.clone(),
            amount_paid: zero.clone(),
            balance_due: zero,
            notes: non_blank(self.notes),
            terms: non_blank(self.terms),
            owner_id: self.owner_id.or(Some(owner_id)),
            sent_at: None,
            paid_at: None,
            voided_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct VoidInvoiceRequest {
    pub reason: Option<String>,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/sales/invoices", get(list_invoices).post(create_invoice))
        .route("/api/sales/invoices/overdue", get(list_overdue_invoices))
        .route(
            "/api/sales/invoices/{id}",
            get(get_invoice)
                .put(update_invoice)
                .patch(update_invoice)
                .delete(delete_invoice),
        )
        .route("/api/sales/invoices/{id}/detail", get(get_invoice_detail))
        .route("/api/sales/invoices/{id}/form", get(get_invoice_form))
        .route(
            "/api/sales/invoices/{id}/lines",
            get(get_invoice_lines).put(replace_invoice_lines),
        )
        .route("/api/sales/invoices/{id}/send", post(send_invoice))
        .route("/api/sales/invoices/{id}/void", post(void_invoice))
}

pub(crate) fn load_invoice(conn: &mut PgConnection, org_id: Uuid, id: Uuid) -> Result<Invoice, ApiError> {
    sales_invoices::table
        .filter(sales_invoices::id.eq(id))
        .filter(sales_invoices::org_id.eq(org_id))
        .filter(sales_invoices::deleted_at.is_null())
        .select(Invoice::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Invoice"))
}

pub(crate) fn load_org_invoices(conn: &mut PgConnection, org_id: Uuid) -> QueryResult<Vec<Invoice>> {
    sales_invoices::table
        .filter(sales_invoices::org_id.eq(org_id))
        .filter(sales_invoices::deleted_at.is_null())
        .order(sales_invoices::created_at.asc())
        .select(Invoice::as_select())
        .load(conn)
}

pub(crate) fn next_invoice_number(conn: &mut PgConnection, org_id: Uuid) -> QueryResult<String> {
    let existing: i64 = sales_invoices::table
        .filter(sales_invoices::org_id.eq(org_id))
        .count()
        .get_result(conn)?;
    Ok(document_number("INV", existing))
}

pub(crate) fn save_invoice(conn: &mut PgConnection, invoice: &Invoice) -> Result<Invoice, ApiError> {
    Ok(diesel::update(sales_invoices::table.find(invoice.id))
        .set(invoice)
        .returning(Invoice::as_returning())
        .get_result(conn)?)
}

pub async fn list_invoices(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(params): Query<ListParams>,
    Query(filters): Query<HashMap<String, String>>,
) -> Result<Json<ListResponse<Invoice>>, ApiError> {
    let org_id = user.org_id()?;
    let rows = run_blocking(&state.conn, move |conn| Ok(load_org_invoices(conn, org_id)?)).await?;
    let rows = INVOICE_ADMIN.filter_rows(rows, &filters)?;
    Ok(Json(listing::apply(rows, &INVOICE_ADMIN.list_params(params))?))
}

/// Sent or partially paid invoices past their due date, oldest due first
/// unless another ordering is requested.
pub async fn list_overdue_invoices(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(mut params): Query<ListParams>,
) -> Result<Json<ListResponse<Invoice>>, ApiError> {
    let org_id = user.org_id()?;
    let rows = run_blocking(&state.conn, move |conn| Ok(load_org_invoices(conn, org_id)?)).await?;
    let today = today();
    let overdue: Vec<Invoice> = rows.into_iter().filter(|i| i.is_overdue(today)).collect();
    if params.ordering.is_none() {
        params.ordering = Some("due_date".to_string());
    }
    Ok(Json(listing::apply(overdue, &params)?))
}

pub async fn create_invoice(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(mut req): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceDocument>), ApiError> {
    let org_id = user.org_id()?;
    let owner = user.user_id;
    let document = run_blocking(&state.conn, move |conn| {
        conn.transaction::<_, ApiError, _>(|conn| {
            let customer = resolve_customer(
                conn,
                org_id,
                req.account_id,
                req.contact_id,
                req.customer_name.take(),
            )?;
            let defaults = InvoiceDefaults {
                currency: load_company(conn, org_id)?.default_currency,
                tax_rate: default_tax_rate(conn, org_id)?,
                due_days: setting_i64(conn, org_id, INVOICE_DUE_DAYS, 30)?,
                today: today(),
            };
            let number = next_invoice_number(conn, org_id)?;
            let inputs = std::mem::take(&mut req.lines);
            let mut invoice = req.into_invoice(org_id, number, customer, owner, defaults);
            let lines = build_lines(conn, org_id, DocumentType::Invoice, invoice.id, inputs)?;
            invoice.recalculate(amounts(&lines));
            invoice.validate()?;

            let invoice = diesel::insert_into(sales_invoices::table)
                .values(&invoice)
                .returning(Invoice::as_returning())
                .get_result(conn)?;
            insert_lines(conn, &lines)?;
            Ok(InvoiceDocument { invoice, lines })
        })
    })
    .await?;
    info!(
        "Invoice {} created by {} ({} {})",
        document.invoice.invoice_number,
        user.username,
        document.invoice.total,
        document.invoice.currency
    );
    Ok((StatusCode::CREATED, Json(document)))
}

pub async fn get_invoice(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<InvoiceDocument>, ApiError> {
    let org_id = user.org_id()?;
    let document = run_blocking(&state.conn, move |conn| {
        let invoice = load_invoice(conn, org_id, id)?;
        let lines = load_lines(conn, DocumentType::Invoice, id)?;
        Ok(InvoiceDocument { invoice, lines })
    })
    .await?;
    Ok(Json(document))
}

pub async fn get_invoice_detail(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DetailView>, ApiError> {
    let org_id = user.org_id()?;
    let invoice = run_blocking(&state.conn, move |conn| load_invoice(conn, org_id, id)).await?;
    Ok(Json(DetailView::build(&invoice)?))
}

pub async fn get_invoice_form(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<EditForm>, ApiError> {
    let org_id = user.org_id()?;
    let invoice = run_blocking(&state.conn, move |conn| load_invoice(conn, org_id, id)).await?;
    Ok(Json(EditForm::prepopulate(&invoice)?))
}

pub async fn update_invoice(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(input): Json<Map<String, Value>>,
) -> Result<Json<Invoice>, ApiError> {
    let org_id = user.org_id()?;
    let updated = run_blocking(&state.conn, move |conn| {
        let current = load_invoice(conn, org_id, id)?;
        ensure_draft("invoice", &current.status)?;
        let (mut updated, changes) = detail::submit(&current, input)?;
        if changes.is_empty() {
            return Ok(current);
        }
        if changes.contains_key("account_id") || changes.contains_key("contact_id") {
            resolve_customer(
                conn,
                org_id,
                updated.account_id,
                updated.contact_id,
                Some(updated.customer_name.clone()),
            )?;
        }
        updated.customer_name = updated.customer_name.trim().to_string();
        updated.customer_email = non_blank(updated.customer_email).map(|e| e.to_lowercase());
        updated.currency = updated.currency.trim().to_uppercase();
        updated.validate()?;
        let lines = load_lines(conn, DocumentType::Invoice, id)?;
        updated.recalculate(amounts(&lines));
        updated.updated_at = Utc::now();
        save_invoice(conn, &updated)
    })
    .await?;
    Ok(Json(updated))
}

pub async fn get_invoice_lines(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<LineItem>>, ApiError> {
    let org_id = user.org_id()?;
    let lines = run_blocking(&state.conn, move |conn| {
        load_invoice(conn, org_id, id)?;
        Ok(load_lines(conn, DocumentType::Invoice, id)?)
    })
    .await?;
    Ok(Json(lines))
}

pub async fn replace_invoice_lines(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<ReplaceLinesRequest>,
) -> Result<Json<InvoiceDocument>, ApiError> {
    let org_id = user.org_id()?;
    let document = run_blocking(&state.conn, move |conn| {
        conn.transaction::<_, ApiError, _>(|conn| {
            let mut invoice = load_invoice(conn, org_id, id)?;
            ensure_draft("invoice", &invoice.status)?;
            let lines =
                line_items::replace_lines(conn, org_id, DocumentType::Invoice, id, req.lines)?;
            invoice.recalculate(amounts(&lines));
            invoice.updated_at = Utc::now();
            let invoice = save_invoice(conn, &invoice)?;
            Ok(InvoiceDocument { invoice, lines })
        })
    })
    .await?;
    Ok(Json(document))
}

pub async fn send_invoice(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Invoice>, ApiError> {
    let org_id = user.org_id()?;
    let invoice = run_blocking(&state.conn, move |conn| {
        let mut invoice = load_invoice(conn, org_id, id)?;
        if invoice.total.is_zero() {
            return Err(ApiError::validation("Cannot send an invoice without a total"));
        }
        invoice.apply_action("send", Utc::now())?;
        save_invoice(conn, &invoice)
    })
    .await?;
    info!("Invoice {} sent by {}", invoice.invoice_number, user.username);
    Ok(Json(invoice))
}

/// Voids an unpaid invoice. Invoices with payments must be refunded first.
pub async fn void_invoice(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    body: Option<Json<VoidInvoiceRequest>>,
) -> Result<Json<Invoice>, ApiError> {
    let org_id = user.org_id()?;
    let reason = body.and_then(|Json(req)| non_blank(req.reason));
    let invoice = run_blocking(&state.conn, move |conn| {
        let mut invoice = load_invoice(conn, org_id, id)?;
        if !invoice.amount_paid.is_zero() {
            return Err(ApiError::Conflict(format!(
                "Invoice {} has payments; refund them before voiding",
                invoice.invoice_number
            )));
        }
        invoice.apply_action("void", Utc::now())?;
        if let Some(reason) = reason {
            invoice.notes = Some(match invoice.notes.take() {
                Some(existing) => format!("{existing}\n\nVoided: {reason}"),
                None => format!("Voided: {reason}"),
            });
        }
        save_invoice(conn, &invoice)
    })
    .await?;
    warn!("Invoice {} voided by {}", invoice.invoice_number, user.username);
    Ok(Json(invoice))
}

/// Drafts and voided invoices without payments can be removed.
pub async fn delete_invoice(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let org_id = user.org_id()?;
    run_blocking(&state.conn, move |conn| {
        let invoice = load_invoice(conn, org_id, id)?;
        if !matches!(invoice.status.as_str(), "draft" | "void") || !invoice.amount_paid.is_zero() {
            return Err(ApiError::Conflict(format!(
                "Cannot delete an invoice that is {}; void it first",
                invoice.status
            )));
        }
        diesel::update(sales_invoices::table.find(id))
            .set(sales_invoices::deleted_at.eq(Some(Utc::now())))
            .execute(conn)?;
        Ok(())
    })
    .await?;
    info!("Invoice {id} deleted by {}", user.username);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sales::orders::tests::sample_order;
    use crate::sales::quotes::tests::dec;

    /// 216.00 owed: one 200.00 line, 10% discount, 20% tax.
    pub(crate) fn sample_invoice() -> Invoice {
        let mut invoice = Invoice::from_order(&sample_order(), "INV-000001".into(), Uuid::new_v4(), Utc::now());
        invoice.recalculate([dec("200.00")].iter());
        invoice
    }

    #[test]
    fn test_from_order_owes_the_full_total() {
        let order = sample_order();
        let invoice = Invoice::from_order(&order, "INV-000001".into(), Uuid::new_v4(), Utc::now());
        assert_eq!(invoice.order_id, Some(order.id));
        assert_eq!(invoice.balance_due, order.total);
        assert!(invoice.amount_paid.is_zero());
        assert_eq!(invoice.status, "draft");
    }

    #[test]
    fn test_balance_tracks_totals() {
        let invoice = sample_invoice();
        // 200 - 20 discount + 36 tax
        assert_eq!(invoice.total, dec("216.00"));
        assert_eq!(invoice.balance_due, &invoice.total - &invoice.amount_paid);
    }

    #[test]
    fn test_partial_then_full_payment() {
        let mut invoice = sample_invoice();
        let now = Utc::now();
        invoice.apply_payment(&dec("100"), now).expect("partial");
        assert_eq!(invoice.status, "partial");
        assert_eq!(invoice.balance_due, dec("116.00"));
        assert!(invoice.paid_at.is_none());

        invoice.apply_payment(&dec("116.00"), now).expect("rest");
        assert_eq!(invoice.status, "paid");
        assert!(invoice.balance_due.is_zero());
        assert_eq!(invoice.paid_at, Some(now));
        assert_eq!(invoice.balance_due, &invoice.total - &invoice.amount_paid);
    }

    #[test]
    fn test_overpayment_is_rejected() {
        let mut invoice = sample_invoice();
        let result = invoice.apply_payment(&dec("216.01"), Utc::now());
        assert!(matches!(result, Err(ApiError::Validation(_))));
        assert!(invoice.amount_paid.is_zero());
    }

    #[test]
    fn test_payment_on_void_or_paid_invoice_conflicts() {
        let mut invoice = sample_invoice();
        invoice.apply_action("void", Utc::now()).expect("void");
        assert!(matches!(
            invoice.apply_payment(&dec("1"), Utc::now()),
            Err(ApiError::Conflict(_))
        ));
    }

    #[test]
    fn test_refund_reverses_payment() {
        let mut invoice = sample_invoice();
        let now = Utc::now();
        invoice.apply_action("send", now).expect("send");
        invoice.apply_payment(&dec("216.00"), now).expect("pay");
        invoice.reverse_payment(&dec("16.00"), now).expect("refund part");
        assert_eq!(invoice.status, "partial");
        assert_eq!(invoice.balance_due, dec("16.00"));
        invoice.reverse_payment(&dec("200.00"), now).expect("refund rest");
        assert_eq!(invoice.status, "sent");
        assert_eq!(invoice.balance_due, invoice.total);
        assert!(invoice.reverse_payment(&dec("0.01"), now).is_err());
    }

    #[test]
    fn test_overdue_only_for_open_invoices() {
        let mut invoice = sample_invoice();
        let today = NaiveDate::from_ymd_opt(2026, 6, 1).expect("date");
        invoice.due_date = today - Duration::days(1);
        assert!(!invoice.is_overdue(today), "drafts are not overdue");
        invoice.status = "sent".into();
        assert!(invoice.is_overdue(today));
        invoice.due_date = today;
        assert!(!invoice.is_overdue(today));
        invoice.due_date = today - Duration::days(3);
        invoice.status = "paid".into();
        assert!(!invoice.is_overdue(today));
    }

    #[test]
    fn test_due_date_not_before_issue() {
        let mut invoice = sample_invoice();
        invoice.due_date = invoice.issue_date - Duration::days(1);
        assert!(invoice.validate().is_err());
    }
}
