use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use diesel::dsl::exists;
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::organization::load_company;
use crate::core::shared::detail::{self, DetailView, EditForm, Editable, TabSpec};
use crate::core::shared::error::ApiError;
use crate::core::shared::listing::{self, ListParams, ListResponse, Listable};
use crate::core::shared::schema::{sales_invoices, sales_orders};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{document_number, non_blank, run_blocking};
use crate::crm::ensure_deal;
use crate::sales::invoices::{next_invoice_number, Invoice, InvoiceDocument};
use crate::sales::line_items::{
    self, amounts, build_lines, insert_lines, load_lines, DocumentType, LineItem,
};
use crate::sales::quotes::{Quote, ReplaceLinesRequest};
use crate::sales::registry::ORDER_ADMIN;
use crate::sales::status::{ensure_draft, next_status, INVOICEABLE_ORDER_STATUSES, ORDER_TRANSITIONS};
use crate::sales::totals::{round_money, DocumentTotals, Priced};
use crate::sales::{contact_email, default_tax_rate, resolve_customer, today, validate_pricing};
use crate::security::auth_api::{Action, AuthenticatedUser, Resource};
use crate::settings::system::{setting_i64, INVOICE_DUE_DAYS};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = sales_orders)]
#[diesel(treat_none_as_null = true)]
pub struct SalesOrder {
    pub id: Uuid,
    pub org_id: Uuid,
    pub order_number: String,
    pub quote_id: Option<Uuid>,
    pub account_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub deal_id: Option<Uuid>,
    pub customer_name: String,
    pub status: String,
    pub order_date: NaiveDate,
    pub expected_delivery_date: Option<NaiveDate>,
    pub currency: String,
    pub subtotal: BigDecimal,
    pub discount_percent: BigDecimal,
    pub discount_amount: BigDecimal,
    pub tax_rate: BigDecimal,
    pub tax_amount: BigDecimal,
    pub total: BigDecimal,
    pub notes: Option<String>,
    pub owner_id: Option<Uuid>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SalesOrder {
    /// A draft order mirroring the quote's customer and pricing. Lines are
    /// copied separately.
    pub fn from_quote(quote: &Quote, order_number: String, owner_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id: quote.org_id,
            order_number,
            quote_id: Some(quote.id),
            account_id: quote.account_id,
            contact_id: quote.contact_id,
            deal_id: quote.deal_id,
            customer_name: quote.customer_name.clone(),
            status: "draft".to_string(),
            order_date: now.date_naive(),
            expected_delivery_date: None,
            currency: quote.currency.clone(),
            subtotal: quote.subtotal.clone(),
            discount_percent: quote.discount_percent.clone(),
            discount_amount: quote.discount_amount.clone(),
            tax_rate: quote.tax_rate.clone(),
            tax_amount: quote.tax_amount.clone(),
            total: quote.total.clone(),
            notes: quote.notes.clone(),
            owner_id: quote.owner_id.or(Some(owner_id)),
            confirmed_at: None,
            fulfilled_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn validate(&self) -> Result<(), ApiError> {
        validate_pricing(&self.currency, &self.discount_percent, &self.tax_rate)?;
        if self.customer_name.trim().is_empty() {
            return Err(ApiError::validation("customer_name is required"));
        }
        if let Some(delivery) = self.expected_delivery_date {
            if delivery < self.order_date {
                return Err(ApiError::validation(
                    "expected_delivery_date cannot be before order_date",
                ));
            }
        }
        Ok(())
    }

    fn apply_action(&mut self, action: &str, now: DateTime<Utc>) -> Result<(), ApiError> {
        let next = next_status(ORDER_TRANSITIONS, "order", action, &self.status)?;
        match next {
            "confirmed" => self.confirmed_at = Some(now),
            "fulfilled" => self.fulfilled_at = Some(now),
            "cancelled" => self.cancelled_at = Some(now),
            _ => {}
        }
        self.status = next.to_string();
        self.updated_at = now;
        Ok(())
    }
}

impl Priced for SalesOrder {
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
    }
}

impl Listable for SalesOrder {
    const SEARCH_FIELDS: &'static [&'static str] = ORDER_ADMIN.search_fields;
    const SORT_FIELDS: &'static [&'static str] = ORDER_ADMIN.list_display;
}

impl Editable for SalesOrder {
    const ENTITY: &'static str = ORDER_ADMIN.verbose_name;
    const TABS: &'static [TabSpec] = ORDER_ADMIN.fieldsets;
    const EDITABLE_FIELDS: &'static [&'static str] = &[
        "customer_name",
        "account_id",
        "contact_id",
        "deal_id",
        "order_date",
        "expected_delivery_date",
        "currency",
        "discount_percent",
        "tax_rate",
        "notes",
        "owner_id",
    ];
    const REQUIRED_FIELDS: &'static [&'static str] = &["customer_name", "order_date", "currency"];

    fn record_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderDocument {
    #[serde(flatten)]
    pub order: SalesOrder,
    pub lines: Vec<LineItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateOrderRequest {
    pub account_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub deal_id: Option<Uuid>,
    pub customer_name: Option<String>,
    pub order_date: Option<NaiveDate>,
    pub expected_delivery_date: Option<NaiveDate>,
    pub currency: Option<String>,
    pub discount_percent: Option<BigDecimal>,
    pub tax_rate: Option<BigDecimal>,
    pub notes: Option<String>,
    pub owner_id: Option<Uuid>,
    #[serde(default)]
    pub lines: Vec<line_items::LineItemInput>,
}

struct OrderDefaults {
    currency: String,
    tax_rate: BigDecimal,
    today: NaiveDate,
}

impl CreateOrderRequest {
    fn into_order(
        self,
        org_id: Uuid,
        order_number: String,
        customer_name: String,
        owner_id: Uuid,
        defaults: OrderDefaults,
    ) -> SalesOrder {
        let now = Utc::now();
        SalesOrder {
            id: Uuid::new_v4(),
            org_id,
            order_number,
            quote_id: None,
            account_id: self.account_id,
            contact_id: self.contact_id,
            deal_id: self.deal_id,
            customer_name,
            status: "draft".to_string(),
            order_date: self.order_date.unwrap_or(defaults.today),
            expected_delivery_date: self.expected_delivery_date,
            currency: non_blank(self.currency)
                .unwrap_or(defaults.currency)
                .to_uppercase(),
            subtotal: BigDecimal::from(0),
            discount_percent: round_money(&self.discount_percent.unwrap_or_else(|| BigDecimal::from(0))),
            discount_amount: BigDecimal::from(0),
            tax_rate: round_money(&self.tax_rate.unwrap_or(defaults.tax_rate)),
            tax_amount: BigDecimal::from(0),
            total: BigDecimal::from(0),
            notes: non_blank(self.notes),
            owner_id: self.owner_id.or(Some(owner_id)),
            confirmed_at: None,
            fulfilled_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/sales/orders", get(list_orders).post(create_order))
        .route(
            "/api/sales/orders/{id}",
            get(get_order)
                .put(update_order)
                .patch(update_order)
                .delete(delete_order),
        )
        .route("/api/sales/orders/{id}/detail", get(get_order_detail))
        .route("/api/sales/orders/{id}/form", get(get_order_form))
        .route("/api/sales/orders/{id}/lines", get(get_order_lines).put(replace_order_lines))
        .route("/api/sales/orders/{id}/confirm", post(confirm_order))
        .route("/api/sales/orders/{id}/fulfill", post(fulfill_order))
        .route("/api/sales/orders/{id}/cancel", post(cancel_order))
        .route("/api/sales/orders/{id}/invoice", post(invoice_order))
}

pub(crate) fn load_order(conn: &mut PgConnection, org_id: Uuid, id: Uuid) -> Result<SalesOrder, ApiError> {
    sales_orders::table
        .filter(sales_orders::id.eq(id))
        .filter(sales_orders::org_id.eq(org_id))
        .filter(sales_orders::deleted_at.is_null())
        .select(SalesOrder::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Sales order"))
}

pub(crate) fn next_order_number(conn: &mut PgConnection, org_id: Uuid) -> QueryResult<String> {
    let existing: i64 = sales_orders::table
        .filter(sales_orders::org_id.eq(org_id))
        .count()
        .get_result(conn)?;
    Ok(document_number("SO", existing))
}

fn save_order(conn: &mut PgConnection, order: &SalesOrder) -> Result<SalesOrder, ApiError> {
    Ok(diesel::update(sales_orders::table.find(order.id))
        .set(order)
        .returning(SalesOrder::as_returning())
        .get_result(conn)?)
}

/// Whether the order already has an invoice that was not voided.
fn is_invoiced(conn: &mut PgConnection, order_id: Uuid) -> QueryResult<bool> {
    diesel::select(exists(
        sales_invoices::table
            .filter(sales_invoices::order_id.eq(order_id))
            .filter(sales_invoices::deleted_at.is_null())
            .filter(sales_invoices::status.ne("void")),
    ))
    .get_result(conn)
}

pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(params): Query<ListParams>,
    Query(filters): Query<HashMap<String, String>>,
) -> Result<Json<ListResponse<SalesOrder>>, ApiError> {
    let org_id = user.org_id()?;
    let rows = run_blocking(&state.conn, move |conn| {
        Ok(sales_orders::table
            .filter(sales_orders::org_id.eq(org_id))
            .filter(sales_orders::deleted_at.is_null())
            .order(sales_orders::created_at.asc())
            .select(SalesOrder::as_select())
            .load::<SalesOrder>(conn)?)
    })
    .await?;
    let rows = ORDER_ADMIN.filter_rows(rows, &filters)?;
    Ok(Json(listing::apply(rows, &ORDER_ADMIN.list_params(params))?))
}

pub async fn create_order(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(mut req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderDocument>), ApiError> {
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
            ensure_deal(conn, org_id, req.deal_id)?;
            let defaults = OrderDefaults {
                currency: load_company(conn, org_id)?.default_currency,
                tax_rate: default_tax_rate(conn, org_id)?,
                today: today(),
            };
            let number = next_order_number(conn, org_id)?;
            let inputs = std::mem::take(&mut req.lines);
            let mut order = req.into_order(org_id, number, customer.name, owner, defaults);
            let lines = build_lines(conn, org_id, DocumentType::Order, order.id, inputs)?;
            order.recalculate(amounts(&lines));
            order.validate()?;

            let order = diesel::insert_into(sales_orders::table)
                .values(&order)
                .returning(SalesOrder::as_returning())
                .get_result(conn)?;
            insert_lines(conn, &lines)?;
            Ok(OrderDocument { order, lines })
        })
    })
    .await?;
    info!(
        "Sales order {} created by {}",
        document.order.order_number, user.username
    );
    Ok((StatusCode::CREATED, Json(document)))
}

pub async fn get_order(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderDocument>, ApiError> {
    let org_id = user.org_id()?;
    let document = run_blocking(&state.conn, move |conn| {
        let order = load_order(conn, org_id, id)?;
        let lines = load_lines(conn, DocumentType::Order, id)?;
        Ok(OrderDocument { order, lines })
    })
    .await?;
    Ok(Json(document))
}

pub async fn get_order_detail(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DetailView>, ApiError> {
    let org_id = user.org_id()?;
    let order = run_blocking(&state.conn, move |conn| load_order(conn, org_id, id)).await?;
    Ok(Json(DetailView::build(&order)?))
}

pub async fn get_order_form(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<EditForm>, ApiError> {
    let org_id = user.org_id()?;
    let order = run_blocking(&state.conn, move |conn| load_order(conn, org_id, id)).await?;
    Ok(Json(EditForm::prepopulate(&order)?))
}

pub async fn update_order(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(input): Json<Map<String, Value>>,
) -> Result<Json<SalesOrder>, ApiError> {
    let org_id = user.org_id()?;
    let updated = run_blocking(&state.conn, move |conn| {
        let current = load_order(conn, org_id, id)?;
        ensure_draft("order", &current.status)?;
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
        if changes.contains_key("deal_id") {
            ensure_deal(conn, org_id, updated.deal_id)?;
        }
        updated.customer_name = updated.customer_name.trim().to_string();
        updated.currency = updated.currency.trim().to_uppercase();
        updated.validate()?;
        let lines = load_lines(conn, DocumentType::Order, id)?;
        updated.recalculate(amounts(&lines));
        updated.updated_at = Utc::now();
        save_order(conn, &updated)
    })
    .await?;
    Ok(Json(updated))
}

pub async fn get_order_lines(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<LineItem>>, ApiError> {
    let org_id = user.org_id()?;
    let lines = run_blocking(&state.conn, move |conn| {
        load_order(conn, org_id, id)?;
        Ok(load_lines(conn, DocumentType::Order, id)?)
    })
    .await?;
    Ok(Json(lines))
}

pub async fn replace_order_lines(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<ReplaceLinesRequest>,
) -> Result<Json<OrderDocument>, ApiError> {
    let org_id = user.org_id()?;
    let document = run_blocking(&state.conn, move |conn| {
        conn.transaction::<_, ApiError, _>(|conn| {
            let mut order = load_order(conn, org_id, id)?;
            ensure_draft("order", &order.status)?;
            let lines = line_items::replace_lines(conn, org_id, DocumentType::Order, id, req.lines)?;
            order.recalculate(amounts(&lines));
            order.updated_at = Utc::now();
            let order = save_order(conn, &order)?;
            Ok(OrderDocument { order, lines })
        })
    })
    .await?;
    Ok(Json(document))
}

async fn transition_order(
    state: Arc<AppState>,
    user: AuthenticatedUser,
    id: Uuid,
    action: &'static str,
) -> Result<Json<SalesOrder>, ApiError> {
    let org_id = user.org_id()?;
    let order = run_blocking(&state.conn, move |conn| {
        let mut order = load_order(conn, org_id, id)?;
        order.apply_action(action, Utc::now())?;
        save_order(conn, &order)
    })
    .await?;
    info!(
        "Sales order {} is now {} ({})",
        order.order_number, order.status, user.username
    );
    Ok(Json(order))
}

pub async fn confirm_order(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<SalesOrder>, ApiError> {
    transition_order(state, user, id, "confirm").await
}

pub async fn fulfill_order(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<SalesOrder>, ApiError> {
    transition_order(state, user, id, "fulfill").await
}

pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<SalesOrder>, ApiError> {
    transition_order(state, user, id, "cancel").await
}

/// Bills a confirmed or fulfilled order. An order carries at most one
/// invoice that has not been voided.
pub async fn invoice_order(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<InvoiceDocument>), ApiError> {
    user.require(Resource::Invoices, Action::Add)?;
    let org_id = user.org_id()?;
    let owner = user.user_id;
    let document = run_blocking(&state.conn, move |conn| {
        conn.transaction::<_, ApiError, _>(|conn| {
            let order = load_order(conn, org_id, id)?;
            if !INVOICEABLE_ORDER_STATUSES.contains(&order.status.as_str()) {
                return Err(ApiError::Conflict(format!(
                    "Cannot invoice an order that is {}",
                    order.status
                )));
            }
            if is_invoiced(conn, order.id)? {
                return Err(ApiError::Conflict(format!(
                    "Order {} has already been invoiced",
                    order.order_number
                )));
            }

            let due_days = setting_i64(conn, org_id, INVOICE_DUE_DAYS, 30)?;
            let issue_date = today();
            let number = next_invoice_number(conn, org_id)?;
            let email = contact_email(conn, org_id, order.contact_id, order.account_id)?;
            let mut invoice = Invoice::from_order(&order, number, owner, Utc::now());
            invoice.issue_date = issue_date;
            invoice.due_date = issue_date + Duration::days(due_days);
            invoice.customer_email = email;

            let invoice = diesel::insert_into(sales_invoices::table)
                .values(&invoice)
                .returning(Invoice::as_returning())
                .get_result(conn)?;
            let lines = line_items::copy_lines(
                conn,
                (DocumentType::Order, order.id),
                (DocumentType::Invoice, invoice.id),
            )?;
            Ok(InvoiceDocument { invoice, lines })
        })
    })
    .await?;
    info!(
        "Order {id} invoiced as {} by {}",
        document.invoice.invoice_number, user.username
    );
    Ok((StatusCode::CREATED, Json(document)))
}

/// Only drafts and cancelled orders can be removed.
pub async fn delete_order(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let org_id = user.org_id()?;
    run_blocking(&state.conn, move |conn| {
        let order = load_order(conn, org_id, id)?;
        if !matches!(order.status.as_str(), "draft" | "cancelled") {
            return Err(ApiError::Conflict(format!(
                "Cannot delete an order that is {}; cancel it first",
                order.status
            )));
        }
        diesel::update(sales_orders::table.find(id))
            .set(sales_orders::deleted_at.eq(Some(Utc::now())))
            .execute(conn)?;
        Ok(())
    })
    .await?;
    info!("Sales order {id} deleted by {}", user.username);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sales::quotes::tests::{dec, sample_quote};

    pub(crate) fn sample_order() -> SalesOrder {
        let mut quote = sample_quote();
        quote.recalculate([dec("200.00")].iter());
        SalesOrder::from_quote(&quote, "SO-000001".into(), Uuid::new_v4(), Utc::now())
    }

    #[test]
    fn test_from_quote_carries_pricing() {
        let mut quote = sample_quote();
        quote.recalculate([dec("100.00")].iter());
        let order = SalesOrder::from_quote(&quote, "SO-000007".into(), Uuid::new_v4(), Utc::now());
        assert_eq!(order.quote_id, Some(quote.id));
        assert_eq!(order.status, "draft");
        assert_eq!(order.customer_name, quote.customer_name);
        assert_eq!(order.total, quote.total);
        assert_eq!(order.owner_id, quote.owner_id);
        assert!(order.validate().is_ok());
    }

    #[test]
    fn test_order_lifecycle_stamps() {
        let mut order = sample_order();
        let now = Utc::now();
        order.apply_action("confirm", now).expect("confirm");
        assert_eq!(order.confirmed_at, Some(now));
        order.apply_action("fulfill", now).expect("fulfill");
        assert_eq!(order.status, "fulfilled");
        assert!(matches!(
            order.apply_action("cancel", now),
            Err(ApiError::Conflict(_))
        ));
    }

    #[test]
    fn test_delivery_cannot_precede_order() {
        let mut order = sample_order();
        order.expected_delivery_date = Some(order.order_date - Duration::days(2));
        assert!(order.validate().is_err());
    }

    #[test]
    fn test_create_request_defaults() {
        let req = CreateOrderRequest {
            tax_rate: Some(dec("5")),
            ..Default::default()
        };
        let day = NaiveDate::from_ymd_opt(2026, 5, 4).expect("date");
        let defaults = OrderDefaults {
            currency: "eur".into(),
            tax_rate: dec("19"),
            today: day,
        };
        let order = req.into_order(
            Uuid::new_v4(),
            "SO-000002".into(),
            "Globex".into(),
            Uuid::new_v4(),
            defaults,
        );
        assert_eq!(order.order_date, day);
        assert_eq!(order.currency, "EUR");
        assert_eq!(order.tax_rate, dec("5"));
        assert!(order.quote_id.is_none());
    }
}
