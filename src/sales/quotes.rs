use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, NaiveDate, Utc};
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
use crate::core::shared::schema::{sales_orders, sales_quotes};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{document_number, non_blank, run_blocking};
use crate::crm::ensure_deal;
use crate::sales::line_items::{
    self, amounts, build_lines, insert_lines, load_lines, DocumentType, LineItem, LineItemInput,
};
use crate::sales::orders::{OrderDocument, SalesOrder};
use crate::sales::registry::QUOTE_ADMIN;
use crate::sales::status::{ensure_draft, next_status, QUOTE_TRANSITIONS};
use crate::sales::totals::{round_money, DocumentTotals, Priced};
use crate::sales::{default_tax_rate, resolve_customer, today, validate_pricing};
use crate::security::auth_api::{Action, AuthenticatedUser, Resource};
use crate::settings::system::{setting_i64, QUOTE_VALIDITY_DAYS};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = sales_quotes)]
#[diesel(treat_none_as_null = true)]
pub struct Quote {
    pub id: Uuid,
    pub org_id: Uuid,
    pub quote_number: String,
    pub account_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub deal_id: Option<Uuid>,
    pub customer_name: String,
    pub status: String,
    pub issue_date: NaiveDate,
    pub valid_until: NaiveDate,
    pub currency: String,
    pub subtotal: BigDecimal,
    pub discount_percent: BigDecimal,
    pub discount_amount: BigDecimal,
    pub tax_rate: BigDecimal,
    pub tax_amount: BigDecimal,
    pub total: BigDecimal,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub owner_id: Option<Uuid>,
    pub sent_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub converted_order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Quote {
    /// Open quotes past their validity date can no longer be accepted.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        matches!(self.status.as_str(), "draft" | "sent") && self.valid_until < today
    }

    fn validate(&self) -> Result<(), ApiError> {
        validate_pricing(&self.currency, &self.discount_percent, &self.tax_rate)?;
        if self.customer_name.trim().is_empty() {
            return Err(ApiError::validation("customer_name is required"));
        }
        if self.valid_until < self.issue_date {
            return Err(ApiError::validation("valid_until cannot be before issue_date"));
        }
        Ok(())
    }

    /// Moves the quote through `action`, stamping the matching timestamp.
    fn apply_action(&mut self, action: &str, now: DateTime<Utc>) -> Result<(), ApiError> {
        let next = next_status(QUOTE_TRANSITIONS, "quote", action, &self.status)?;
        if action == "accept" && self.is_expired(now.date_naive()) {
            return Err(ApiError::Conflict(format!(
                "Quote {} expired on {}",
                self.quote_number, self.valid_until
            )));
        }
        match next {
            "sent" => self.sent_at = Some(now),
            "accepted" => self.accepted_at = Some(now),
            "rejected" => self.rejected_at = Some(now),
            _ => {}
        }
        self.status = next.to_string();
        self.updated_at = now;
        Ok(())
    }
}

impl Priced for Quote {
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

impl Listable for Quote {
    const SEARCH_FIELDS: &'static [&'static str] = QUOTE_ADMIN.search_fields;
    const SORT_FIELDS: &'static [&'static str] = QUOTE_ADMIN.list_display;
}

impl Editable for Quote {
    const ENTITY: &'static str = QUOTE_ADMIN.verbose_name;
    const TABS: &'static [TabSpec] = QUOTE_ADMIN.fieldsets;
    const EDITABLE_FIELDS: &'static [&'static str] = &[
        "customer_name",
        "account_id",
        "contact_id",
        "deal_id",
        "issue_date",
        "valid_until",
        "currency",
        "discount_percent",
        "tax_rate",
        "notes",
        "terms",
        "owner_id",
    ];
    const REQUIRED_FIELDS: &'static [&'static str] =
        &["customer_name", "issue_date", "valid_until", "currency"];

    fn record_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuoteDocument {
    #[serde(flatten)]
    pub quote: Quote,
    pub lines: Vec<LineItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateQuoteRequest {
    pub account_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub deal_id: Option<Uuid>,
    pub customer_name: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub currency: Option<String>,
    pub discount_percent: Option<BigDecimal>,
    pub tax_rate: Option<BigDecimal>,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub owner_id: Option<Uuid>,
    #[serde(default)]
    pub lines: Vec<LineItemInput>,
}

/// Company-level values a new quote falls back on.
struct QuoteDefaults {
    currency: String,
    tax_rate: BigDecimal,
    validity_days: i64,
    today: NaiveDate,
}

impl CreateQuoteRequest {
    fn into_quote(
        self,
        org_id: Uuid,
        quote_number: String,
        customer_name: String,
        owner_id: Uuid,
        defaults: QuoteDefaults,
    ) -> Quote {
        let now = Utc::now();
        let issue_date = self.issue_date.unwrap_or(defaults.today);
        Quote {
            id: Uuid::new_v4(),
            org_id,
            quote_number,
            account_id: self.account_id,
            contact_id: self.contact_id,
            deal_id: self.deal_id,
            customer_name,
            status: "draft".to_string(),
            issue_date,
            valid_until: self
                .valid_until
                .unwrap_or(issue_date + Duration::days(defaults.validity_days)),
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
            terms: non_blank(self.terms),
            owner_id: self.owner_id.or(Some(owner_id)),
            sent_at: None,
            accepted_at: None,
            rejected_at: None,
            converted_order_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReplaceLinesRequest {
    pub lines: Vec<LineItemInput>,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/sales/quotes", get(list_quotes).post(create_quote))
        .route(
            "/api/sales/quotes/{id}",
            get(get_quote)
                .put(update_quote)
                .patch(update_quote)
                .delete(delete_quote),
        )
        .route("/api/sales/quotes/{id}/detail", get(get_quote_detail))
        .route("/api/sales/quotes/{id}/form", get(get_quote_form))
        .route("/api/sales/quotes/{id}/lines", get(get_quote_lines).put(replace_quote_lines))
        .route("/api/sales/quotes/{id}/send", post(send_quote))
        .route("/api/sales/quotes/{id}/accept", post(accept_quote))
        .route("/api/sales/quotes/{id}/reject", post(reject_quote))
        .route("/api/sales/quotes/{id}/convert", post(convert_quote))
}

pub(crate) fn load_quote(conn: &mut PgConnection, org_id: Uuid, id: Uuid) -> Result<Quote, ApiError> {
    sales_quotes::table
        .filter(sales_quotes::id.eq(id))
        .filter(sales_quotes::org_id.eq(org_id))
        .filter(sales_quotes::deleted_at.is_null())
        .select(Quote::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Quote"))
}

fn next_quote_number(conn: &mut PgConnection, org_id: Uuid) -> QueryResult<String> {
    let existing: i64 = sales_quotes::table
        .filter(sales_quotes::org_id.eq(org_id))
        .count()
        .get_result(conn)?;
    Ok(document_number("QTE", existing))
}

fn save_quote(conn: &mut PgConnection, quote: &Quote) -> Result<Quote, ApiError> {
    Ok(diesel::update(sales_quotes::table.find(quote.id))
        .set(quote)
        .returning(Quote::as_returning())
        .get_result(conn)?)
}

pub async fn list_quotes(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(params): Query<ListParams>,
    Query(filters): Query<HashMap<String, String>>,
) -> Result<Json<ListResponse<Quote>>, ApiError> {
    let org_id = user.org_id()?;
    let rows = run_blocking(&state.conn, move |conn| {
        Ok(sales_quotes::table
            .filter(sales_quotes::org_id.eq(org_id))
            .filter(sales_quotes::deleted_at.is_null())
            .order(sales_quotes::created_at.asc())
            .select(Quote::as_select())
            .load::<Quote>(conn)?)
    })
    .await?;
    let rows = QUOTE_ADMIN.filter_rows(rows, &filters)?;
    Ok(Json(listing::apply(rows, &QUOTE_ADMIN.list_params(params))?))
}

pub async fn create_quote(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(mut req): Json<CreateQuoteRequest>,
) -> Result<(StatusCode, Json<QuoteDocument>), ApiError> {
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
            let defaults = QuoteDefaults {
                currency: load_company(conn, org_id)?.default_currency,
                tax_rate: default_tax_rate(conn, org_id)?,
                validity_days: setting_i64(conn, org_id, QUOTE_VALIDITY_DAYS, 30)?,
                today: today(),
            };
            let number = next_quote_number(conn, org_id)?;
            let inputs = std::mem::take(&mut req.lines);
            let mut quote = req.into_quote(org_id, number, customer.name, owner, defaults);
            let lines = build_lines(conn, org_id, DocumentType::Quote, quote.id, inputs)?;
            quote.recalculate(amounts(&lines));
            quote.validate()?;

            let quote = diesel::insert_into(sales_quotes::table)
                .values(&quote)
                .returning(Quote::as_returning())
                .get_result(conn)?;
            insert_lines(conn, &lines)?;
            Ok(QuoteDocument { quote, lines })
        })
    })
    .await?;
    info!(
        "Quote {} created by {} ({} {})",
        document.quote.quote_number, user.username, document.quote.total, document.quote.currency
    );
    Ok((StatusCode::CREATED, Json(document)))
}

pub async fn get_quote(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<QuoteDocument>, ApiError> {
    let org_id = user.org_id()?;
    let document = run_blocking(&state.conn, move |conn| {
        let quote = load_quote(conn, org_id, id)?;
        let lines = load_lines(conn, DocumentType::Quote, id)?;
        Ok(QuoteDocument { quote, lines })
    })
    .await?;
    Ok(Json(document))
}

pub async fn get_quote_detail(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DetailView>, ApiError> {
    let org_id = user.org_id()?;
    let quote = run_blocking(&state.conn, move |conn| load_quote(conn, org_id, id)).await?;
    Ok(Json(DetailView::build(&quote)?))
}

pub async fn get_quote_form(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<EditForm>, ApiError> {
    let org_id = user.org_id()?;
    let quote = run_blocking(&state.conn, move |conn| load_quote(conn, org_id, id)).await?;
    Ok(Json(EditForm::prepopulate(&quote)?))
}

pub async fn update_quote(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(input): Json<Map<String, Value>>,
) -> Result<Json<Quote>, ApiError> {
    let org_id = user.org_id()?;
    let updated = run_blocking(&state.conn, move |conn| {
        let current = load_quote(conn, org_id, id)?;
        ensure_draft("quote", &current.status)?;
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
        let lines = load_lines(conn, DocumentType::Quote, id)?;
        updated.recalculate(amounts(&lines));
        updated.updated_at = Utc::now();
        save_quote(conn, &updated)
    })
    .await?;
    Ok(Json(updated))
}

pub async fn get_quote_lines(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<LineItem>>, ApiError> {
    let org_id = user.org_id()?;
    let lines = run_blocking(&state.conn, move |conn| {
        load_quote(conn, org_id, id)?;
        Ok(load_lines(conn, DocumentType::Quote, id)?)
    })
    .await?;
    Ok(Json(lines))
}

pub async fn replace_quote_lines(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<ReplaceLinesRequest>,
) -> Result<Json<QuoteDocument>, ApiError> {
    let org_id = user.org_id()?;
    let document = run_blocking(&state.conn, move |conn| {
        conn.transaction::<_, ApiError, _>(|conn| {
            let mut quote = load_quote(conn, org_id, id)?;
            ensure_draft("quote", &quote.status)?;
            let lines = line_items::replace_lines(conn, org_id, DocumentType::Quote, id, req.lines)?;
            quote.recalculate(amounts(&lines));
            quote.updated_at = Utc::now();
            let quote = save_quote(conn, &quote)?;
            Ok(QuoteDocument { quote, lines })
        })
    })
    .await?;
    Ok(Json(document))
}

async fn transition_quote(
    state: Arc<AppState>,
    user: AuthenticatedUser,
    id: Uuid,
    action: &'static str,
) -> Result<Json<Quote>, ApiError> {
    let org_id = user.org_id()?;
    let quote = run_blocking(&state.conn, move |conn| {
        let mut quote = load_quote(conn, org_id, id)?;
        quote.apply_action(action, Utc::now())?;
        save_quote(conn, &quote)
    })
    .await?;
    info!(
        "Quote {} is now {} ({})",
        quote.quote_number, quote.status, user.username
    );
    Ok(Json(quote))
}

pub async fn send_quote(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Quote>, ApiError> {
    transition_quote(state, user, id, "send").await
}

pub async fn accept_quote(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Quote>, ApiError> {
    transition_quote(state, user, id, "accept").await
}

pub async fn reject_quote(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Quote>, ApiError> {
    transition_quote(state, user, id, "reject").await
}

/// Turns an accepted quote into a draft sales order carrying its lines.
pub async fn convert_quote(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<OrderDocument>), ApiError> {
    user.require(Resource::Orders, Action::Add)?;
    let org_id = user.org_id()?;
    let owner = user.user_id;
    let document = run_blocking(&state.conn, move |conn| {
        conn.transaction::<_, ApiError, _>(|conn| {
            let mut quote = load_quote(conn, org_id, id)?;
            let now = Utc::now();
            quote.apply_action("convert", now)?;

            let number = crate::sales::orders::next_order_number(conn, org_id)?;
            let order = SalesOrder::from_quote(&quote, number, owner, now);
            let order = diesel::insert_into(sales_orders::table)
                .values(&order)
                .returning(SalesOrder::as_returning())
                .get_result(conn)?;
            let lines = line_items::copy_lines(
                conn,
                (DocumentType::Quote, quote.id),
                (DocumentType::Order, order.id),
            )?;

            quote.converted_order_id = Some(order.id);
            save_quote(conn, &quote)?;
            Ok(OrderDocument { order, lines })
        })
    })
    .await?;
    info!(
        "Quote {id} converted to order {} by {}",
        document.order.order_number, user.username
    );
    Ok((StatusCode::CREATED, Json(document)))
}

/// Converted quotes stay on record as the origin of their order.
pub async fn delete_quote(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let org_id = user.org_id()?;
    run_blocking(&state.conn, move |conn| {
        let quote = load_quote(conn, org_id, id)?;
        if quote.status == "converted" {
            return Err(ApiError::Conflict(format!(
                "Quote {} has been converted to an order",
                quote.quote_number
            )));
        }
        diesel::update(sales_quotes::table.find(id))
            .set(sales_quotes::deleted_at.eq(Some(Utc::now())))
            .execute(conn)?;
        Ok(())
    })
    .await?;
    info!("Quote {id} deleted by {}", user.username);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::str::FromStr;

    pub(crate) fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).expect("decimal")
    }

    pub(crate) fn sample_quote() -> Quote {
        let req = CreateQuoteRequest {
            discount_percent: Some(dec("10")),
            ..Default::default()
        };
        let defaults = QuoteDefaults {
            currency: "usd".into(),
            tax_rate: dec("20"),
            validity_days: 30,
            today: NaiveDate::from_ymd_opt(2026, 3, 1).expect("date"),
        };
        req.into_quote(
            Uuid::new_v4(),
            "QTE-000001".into(),
            "Acme".into(),
            Uuid::new_v4(),
            defaults,
        )
    }

    #[test]
    fn test_defaults_from_company_settings() {
        let quote = sample_quote();
        assert_eq!(quote.status, "draft");
        assert_eq!(quote.currency, "USD");
        assert_eq!(quote.tax_rate, dec("20"));
        assert_eq!(
            quote.valid_until,
            NaiveDate::from_ymd_opt(2026, 3, 31).expect("date")
        );
        assert!(quote.owner_id.is_some());
        assert!(quote.validate().is_ok());
    }

    #[test]
    fn test_recalculate_from_lines() {
        let mut quote = sample_quote();
        quote.recalculate([dec("100.00"), dec("50.00")].iter());
        assert_eq!(quote.subtotal, dec("150.00"));
        assert_eq!(quote.discount_amount, dec("15.00"));
        assert_eq!(quote.tax_amount, dec("27.00"));
        assert_eq!(quote.total, dec("162.00"));
    }

    #[test]
    fn test_accept_stamps_and_rejects_expired() {
        let mut quote = sample_quote();
        let during = Utc::now();
        quote.valid_until = during.date_naive();
        quote.apply_action("send", during).expect("send");
        assert!(quote.sent_at.is_some());
        quote.apply_action("accept", during).expect("accept");
        assert_eq!(quote.status, "accepted");
        assert!(quote.accepted_at.is_some());

        let mut stale = sample_quote();
        stale.valid_until = during.date_naive() - Duration::days(1);
        assert!(matches!(
            stale.apply_action("accept", during),
            Err(ApiError::Conflict(_))
        ));
        assert_eq!(stale.status, "draft");
    }

    #[test]
    fn test_validity_must_follow_issue_date() {
        let mut quote = sample_quote();
        quote.valid_until = quote.issue_date - Duration::days(1);
        assert!(quote.validate().is_err());
    }

    #[test]
    fn test_registry_fields_exist_on_quote() {
        let value = serde_json::to_value(sample_quote()).expect("json");
        for field in QUOTE_ADMIN
            .list_display
            .iter()
            .chain(QUOTE_ADMIN.list_filter)
            .chain(QUOTE_ADMIN.search_fields)
        {
            assert!(value.get(*field).is_some(), "missing {field}");
        }
    }

    #[test]
    fn test_totals_are_read_only_in_form() {
        let mut form = EditForm::prepopulate(&sample_quote()).expect("form");
        let mut input = Map::new();
        input.insert("total".into(), Value::String("1.00".into()));
        assert!(form.apply_input(input).is_err());
    }
}
