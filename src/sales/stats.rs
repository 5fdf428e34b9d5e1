use axum::{extract::State, routing::get, Json, Router};
use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use diesel::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::shared::error::ApiError;
use crate::core::shared::schema::{sales_orders, sales_quotes};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::run_blocking;
use crate::sales::invoices::{load_org_invoices, Invoice};
use crate::sales::orders::SalesOrder;
use crate::sales::quotes::Quote;
use crate::sales::today;
use crate::sales::totals::round_money;
use crate::security::auth_api::AuthenticatedUser;

/// Money figures for one currency. Invoices in different currencies are
/// never added together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoneySummary {
    pub invoiced: BigDecimal,
    pub collected: BigDecimal,
    pub outstanding: BigDecimal,
    pub overdue: BigDecimal,
}

impl Default for MoneySummary {
    fn default() -> Self {
        let zero = round_money(&BigDecimal::zero());
        Self {
            invoiced: zero.clone(),
            collected: zero.clone(),
            outstanding: zero.clone(),
            overdue: zero,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SalesStats {
    pub quotes_by_status: BTreeMap<String, usize>,
    pub orders_by_status: BTreeMap<String, usize>,
    pub invoices_by_status: BTreeMap<String, usize>,
    /// Share of decided quotes that were accepted, as a percentage.
    pub quote_win_rate: Option<f64>,
    pub overdue_invoices: usize,
    pub by_currency: BTreeMap<String, MoneySummary>,
}

fn count_by<'a>(statuses: impl Iterator<Item = &'a str>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for status in statuses {
        *counts.entry(status.to_string()).or_insert(0) += 1;
    }
    counts
}

impl SalesStats {
    pub fn compute(quotes: &[Quote], orders: &[SalesOrder], invoices: &[Invoice], today: NaiveDate) -> Self {
        let quotes_by_status = count_by(quotes.iter().map(|q| q.status.as_str()));
        let won = ["accepted", "converted"]
            .iter()
            .filter_map(|s| quotes_by_status.get(*s))
            .sum::<usize>();
        let lost = quotes_by_status.get("rejected").copied().unwrap_or(0);
        let quote_win_rate = (won + lost > 0).then(|| won as f64 * 100.0 / (won + lost) as f64);

        let mut by_currency: BTreeMap<String, MoneySummary> = BTreeMap::new();
        let mut overdue_invoices = 0;
        for invoice in invoices.iter().filter(|i| i.status != "void" && i.status != "draft") {
            let summary = by_currency.entry(invoice.currency.clone()).or_default();
            summary.invoiced += &invoice.total;
            summary.collected += &invoice.amount_paid;
            summary.outstanding += &invoice.balance_due;
            if invoice.is_overdue(today) {
                summary.overdue += &invoice.balance_due;
                overdue_invoices += 1;
            }
        }
        for summary in by_currency.values_mut() {
            summary.invoiced = round_money(&summary.invoiced);
            summary.collected = round_money(&summary.collected);
            summary.outstanding = round_money(&summary.outstanding);
            summary.overdue = round_money(&summary.overdue);
        }

        Self {
            quotes_by_status,
            orders_by_status: count_by(orders.iter().map(|o| o.status.as_str())),
            invoices_by_status: count_by(invoices.iter().map(|i| i.status.as_str())),
            quote_win_rate,
            overdue_invoices,
            by_currency,
        }
    }
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route("/api/sales/stats", get(get_sales_stats))
}

pub async fn get_sales_stats(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<SalesStats>, ApiError> {
    let org_id = user.org_id()?;
    let stats = run_blocking(&state.conn, move |conn| {
        let quotes = sales_quotes::table
            .filter(sales_quotes::org_id.eq(org_id))
            .filter(sales_quotes::deleted_at.is_null())
            .select(Quote::as_select())
            .load::<Quote>(conn)?;
        let orders = sales_orders::table
            .filter(sales_orders::org_id.eq(org_id))
            .filter(sales_orders::deleted_at.is_null())
            .select(SalesOrder::as_select())
            .load::<SalesOrder>(conn)?;
        let invoices = load_org_invoices(conn, org_id)?;
        Ok(SalesStats::compute(&quotes, &orders, &invoices, today()))
    })
    .await?;
    Ok(Json(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sales::invoices::tests::sample_invoice;
    use crate::sales::orders::tests::sample_order;
    use crate::sales::quotes::tests::{dec, sample_quote};
    use chrono::{Duration, Utc};

    #[test]
    fn test_empty_stats() {
        let stats = SalesStats::compute(&[], &[], &[], today());
        assert!(stats.quote_win_rate.is_none());
        assert!(stats.by_currency.is_empty());
        assert_eq!(stats.overdue_invoices, 0);
    }

    #[test]
    fn test_win_rate_counts_decided_quotes() {
        let mut accepted = sample_quote();
        accepted.status = "accepted".into();
        let mut converted = sample_quote();
        converted.status = "converted".into();
        let mut rejected = sample_quote();
        rejected.status = "rejected".into();
        let open = sample_quote();

        let stats = SalesStats::compute(&[accepted, converted, rejected, open], &[], &[], today());
        let rate = stats.quote_win_rate.expect("rate");
        assert!((rate - 66.666).abs() < 0.01);
        assert_eq!(stats.quotes_by_status.get("draft"), Some(&1));
    }

    #[test]
    fn test_money_by_currency() {
        let day = Utc::now().date_naive();
        let mut paid_part = sample_invoice();
        paid_part.status = "sent".into();
        paid_part.due_date = day - Duration::days(5);
        paid_part
            .apply_payment(&dec("16.00"), Utc::now())
            .expect("payment");

        let mut euro = sample_invoice();
        euro.currency = "EUR".into();
        euro.status = "sent".into();
        euro.due_date = day + Duration::days(5);

        let draft = sample_invoice();

        let stats = SalesStats::compute(&[], &[sample_order()], &[paid_part, euro, draft], day);
        let usd = &stats.by_currency["USD"];
        assert_eq!(usd.invoiced, dec("216.00"));
        assert_eq!(usd.collected, dec("16.00"));
        assert_eq!(usd.outstanding, dec("200.00"));
        assert_eq!(usd.overdue, dec("200.00"));
        assert!(stats.by_currency["EUR"].overdue.is_zero());
        assert_eq!(stats.overdue_invoices, 1);
        assert_eq!(stats.invoices_by_status.get("draft"), Some(&1));
        assert_eq!(stats.orders_by_status.get("draft"), Some(&1));
    }
}
