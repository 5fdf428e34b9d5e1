use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::activities::Activity;
use crate::crm::deals::Deal;
use crate::sales::invoices::Invoice;
use crate::sales::totals::round_money;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordTotals {
    pub accounts: i64,
    pub contacts: i64,
    pub leads: i64,
    pub open_leads: i64,
    pub products: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub open_deals: usize,
    pub open_value: f64,
    pub weighted_value: f64,
    pub won_deals: usize,
    pub won_value: f64,
    pub lost_deals: usize,
    /// Won deals as a percentage of closed deals.
    pub win_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageSummary {
    pub stage: String,
    pub count: usize,
    pub value: f64,
    pub weighted_value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivitySummary {
    pub open_tasks: usize,
    pub my_open_tasks: usize,
    pub overdue: usize,
    pub upcoming_events: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverdueInvoices {
    pub count: usize,
    pub balance_by_currency: BTreeMap<String, BigDecimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub totals: RecordTotals,
    pub pipeline: PipelineSummary,
    pub deals_by_stage: Vec<StageSummary>,
    pub activities: ActivitySummary,
    pub overdue_invoices: OverdueInvoices,
    pub generated_at: DateTime<Utc>,
}

/// Everything the summary is computed from.
pub struct DashboardInputs<'a> {
    pub totals: RecordTotals,
    pub stage_order: &'a [String],
    pub deals: &'a [Deal],
    pub activities: &'a [Activity],
    pub invoices: &'a [Invoice],
}

impl DashboardSummary {
    pub fn compute(inputs: DashboardInputs<'_>, user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            totals: inputs.totals,
            pipeline: pipeline_summary(inputs.deals),
            deals_by_stage: deals_by_stage(inputs.deals, inputs.stage_order),
            activities: activity_summary(inputs.activities, user_id, now),
            overdue_invoices: overdue_invoices(inputs.invoices, now),
            generated_at: now,
        }
    }
}

fn pipeline_summary(deals: &[Deal]) -> PipelineSummary {
    let mut summary = PipelineSummary::default();
    for deal in deals {
        let value = deal.value.unwrap_or(0.0);
        match deal.won {
            None => {
                summary.open_deals += 1;
                summary.open_value += value;
                summary.weighted_value += deal.weighted_value();
            }
            Some(true) => {
                summary.won_deals += 1;
                summary.won_value += value;
            }
            Some(false) => summary.lost_deals += 1,
        }
    }
    let closed = summary.won_deals + summary.lost_deals;
    summary.win_rate = (closed > 0).then(|| summary.won_deals as f64 * 100.0 / closed as f64);
    summary
}

/// Open deals grouped by stage, in pipeline order. Stages with no open deals
/// are listed with zero counts; stages missing from the pipeline come last.
fn deals_by_stage(deals: &[Deal], stage_order: &[String]) -> Vec<StageSummary> {
    let mut stages: Vec<StageSummary> = stage_order
        .iter()
        .map(|stage| StageSummary {
            stage: stage.clone(),
            count: 0,
            value: 0.0,
            weighted_value: 0.0,
        })
        .collect();
    let mut extra: BTreeMap<String, StageSummary> = BTreeMap::new();

    for deal in deals.iter().filter(|d| d.is_open()) {
        let slot = match stages.iter_mut().find(|s| s.stage == deal.stage) {
            Some(slot) => slot,
            None => extra.entry(deal.stage.clone()).or_insert_with(|| StageSummary {
                stage: deal.stage.clone(),
                count: 0,
                value: 0.0,
                weighted_value: 0.0,
            }),
        };
        slot.count += 1;
        slot.value += deal.value.unwrap_or(0.0);
        slot.weighted_value += deal.weighted_value();
    }

    stages.extend(extra.into_values());
    stages
}

fn activity_summary(activities: &[Activity], user_id: Uuid, now: DateTime<Utc>) -> ActivitySummary {
    let mut summary = ActivitySummary::default();
    for activity in activities.iter().filter(|a| !a.is_done()) {
        if activity.kind == "task" {
            summary.open_tasks += 1;
            if activity.assigned_to.or(activity.owner_id) == Some(user_id) {
                summary.my_open_tasks += 1;
            }
        }
        if activity.is_overdue(now) {
            summary.overdue += 1;
        }
        if matches!(activity.kind.as_str(), "event" | "meeting")
            && activity.start_at.is_some_and(|start| start >= now)
        {
            summary.upcoming_events += 1;
        }
    }
    summary
}

fn overdue_invoices(invoices: &[Invoice], now: DateTime<Utc>) -> OverdueInvoices {
    let today = now.date_naive();
    let mut overdue = OverdueInvoices::default();
    for invoice in invoices.iter().filter(|i| i.is_overdue(today)) {
        overdue.count += 1;
        let balance = overdue
            .balance_by_currency
            .entry(invoice.currency.clone())
            .or_insert_with(BigDecimal::zero);
        *balance += &invoice.balance_due;
    }
    for balance in overdue.balance_by_currency.values_mut() {
        *balance = round_money(balance);
    }
    overdue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sales::invoices::tests::sample_invoice;
    use crate::sales::quotes::tests::dec;
    use chrono::Duration;

    fn deal(stage: &str, value: f64, probability: i32, won: Option<bool>) -> Deal {
        let now = Utc::now();
        Deal {
            id: Uuid::new_v4(),
            org_id: Uuid::nil(),
            lead_id: None,
            account_id: None,
            contact_id: None,
            name: format!("{stage} deal"),
            description: None,
            value: Some(value),
            currency: Some("USD".into()),
            stage_id: None,
            stage: stage.into(),
            probability,
            source: None,
            expected_close_date: None,
            actual_close_date: None,
            won,
            lost_reason: None,
            owner_id: None,
            tags: vec![],
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn activity(kind: &str, status: &str, assigned_to: Option<Uuid>) -> Activity {
        let now = Utc::now();
        Activity {
            id: Uuid::new_v4(),
            org_id: Uuid::nil(),
            kind: kind.into(),
            subject: "Follow up".into(),
            description: None,
            status: status.into(),
            priority: "normal".into(),
            due_date: None,
            start_at: None,
            end_at: None,
            location: None,
            account_id: None,
            contact_id: None,
            lead_id: None,
            deal_id: None,
            assigned_to,
            owner_id: None,
            completed_at: None,
            outcome: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_pipeline_open_and_weighted_value() {
        let deals = vec![
            deal("proposal", 1000.0, 50, None),
            deal("negotiation", 2000.0, 75, None),
            deal("won", 500.0, 100, Some(true)),
            deal("lost", 800.0, 0, Some(false)),
        ];
        let summary = pipeline_summary(&deals);
        assert_eq!(summary.open_deals, 2);
        assert!((summary.open_value - 3000.0).abs() < f64::EPSILON);
        assert!((summary.weighted_value - 2000.0).abs() < f64::EPSILON);
        assert_eq!(summary.won_deals, 1);
        assert_eq!(summary.win_rate, Some(50.0));
    }

    #[test]
    fn test_deals_by_stage_follows_pipeline_order() {
        let order = vec!["qualification".to_string(), "proposal".to_string()];
        let deals = vec![
            deal("proposal", 100.0, 50, None),
            deal("proposal", 300.0, 50, None),
            deal("legacy", 10.0, 10, None),
            deal("proposal", 999.0, 100, Some(true)),
        ];
        let stages = deals_by_stage(&deals, &order);
        let names: Vec<&str> = stages.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(names, vec!["qualification", "proposal", "legacy"]);
        assert_eq!(stages[0].count, 0);
        assert_eq!(stages[1].count, 2);
        assert!((stages[1].weighted_value - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_activity_counts() {
        let me = Uuid::new_v4();
        let now = Utc::now();
        let mut late = activity("task", "open", Some(me));
        late.due_date = Some(now - Duration::hours(2));
        let mut meeting = activity("meeting", "open", None);
        meeting.start_at = Some(now + Duration::days(1));
        let done = activity("task", "completed", Some(me));
        let other = activity("task", "in_progress", Some(Uuid::new_v4()));

        let summary = activity_summary(&[late, meeting, done, other], me, now);
        assert_eq!(summary.open_tasks, 2);
        assert_eq!(summary.my_open_tasks, 1);
        assert_eq!(summary.overdue, 1);
        assert_eq!(summary.upcoming_events, 1);
    }

    #[test]
    fn test_overdue_invoice_balances() {
        let now = Utc::now();
        let mut late = sample_invoice();
        late.status = "sent".into();
        late.due_date = now.date_naive() - Duration::days(10);
        let current = sample_invoice();

        let overdue = overdue_invoices(&[late, current], now);
        assert_eq!(overdue.count, 1);
        assert_eq!(overdue.balance_by_currency["USD"], dec("216.00"));
    }
}
