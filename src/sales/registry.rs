//! Declarative admin registrations for sales documents.
//!
//! Each [`ModelAdmin`] names the columns a list shows, the fields it can be
//! filtered and searched on, its default ordering and the fieldsets its detail
//! view is split into. The sales list endpoints and detail views read their
//! configuration from here, and the registry itself is served read-only so a
//! frontend can build generic admin screens.

use axum::{extract::Path, routing::get, Json, Router};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::shared::detail::TabSpec;
use crate::core::shared::error::ApiError;
use crate::core::shared::listing::ListParams;
use crate::core::shared::state::AppState;
use crate::security::auth_api::AuthenticatedUser;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModelAdmin {
    pub model: &'static str,
    pub verbose_name: &'static str,
    pub verbose_name_plural: &'static str,
    pub list_display: &'static [&'static str],
    pub list_filter: &'static [&'static str],
    pub search_fields: &'static [&'static str],
    pub ordering: &'static str,
    pub readonly_fields: &'static [&'static str],
    pub fieldsets: &'static [TabSpec],
}

const TOTALS_FIELDS: &[&str] = &[
    "currency",
    "subtotal",
    "discount_percent",
    "discount_amount",
    "tax_rate",
    "tax_amount",
    "total",
];

pub const QUOTE_ADMIN: ModelAdmin = ModelAdmin {
    model: "quote",
    verbose_name: "Quote",
    verbose_name_plural: "Quotes",
    list_display: &[
        "quote_number",
        "customer_name",
        "status",
        "issue_date",
        "valid_until",
        "total",
        "created_at",
    ],
    list_filter: &["status", "currency", "account_id", "deal_id", "owner_id"],
    search_fields: &["quote_number", "customer_name", "notes"],
    ordering: "-created_at",
    readonly_fields: &[
        "quote_number",
        "status",
        "subtotal",
        "discount_amount",
        "tax_amount",
        "total",
        "sent_at",
        "accepted_at",
        "rejected_at",
        "converted_order_id",
    ],
    fieldsets: &[
        TabSpec {
            name: "Quote",
            fields: &[
                "quote_number",
                "customer_name",
                "account_id",
                "contact_id",
                "deal_id",
                "status",
                "issue_date",
                "valid_until",
                "owner_id",
            ],
        },
        TabSpec {
            name: "Totals",
            fields: TOTALS_FIELDS,
        },
        TabSpec {
            name: "Terms",
            fields: &["notes", "terms"],
        },
        TabSpec {
            name: "History",
            fields: &[
                "sent_at",
                "accepted_at",
                "rejected_at",
                "converted_order_id",
                "created_at",
                "updated_at",
            ],
        },
    ],
};

pub const ORDER_ADMIN: ModelAdmin = ModelAdmin {
    model: "order",
    verbose_name: "Sales order",
    verbose_name_plural: "Sales orders",
    list_display: &[
        "order_number",
        "customer_name",
        "status",
        "order_date",
        "expected_delivery_date",
        "total",
        "created_at",
    ],
    list_filter: &["status", "currency", "account_id", "quote_id", "owner_id"],
    search_fields: &["order_number", "customer_name", "notes"],
    ordering: "-created_at",
    readonly_fields: &[
        "order_number",
        "quote_id",
        "status",
        "subtotal",
        "discount_amount",
        "tax_amount",
        "total",
        "confirmed_at",
        "fulfilled_at",
        "cancelled_at",
    ],
    fieldsets: &[
        TabSpec {
            name: "Order",
            fields: &[
                "order_number",
                "quote_id",
                "customer_name",
                "account_id",
                "contact_id",
                "deal_id",
                "status",
                "order_date",
                "expected_delivery_date",
                "owner_id",
            ],
        },
        TabSpec {
            name: "Totals",
            fields: TOTALS_FIELDS,
        },
        TabSpec {
            name: "Notes",
            fields: &["notes"],
        },
        TabSpec {
            name: "History",
            fields: &[
                "confirmed_at",
                "fulfilled_at",
                "cancelled_at",
                "created_at",
                "updated_at",
            ],
        },
    ],
};

pub const INVOICE_ADMIN: ModelAdmin = ModelAdmin {
    model: "invoice",
    verbose_name: "Invoice",
    verbose_name_plural: "Invoices",
    list_display: &[
        "invoice_number",
        "customer_name",
        "status",
        "issue_date",
        "due_date",
        "total",
        "amount_paid",
        "balance_due",
        "created_at",
    ],
    list_filter: &["status", "currency", "account_id", "order_id", "owner_id"],
    search_fields: &["invoice_number", "customer_name", "customer_email", "notes"],
    ordering: "-issue_date",
    readonly_fields: &[
        "invoice_number",
        "order_id",
        "status",
        "subtotal",
        "discount_amount",
        "tax_amount",
        "total",
        "amount_paid",
        "balance_due",
        "sent_at",
        "paid_at",
        "voided_at",
    ],
    fieldsets: &[
        TabSpec {
            name: "Invoice",
            fields: &[
                "invoice_number",
                "order_id",
                "customer_name",
                "customer_email",
                "account_id",
                "contact_id",
                "status",
                "issue_date",
                "due_date",
                "owner_id",
            ],
        },
        TabSpec {
            name: "Totals",
            fields: &[
                "currency",
                "subtotal",
                "discount_percent",
                "discount_amount",
                "tax_rate",
                "tax_amount",
                "total",
                "amount_paid",
                "balance_due",
            ],
        },
        TabSpec {
            name: "Terms",
            fields: &["notes", "terms"],
        },
        TabSpec {
            name: "History",
            fields: &["sent_at", "paid_at", "voided_at", "created_at", "updated_at"],
        },
    ],
};

pub const PAYMENT_ADMIN: ModelAdmin = ModelAdmin {
    model: "payment",
    verbose_name: "Payment",
    verbose_name_plural: "Payments",
    list_display: &[
        "payment_number",
        "invoice_id",
        "amount",
        "currency",
        "payment_method",
        "status",
        "paid_at",
    ],
    list_filter: &["status", "payment_method", "invoice_id", "currency"],
    search_fields: &["payment_number", "reference", "notes"],
    ordering: "-paid_at",
    readonly_fields: &[
        "payment_number",
        "invoice_id",
        "amount",
        "currency",
        "status",
        "recorded_by",
        "refunded_at",
    ],
    fieldsets: &[
        TabSpec {
            name: "Payment",
            fields: &[
                "payment_number",
                "invoice_id",
                "amount",
                "currency",
                "payment_method",
                "reference",
                "status",
                "paid_at",
            ],
        },
        TabSpec {
            name: "Notes",
            fields: &["notes"],
        },
        TabSpec {
            name: "History",
            fields: &["recorded_by", "refunded_at", "created_at"],
        },
    ],
};

pub const REGISTRY: &[ModelAdmin] = &[QUOTE_ADMIN, ORDER_ADMIN, INVOICE_ADMIN, PAYMENT_ADMIN];

pub fn lookup(model: &str) -> Option<&'static ModelAdmin> {
    let model = model.to_lowercase();
    REGISTRY.iter().find(|admin| admin.model == model)
}

impl ModelAdmin {
    /// List parameters with the registered ordering filled in when the client
    /// did not ask for one.
    pub fn list_params(&self, mut params: ListParams) -> ListParams {
        if params.ordering.as_deref().map_or(true, |o| o.trim().is_empty()) {
            params.ordering = Some(self.ordering.to_string());
        }
        params
    }

    /// Keeps the rows whose `list_filter` fields equal the query values given
    /// for them. Query keys that are not registered filters are ignored.
    pub fn filter_rows<T: Serialize>(
        &self,
        rows: Vec<T>,
        query: &HashMap<String, String>,
    ) -> Result<Vec<T>, ApiError> {
        let active: Vec<(&str, &str)> = self
            .list_filter
            .iter()
            .filter_map(|field| {
                query
                    .get(*field)
                    .map(|v| v.trim())
                    .filter(|v| !v.is_empty())
                    .map(|v| (*field, v))
            })
            .collect();
        if active.is_empty() {
            return Ok(rows);
        }

        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            let value = serde_json::to_value(&row)
                .map_err(|e| ApiError::Internal(format!("Failed to serialize row: {e}")))?;
            if active
                .iter()
                .all(|(field, wanted)| field_matches(value.get(*field), wanted))
            {
                kept.push(row);
            }
        }
        Ok(kept)
    }
}

fn field_matches(value: Option<&Value>, wanted: &str) -> bool {
    match value {
        Some(Value::String(s)) => s.eq_ignore_ascii_case(wanted),
        Some(Value::Bool(b)) => b.to_string() == wanted.to_lowercase(),
        Some(Value::Number(n)) => n.to_string() == wanted,
        Some(Value::Null) | None => wanted.eq_ignore_ascii_case("null"),
        Some(_) => false,
    }
}

pub fn configure_registry_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/admin/registry", get(list_registry))
        .route("/api/admin/registry/{model}", get(get_registration))
}

pub async fn list_registry(_user: AuthenticatedUser) -> Json<&'static [ModelAdmin]> {
    Json(REGISTRY)
}

pub async fn get_registration(
    _user: AuthenticatedUser,
    Path(model): Path<String>,
) -> Result<Json<&'static ModelAdmin>, ApiError> {
    lookup(&model)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Model registration"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Row {
        status: &'static str,
        owner_id: Option<&'static str>,
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(lookup("Invoice").map(|a| a.model), Some("invoice"));
        assert!(lookup("ticket").is_none());
    }

    #[test]
    fn test_registrations_are_consistent() {
        for admin in REGISTRY {
            let fieldset_fields: Vec<&str> = admin
                .fieldsets
                .iter()
                .flat_map(|tab| tab.fields.iter().copied())
                .collect();
            for field in admin.list_display.iter().chain(admin.readonly_fields) {
                assert!(
                    fieldset_fields.contains(field) || *field == "created_at",
                    "{}: {field} is not in any fieldset",
                    admin.model
                );
            }
            let column = admin.ordering.trim_start_matches('-');
            assert!(admin.list_display.contains(&column), "{}", admin.model);
        }
    }

    #[test]
    fn test_filter_rows_uses_registered_fields_only() {
        let rows = vec![
            Row { status: "draft", owner_id: None },
            Row { status: "sent", owner_id: Some("u1") },
        ];
        let kept = QUOTE_ADMIN
            .filter_rows(rows, &query(&[("status", "SENT"), ("customer_name", "x")]))
            .expect("filter");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].status, "sent");
    }

    #[test]
    fn test_filter_rows_matches_null() {
        let rows = vec![
            Row { status: "draft", owner_id: None },
            Row { status: "draft", owner_id: Some("u1") },
        ];
        let kept = QUOTE_ADMIN
            .filter_rows(rows, &query(&[("owner_id", "null")]))
            .expect("filter");
        assert_eq!(kept.len(), 1);
        assert!(kept[0].owner_id.is_none());
    }

    #[test]
    fn test_default_ordering() {
        let params = INVOICE_ADMIN.list_params(ListParams::default());
        assert_eq!(params.ordering.as_deref(), Some("-issue_date"));
        let explicit = INVOICE_ADMIN.list_params(ListParams {
            ordering: Some("total".into()),
            ..Default::default()
        });
        assert_eq!(explicit.ordering.as_deref(), Some("total"));
    }
}
