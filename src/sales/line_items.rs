use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::core::shared::error::ApiError;
use crate::core::shared::schema::{products, sales_line_items};
use crate::core::shared::utils::non_blank;
use crate::products::Product;
use crate::sales::totals::{line_amount, round_money};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Quote,
    Order,
    Invoice,
}

impl DocumentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Order => "order",
            Self::Invoice => "invoice",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = sales_line_items)]
pub struct LineItem {
    pub id: Uuid,
    pub document_type: String,
    pub document_id: Uuid,
    pub product_id: Option<Uuid>,
    pub description: String,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    pub discount_percent: BigDecimal,
    pub amount: BigDecimal,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
}

/// A line as submitted by a client. Lines that reference a product inherit its
/// name and price unless they override them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LineItemInput {
    pub product_id: Option<Uuid>,
    pub description: Option<String>,
    pub quantity: Option<BigDecimal>,
    pub unit_price: Option<BigDecimal>,
    pub discount_percent: Option<BigDecimal>,
}

impl LineItemInput {
    fn into_line(
        self,
        product: Option<&Product>,
        document: DocumentType,
        document_id: Uuid,
        position: usize,
    ) -> Result<LineItem, ApiError> {
        let row = position + 1;
        let description = non_blank(self.description)
            .or_else(|| product.map(|p| p.name.clone()))
            .ok_or_else(|| ApiError::validation(format!("Line {row}: description is required")))?;
        let quantity = self.quantity.unwrap_or_else(|| BigDecimal::from(1));
        if quantity <= BigDecimal::zero() {
            return Err(ApiError::validation(format!(
                "Line {row}: quantity must be greater than zero"
            )));
        }
        let unit_price = self
            .unit_price
            .or_else(|| product.map(|p| p.unit_price.clone()))
            .ok_or_else(|| ApiError::validation(format!("Line {row}: unit_price is required")))?;
        if unit_price < BigDecimal::zero() {
            return Err(ApiError::validation(format!(
                "Line {row}: unit_price cannot be negative"
            )));
        }
        let discount_percent = self.discount_percent.unwrap_or_else(BigDecimal::zero);
        if discount_percent < BigDecimal::zero() || discount_percent > BigDecimal::from(100) {
            return Err(ApiError::validation(format!(
                "Line {row}: discount_percent must be between 0 and 100"
            )));
        }

        Ok(LineItem {
            id: Uuid::new_v4(),
            document_type: document.as_str().to_string(),
            document_id,
            product_id: product.map(|p| p.id),
            amount: line_amount(&quantity, &unit_price, &discount_percent),
            description,
            quantity,
            unit_price: round_money(&unit_price),
            discount_percent,
            sort_order: i32::try_from(position).unwrap_or(i32::MAX),
            created_at: Utc::now(),
        })
    }
}

pub fn amounts(lines: &[LineItem]) -> impl Iterator<Item = &BigDecimal> {
    lines.iter().map(|line| &line.amount)
}

/// Turns client input into priced lines, resolving referenced products within
/// the company. Deleted or inactive products are rejected.
pub fn build_lines(
    conn: &mut PgConnection,
    org_id: Uuid,
    document: DocumentType,
    document_id: Uuid,
    inputs: Vec<LineItemInput>,
) -> Result<Vec<LineItem>, ApiError> {
    let product_ids: Vec<Uuid> = inputs.iter().filter_map(|i| i.product_id).collect();
    let catalog: HashMap<Uuid, Product> = if product_ids.is_empty() {
        HashMap::new()
    } else {
        products::table
            .filter(products::org_id.eq(org_id))
            .filter(products::id.eq_any(&product_ids))
            .filter(products::deleted_at.is_null())
            .select(Product::as_select())
            .load::<Product>(conn)?
            .into_iter()
            .map(|p| (p.id, p))
            .collect()
    };

    inputs
        .into_iter()
        .enumerate()
        .map(|(position, input)| {
            let product = match input.product_id {
                Some(id) => {
                    let product = catalog.get(&id).ok_or_else(|| {
                        ApiError::validation(format!("Product {id} does not exist in this company"))
                    })?;
                    if !product.is_active {
                        return Err(ApiError::validation(format!(
                            "Product {} is inactive",
                            product.name
                        )));
                    }
                    Some(product)
                }
                None => None,
            };
            input.into_line(product, document, document_id, position)
        })
        .collect()
}

pub fn insert_lines(conn: &mut PgConnection, lines: &[LineItem]) -> QueryResult<()> {
    if !lines.is_empty() {
        diesel::insert_into(sales_line_items::table)
            .values(lines)
            .execute(conn)?;
    }
    Ok(())
}

pub fn load_lines(
    conn: &mut PgConnection,
    document: DocumentType,
    document_id: Uuid,
) -> QueryResult<Vec<LineItem>> {
    sales_line_items::table
        .filter(sales_line_items::document_type.eq(document.as_str()))
        .filter(sales_line_items::document_id.eq(document_id))
        .order(sales_line_items::sort_order.asc())
        .select(LineItem::as_select())
        .load(conn)
}

pub fn replace_lines(
    conn: &mut PgConnection,
    org_id: Uuid,
    document: DocumentType,
    document_id: Uuid,
    inputs: Vec<LineItemInput>,
) -> Result<Vec<LineItem>, ApiError> {
    let lines = build_lines(conn, org_id, document, document_id, inputs)?;
    diesel::delete(
        sales_line_items::table
            .filter(sales_line_items::document_type.eq(document.as_str()))
            .filter(sales_line_items::document_id.eq(document_id)),
    )
    .execute(conn)?;
    insert_lines(conn, &lines)?;
    Ok(lines)
}

/// Copies the lines of one document onto another, e.g. a quote's lines onto
/// the order created from it.
pub fn copy_lines(
    conn: &mut PgConnection,
    from: (DocumentType, Uuid),
    to: (DocumentType, Uuid),
) -> QueryResult<Vec<LineItem>> {
    let now = Utc::now();
    let lines: Vec<LineItem> = load_lines(conn, from.0, from.1)?
        .into_iter()
        .map(|line| LineItem {
            id: Uuid::new_v4(),
            document_type: to.0.as_str().to_string(),
            document_id: to.1,
            created_at: now,
            ..line
        })
        .collect();
    insert_lines(conn, &lines)?;
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).expect("decimal")
    }

    fn product() -> Product {
        let now = Utc::now();
        Product {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            sku: Some("SVC-1".into()),
            name: "Onboarding".into(),
            description: None,
            category: None,
            product_type: "service".into(),
            unit_price: dec("250.00"),
            cost: None,
            currency: "USD".into(),
            tax_rate: dec("0"),
            unit: "hour".into(),
            is_active: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_line_inherits_product_name_and_price() {
        let product = product();
        let input = LineItemInput {
            product_id: Some(product.id),
            quantity: Some(dec("2")),
            ..Default::default()
        };
        let line = input
            .into_line(Some(&product), DocumentType::Quote, Uuid::new_v4(), 0)
            .expect("line");
        assert_eq!(line.description, "Onboarding");
        assert_eq!(line.amount, dec("500.00"));
        assert_eq!(line.document_type, "quote");
    }

    #[test]
    fn test_line_overrides_and_discount() {
        let product = product();
        let input = LineItemInput {
            product_id: Some(product.id),
            description: Some("Discounted onboarding".into()),
            unit_price: Some(dec("200")),
            discount_percent: Some(dec("25")),
            ..Default::default()
        };
        let line = input
            .into_line(Some(&product), DocumentType::Invoice, Uuid::new_v4(), 3)
            .expect("line");
        assert_eq!(line.description, "Discounted onboarding");
        assert_eq!(line.quantity, dec("1"));
        assert_eq!(line.amount, dec("150.00"));
        assert_eq!(line.sort_order, 3);
    }

    #[test]
    fn test_free_text_line_needs_price_and_description() {
        let missing_price = LineItemInput {
            description: Some("Travel".into()),
            ..Default::default()
        };
        assert!(missing_price
            .into_line(None, DocumentType::Order, Uuid::new_v4(), 0)
            .is_err());

        let missing_description = LineItemInput {
            unit_price: Some(dec("10")),
            ..Default::default()
        };
        assert!(missing_description
            .into_line(None, DocumentType::Order, Uuid::new_v4(), 0)
            .is_err());
    }

    #[test]
    fn test_rejects_bad_quantity_and_discount() {
        let zero = LineItemInput {
            description: Some("Item".into()),
            unit_price: Some(dec("10")),
            quantity: Some(dec("0")),
            ..Default::default()
        };
        assert!(zero.into_line(None, DocumentType::Quote, Uuid::new_v4(), 0).is_err());

        let over = LineItemInput {
            description: Some("Item".into()),
            unit_price: Some(dec("10")),
            discount_percent: Some(dec("101")),
            ..Default::default()
        };
        assert!(over.into_line(None, DocumentType::Quote, Uuid::new_v4(), 0).is_err());
    }
}
