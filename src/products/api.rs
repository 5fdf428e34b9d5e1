use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::dsl::exists;
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::shared::detail::{self, DetailView, EditForm, Editable, TabSpec};
use crate::core::shared::error::ApiError;
use crate::core::shared::listing::{self, ListParams, ListResponse, Listable};
use crate::core::shared::schema::products;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{non_blank, run_blocking};
use crate::security::auth_api::AuthenticatedUser;
use crate::security::validation::Validator;

pub const PRODUCT_TYPES: &[&str] = &["product", "service", "subscription"];

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = products)]
#[diesel(treat_none_as_null = true)]
pub struct Product {
    pub id: Uuid,
    pub org_id: Uuid,
    pub sku: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub product_type: String,
    pub unit_price: BigDecimal,
    pub cost: Option<BigDecimal>,
    pub currency: String,
    pub tax_rate: BigDecimal,
    pub unit: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Product {
    /// Unit price minus cost, when the cost is known.
    pub fn margin(&self) -> Option<BigDecimal> {
        self.cost.as_ref().map(|cost| &self.unit_price - cost)
    }

    fn validate(&self) -> Result<(), ApiError> {
        let zero = BigDecimal::from(0);
        let hundred = BigDecimal::from(100);
        let mut v = Validator::new()
            .length(self.name.trim(), "name", Some(1), Some(255))
            .one_of(&self.product_type, "product_type", PRODUCT_TYPES)
            .currency(&self.currency)
            .range(&self.unit_price, "unit_price", Some(&zero), None)
            .range(&self.tax_rate, "tax_rate", Some(&zero), Some(&hundred))
            .length(self.unit.trim(), "unit", Some(1), Some(50));
        if let Some(cost) = &self.cost {
            v = v.range(cost, "cost", Some(&zero), None);
        }
        Ok(v.validate()?)
    }
}

impl Listable for Product {
    const SEARCH_FIELDS: &'static [&'static str] =
        &["sku", "name", "description", "category", "product_type"];
    const SORT_FIELDS: &'static [&'static str] = &[
        "sku",
        "name",
        "category",
        "product_type",
        "unit_price",
        "is_active",
        "created_at",
        "updated_at",
    ];
}

impl Editable for Product {
    const ENTITY: &'static str = "Product";
    const TABS: &'static [TabSpec] = &[
        TabSpec {
            name: "General",
            fields: &["sku", "name", "category", "product_type", "unit", "is_active"],
        },
        TabSpec {
            name: "Pricing",
            fields: &["unit_price", "cost", "currency", "tax_rate"],
        },
        TabSpec {
            name: "Description",
            fields: &["description"],
        },
    ];
    const EDITABLE_FIELDS: &'static [&'static str] = &[
        "sku",
        "name",
        "description",
        "category",
        "product_type",
        "unit_price",
        "cost",
        "currency",
        "tax_rate",
        "unit",
        "is_active",
    ];
    const REQUIRED_FIELDS: &'static [&'static str] =
        &["name", "product_type", "unit_price", "currency", "unit"];

    fn record_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub sku: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub product_type: Option<String>,
    pub unit_price: BigDecimal,
    pub cost: Option<BigDecimal>,
    pub currency: Option<String>,
    pub tax_rate: Option<BigDecimal>,
    pub unit: Option<String>,
    pub is_active: Option<bool>,
}

impl CreateProductRequest {
    fn into_product(self, org_id: Uuid, default_currency: &str) -> Product {
        let now = Utc::now();
        Product {
            id: Uuid::new_v4(),
            org_id,
            sku: non_blank(self.sku),
            name: self.name.trim().to_string(),
            description: non_blank(self.description),
            category: non_blank(self.category),
            product_type: self.product_type.unwrap_or_else(|| "product".to_string()),
            unit_price: self.unit_price.with_scale(2),
            cost: self.cost.map(|c| c.with_scale(2)),
            currency: non_blank(self.currency)
                .unwrap_or_else(|| default_currency.to_string())
                .to_uppercase(),
            tax_rate: self.tax_rate.unwrap_or_else(|| BigDecimal::from(0)).with_scale(2),
            unit: non_blank(self.unit).unwrap_or_else(|| "unit".to_string()),
            is_active: self.is_active.unwrap_or(true),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductFilters {
    pub category: Option<String>,
    pub product_type: Option<String>,
    pub is_active: Option<bool>,
}

pub fn configure_products_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/products", get(list_products).post(create_product))
        .route(
            "/api/products/{id}",
            get(get_product)
                .put(update_product)
                .patch(update_product)
                .delete(delete_product),
        )
        .route("/api/products/{id}/detail", get(get_product_detail))
        .route("/api/products/{id}/form", get(get_product_form))
}

pub(crate) fn load_product(
    conn: &mut PgConnection,
    org_id: Uuid,
    id: Uuid,
) -> Result<Product, ApiError> {
    products::table
        .filter(products::id.eq(id))
        .filter(products::org_id.eq(org_id))
        .filter(products::deleted_at.is_null())
        .select(Product::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Product"))
}

fn ensure_unique_sku(
    conn: &mut PgConnection,
    org_id: Uuid,
    sku: Option<&str>,
    except: Option<Uuid>,
) -> Result<(), ApiError> {
    let Some(sku) = sku else { return Ok(()) };
    let mut query = products::table
        .filter(products::org_id.eq(org_id))
        .filter(products::sku.eq(sku))
        .filter(products::deleted_at.is_null())
        .into_boxed();
    if let Some(id) = except {
        query = query.filter(products::id.ne(id));
    }
    let taken: bool = diesel::select(exists(query)).get_result(conn)?;
    if taken {
        Err(ApiError::Conflict(format!("SKU {sku} is already in use")))
    } else {
        Ok(())
    }
}

pub async fn list_products(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(params): Query<ListParams>,
    Query(filters): Query<ProductFilters>,
) -> Result<Json<ListResponse<Product>>, ApiError> {
    let org_id = user.org_id()?;
    let rows = run_blocking(&state.conn, move |conn| {
        let mut query = products::table
            .filter(products::org_id.eq(org_id))
            .filter(products::deleted_at.is_null())
            .select(Product::as_select())
            .order(products::created_at.asc())
            .into_boxed();
        if let Some(category) = filters.category {
            query = query.filter(products::category.eq(category));
        }
        if let Some(product_type) = filters.product_type {
            query = query.filter(products::product_type.eq(product_type));
        }
        if let Some(active) = filters.is_active {
            query = query.filter(products::is_active.eq(active));
        }
        Ok(query.load::<Product>(conn)?)
    })
    .await?;
    Ok(Json(listing::apply(rows, &params)?))
}

pub async fn create_product(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let org_id = user.org_id()?;
    let created = run_blocking(&state.conn, move |conn| {
        let company = crate::core::organization::load_company(conn, org_id)?;
        let product = req.into_product(org_id, &company.default_currency);
        product.validate()?;
        ensure_unique_sku(conn, org_id, product.sku.as_deref(), None)?;
        Ok(diesel::insert_into(products::table)
            .values(&product)
            .returning(Product::as_returning())
            .get_result(conn)?)
    })
    .await?;
    info!("Product {} created by {}", created.name, user.username);
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_product(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Product>, ApiError> {
    let org_id = user.org_id()?;
    let product = run_blocking(&state.conn, move |conn| load_product(conn, org_id, id)).await?;
    Ok(Json(product))
}

pub async fn get_product_detail(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DetailView>, ApiError> {
    let org_id = user.org_id()?;
    let product = run_blocking(&state.conn, move |conn| load_product(conn, org_id, id)).await?;
    Ok(Json(DetailView::build(&product)?))
}

pub async fn get_product_form(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<EditForm>, ApiError> {
    let org_id = user.org_id()?;
    let product = run_blocking(&state.conn, move |conn| load_product(conn, org_id, id)).await?;
    Ok(Json(EditForm::prepopulate(&product)?))
}

pub async fn update_product(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(input): Json<Map<String, Value>>,
) -> Result<Json<Product>, ApiError> {
    let org_id = user.org_id()?;
    let updated = run_blocking(&state.conn, move |conn| {
        let current = load_product(conn, org_id, id)?;
        let (mut updated, changes) = detail::submit(&current, input)?;
        if changes.is_empty() {
            return Ok(current);
        }
        updated.name = updated.name.trim().to_string();
        updated.sku = non_blank(updated.sku);
        updated.currency = updated.currency.trim().to_uppercase();
        updated.unit_price = updated.unit_price.with_scale(2);
        updated.tax_rate = updated.tax_rate.with_scale(2);
        updated.validate()?;
        if changes.contains_key("sku") {
            ensure_unique_sku(conn, org_id, updated.sku.as_deref(), Some(id))?;
        }
        updated.updated_at = Utc::now();
        Ok(diesel::update(products::table.find(id))
            .set(&updated)
            .returning(Product::as_returning())
            .get_result(conn)?)
    })
    .await?;
    Ok(Json(updated))
}

/// Soft delete. Line items already on documents keep their own copy of the
/// description and price.
pub async fn delete_product(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let org_id = user.org_id()?;
    run_blocking(&state.conn, move |conn| {
        load_product(conn, org_id, id)?;
        diesel::update(products::table.find(id))
            .set((
                products::deleted_at.eq(Some(Utc::now())),
                products::is_active.eq(false),
            ))
            .execute(conn)?;
        Ok(())
    })
    .await?;
    info!("Product {id} deleted by {}", user.username);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn sample() -> Product {
        let req: CreateProductRequest = serde_json::from_value(json!({
            "sku": "WID-1",
            "name": "Widget",
            "unit_price": "19.9",
            "cost": "7.25",
        }))
        .expect("request");
        req.into_product(Uuid::new_v4(), "eur")
    }

    #[test]
    fn test_create_request_defaults() {
        let product = sample();
        assert_eq!(product.product_type, "product");
        assert_eq!(product.currency, "EUR");
        assert_eq!(product.unit, "unit");
        assert_eq!(product.unit_price.to_string(), "19.90");
        assert_eq!(product.tax_rate, BigDecimal::from(0));
        assert!(product.validate().is_ok());
    }

    #[test]
    fn test_margin() {
        let product = sample();
        assert_eq!(product.margin(), Some(BigDecimal::from_str("12.65").expect("dec")));
    }

    #[test]
    fn test_validation_limits() {
        let mut product = sample();
        product.tax_rate = BigDecimal::from(120);
        assert!(product.validate().is_err());

        let mut product = sample();
        product.unit_price = BigDecimal::from(-1);
        assert!(product.validate().is_err());

        let mut product = sample();
        product.product_type = "bundle".into();
        assert!(product.validate().is_err());
    }

    #[test]
    fn test_sort_by_price_is_numeric() {
        let mut cheap = sample();
        cheap.name = "Cheap".into();
        cheap.unit_price = BigDecimal::from_str("9.50").expect("dec");
        let dear = sample();
        let params = ListParams {
            ordering: Some("-unit_price".into()),
            ..Default::default()
        };
        let result = listing::apply(vec![cheap, dear], &params).expect("list");
        assert_eq!(result.results[0].name, "Widget");
    }
}
