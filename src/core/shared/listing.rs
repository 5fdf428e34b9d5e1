//! Searchable, sortable list views.
//!
//! Every entity list goes through the same pipeline: the rows owned by the
//! current company are loaded in creation order, then filtered by a free-text
//! query and optionally sorted by a single column. Both steps are pure and
//! work on the serialized form of a record, so an entity only has to declare
//! which fields are searchable and which columns may be sorted.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::str::FromStr;

use crate::core::shared::error::ApiError;

pub const MAX_PAGE_SIZE: usize = 500;

pub trait Listable: Serialize {
    /// Fields matched by the free-text query.
    const SEARCH_FIELDS: &'static [&'static str];
    /// Columns a list may be ordered by.
    const SORT_FIELDS: &'static [&'static str];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn toggle(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Desc,
        }
    }

    /// Parses an `ordering` parameter: `name` sorts ascending, `-name` descending.
    pub fn parse(ordering: &str) -> Option<Self> {
        let ordering = ordering.trim();
        if let Some(column) = ordering.strip_prefix('-') {
            let column = column.trim();
            (!column.is_empty()).then(|| Self::desc(column))
        } else {
            let column = ordering.strip_prefix('+').unwrap_or(ordering).trim();
            (!column.is_empty()).then(|| Self::asc(column))
        }
    }

    pub fn to_ordering(&self) -> String {
        match self.direction {
            SortDirection::Asc => self.column.clone(),
            SortDirection::Desc => format!("-{}", self.column),
        }
    }
}

/// Column-header sort state of a list view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortState {
    pub current: Option<SortSpec>,
}

impl SortState {
    /// Clicking the active column flips its direction; any other column
    /// becomes the active one, ascending.
    pub fn toggle(&mut self, column: &str) -> &SortSpec {
        let next = match self.current.take() {
            Some(spec) if spec.column == column => SortSpec {
                column: spec.column,
                direction: spec.direction.toggle(),
            },
            _ => SortSpec::asc(column),
        };
        self.current.insert(next)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub search: Option<String>,
    pub ordering: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ListParams {
    pub fn sort_spec<T: Listable>(&self) -> Result<Option<SortSpec>, ApiError> {
        let Some(spec) = self.ordering.as_deref().and_then(SortSpec::parse) else {
            return Ok(None);
        };
        if !T::SORT_FIELDS.contains(&spec.column.as_str()) {
            return Err(ApiError::validation(format!(
                "Cannot order by '{}'. Allowed: {}",
                spec.column,
                T::SORT_FIELDS.join(", ")
            )));
        }
        Ok(Some(spec))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResponse<T> {
    pub count: usize,
    pub results: Vec<T>,
}

/// Filters and sorts `records`, which must be in their original order. Rows
/// are only paged when the caller asks for a `limit`.
pub fn apply<T: Listable>(records: Vec<T>, params: &ListParams) -> Result<ListResponse<T>, ApiError> {
    let sort = params.sort_spec::<T>()?;
    let mut rows = filter_records(records, params.search.as_deref().unwrap_or(""));
    if let Some(spec) = sort {
        rows = sort_records(rows, &spec);
    }

    let count = rows.len();
    let offset = params.offset.unwrap_or(0);
    let results = match params.limit {
        Some(limit) => rows.into_iter().skip(offset).take(limit.min(MAX_PAGE_SIZE)).collect(),
        None => rows.into_iter().skip(offset).collect(),
    };
    Ok(ListResponse { count, results })
}

/// Keeps the records whose searchable fields contain `query`, ignoring case.
/// A blank query keeps everything. Original order is preserved.
pub fn filter_records<T: Listable>(records: Vec<T>, query: &str) -> Vec<T> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return records;
    }
    records
        .into_iter()
        .filter(|record| matches_query(record, &needle))
        .collect()
}

fn matches_query<T: Listable>(record: &T, needle: &str) -> bool {
    let Ok(Value::Object(fields)) = serde_json::to_value(record) else {
        return false;
    };
    T::SEARCH_FIELDS
        .iter()
        .filter_map(|name| fields.get(*name))
        .any(|value| value_contains(value, needle))
}

fn value_contains(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::Number(n) => n.to_string().contains(needle),
        Value::Array(items) => items.iter().any(|item| value_contains(item, needle)),
        _ => false,
    }
}

/// Stable single-column sort. Ties keep their original relative order in both
/// directions, and missing values always sort last.
///
/// A column is compared numerically only when every present value in it is a
/// number (decimal amounts serialize as strings); otherwise every value is
/// compared as lowercase text.
pub fn sort_records<T: Listable>(records: Vec<T>, spec: &SortSpec) -> Vec<T> {
    let (values, records): (Vec<Value>, Vec<T>) = records
        .into_iter()
        .map(|record| {
            let value = match serde_json::to_value(&record) {
                Ok(Value::Object(mut fields)) => fields.remove(&spec.column).unwrap_or(Value::Null),
                _ => Value::Null,
            };
            (value, record)
        })
        .unzip();

    let mut keyed: Vec<(Option<SortKey>, T)> = column_keys(&values).into_iter().zip(records).collect();

    keyed.sort_by(|(a, _), (b, _)| match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            let ord = a.cmp(b);
            match spec.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        }
    });

    keyed.into_iter().map(|(_, record)| record).collect()
}

/// Every present key of a column holds the same variant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    Number(BigDecimal),
    Bool(bool),
    Text(String),
}

fn column_keys(values: &[Value]) -> Vec<Option<SortKey>> {
    let present = || values.iter().filter(|v| !v.is_null());

    let numbers: Option<Vec<BigDecimal>> = present().map(numeric).collect();
    if let Some(numbers) = numbers {
        let mut numbers = numbers.into_iter();
        return values
            .iter()
            .map(|v| if v.is_null() { None } else { numbers.next().map(SortKey::Number) })
            .collect();
    }

    let all_bool = present().all(Value::is_boolean);
    values
        .iter()
        .map(|v| match v {
            Value::Null => None,
            Value::Bool(b) if all_bool => Some(SortKey::Bool(*b)),
            Value::String(s) => Some(SortKey::Text(s.to_lowercase())),
            other => Some(SortKey::Text(other.to_string().to_lowercase())),
        })
        .collect()
}

fn numeric(value: &Value) -> Option<BigDecimal> {
    match value {
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        Value::String(s) => {
            let plain = !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_digit() || c == '.' || c == '-');
            if plain {
                BigDecimal::from_str(s).ok()
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Row {
        name: String,
        city: Option<String>,
        value: Option<f64>,
        price: String,
        tags: Vec<String>,
    }

    impl Listable for Row {
        const SEARCH_FIELDS: &'static [&'static str] = &["name", "city", "tags"];
        const SORT_FIELDS: &'static [&'static str] = &["name", "city", "value", "price"];
    }

    fn row(name: &str, city: Option<&str>, value: Option<f64>, price: &str) -> Row {
        Row {
            name: name.to_string(),
            city: city.map(str::to_string),
            value,
            price: price.to_string(),
            tags: vec![],
        }
    }

    fn sample() -> Vec<Row> {
        vec![
            row("Acme", Some("Lisbon"), Some(10.0), "9.50"),
            row("globex", Some("Porto"), None, "100.00"),
            row("Initech", None, Some(10.0), "25.00"),
            row("acme labs", Some("lisbon"), Some(3.0), "9.50"),
            Row {
                tags: vec!["Enterprise".into()],
                ..row("Umbrella", Some("Braga"), Some(50.0), "1.00")
            },
        ]
    }

    fn names(rows: &[Row]) -> Vec<&str> {
        rows.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_filter_case_insensitive_substring() {
        let rows = filter_records(sample(), "ACME");
        assert_eq!(names(&rows), vec!["Acme", "acme labs"]);

        let rows = filter_records(sample(), "lisb");
        assert_eq!(names(&rows), vec!["Acme", "acme labs"]);
    }

    #[test]
    fn test_filter_matches_tags() {
        let rows = filter_records(sample(), "enterprise");
        assert_eq!(names(&rows), vec!["Umbrella"]);
    }

    #[test]
    fn test_filter_ignores_non_search_fields() {
        assert!(filter_records(sample(), "100.00").is_empty());
    }

    #[test]
    fn test_blank_query_keeps_everything() {
        assert_eq!(filter_records(sample(), "").len(), 5);
        assert_eq!(filter_records(sample(), "   ").len(), 5);
    }

    #[test]
    fn test_filter_is_idempotent() {
        for query in ["acme", "o", "", "zzz", "LISBON"] {
            let once = filter_records(sample(), query);
            let twice = filter_records(once.clone(), query);
            assert_eq!(once, twice, "query {query:?}");
        }
    }

    #[test]
    fn test_sort_ascending_case_insensitive() {
        let rows = sort_records(sample(), &SortSpec::asc("name"));
        assert_eq!(
            names(&rows),
            vec!["Acme", "acme labs", "globex", "Initech", "Umbrella"]
        );
    }

    #[test]
    fn test_sort_ties_keep_original_order() {
        let asc = sort_records(sample(), &SortSpec::asc("value"));
        assert_eq!(
            names(&asc),
            vec!["acme labs", "Acme", "Initech", "Umbrella", "globex"]
        );

        let desc = sort_records(sample(), &SortSpec::desc("value"));
        assert_eq!(
            names(&desc),
            vec!["Umbrella", "Acme", "Initech", "acme labs", "globex"]
        );
    }

    #[test]
    fn test_sort_decimal_strings_numerically() {
        let rows = sort_records(sample(), &SortSpec::asc("price"));
        assert_eq!(
            names(&rows),
            vec!["Umbrella", "Acme", "acme labs", "Initech", "globex"]
        );
    }

    #[test]
    fn test_missing_values_sort_last() {
        let asc = sort_records(sample(), &SortSpec::asc("city"));
        assert_eq!(names(&asc).last(), Some(&"Initech"));
        let desc = sort_records(sample(), &SortSpec::desc("city"));
        assert_eq!(names(&desc).last(), Some(&"Initech"));
    }

    #[test]
    fn test_sort_toggle_is_involution() {
        let mut state = SortState::default();
        state.toggle("name");
        let initial = state.clone();
        let first = sort_records(sample(), initial.current.as_ref().expect("sort"));

        state.toggle("name");
        assert_eq!(
            state.current.as_ref().map(|s| s.direction),
            Some(SortDirection::Desc)
        );
        state.toggle("name");
        assert_eq!(state, initial);

        let again = sort_records(sample(), state.current.as_ref().expect("sort"));
        assert_eq!(first, again);
    }

    #[test]
    fn test_toggle_new_column_starts_ascending() {
        let mut state = SortState::default();
        state.toggle("name");
        state.toggle("name");
        let spec = state.toggle("city").clone();
        assert_eq!(spec, SortSpec::asc("city"));
    }

    #[test]
    fn test_parse_ordering() {
        assert_eq!(SortSpec::parse("name"), Some(SortSpec::asc("name")));
        assert_eq!(SortSpec::parse("-created_at"), Some(SortSpec::desc("created_at")));
        assert_eq!(SortSpec::parse(" -"), None);
        assert_eq!(SortSpec::parse(""), None);
        assert_eq!(SortSpec::desc("total").to_ordering(), "-total");
    }

    #[test]
    fn test_apply_rejects_unknown_column() {
        let params = ListParams {
            ordering: Some("-password".into()),
            ..ListParams::default()
        };
        assert!(matches!(apply(sample(), &params), Err(ApiError::Validation(_))));
    }

    #[test]
    fn test_apply_filters_sorts_and_pages() {
        let params = ListParams {
            search: Some("a".into()),
            ordering: Some("-name".into()),
            limit: Some(2),
            offset: Some(1),
        };
        let page = apply(sample(), &params).expect("list");
        assert_eq!(page.count, 3);
        assert_eq!(names(&page.results), vec!["acme labs", "Acme"]);
    }

    #[test]
    fn test_apply_without_limit_returns_every_row() {
        let rows: Vec<Row> = (0..60)
            .map(|i| row(&format!("Company {i}"), None, Some(f64::from(i)), "1.00"))
            .collect();
        let page = apply(rows, &ListParams::default()).expect("list");
        assert_eq!(page.count, 60);
        assert_eq!(page.results.len(), 60);
    }

    #[test]
    fn test_apply_clamps_requested_limit() {
        let rows: Vec<Row> = (0..MAX_PAGE_SIZE + 10)
            .map(|i| row(&format!("Company {i}"), None, None, "1.00"))
            .collect();
        let params = ListParams {
            limit: Some(MAX_PAGE_SIZE * 2),
            ..ListParams::default()
        };
        let page = apply(rows, &params).expect("list");
        assert_eq!(page.count, MAX_PAGE_SIZE + 10);
        assert_eq!(page.results.len(), MAX_PAGE_SIZE);
    }

    #[test]
    fn test_mixed_text_column_sorts_the_same_for_any_input_order() {
        let sorted = |order: [&str; 3]| {
            let rows: Vec<Row> = order.iter().map(|n| row(n, None, None, "1.00")).collect();
            names(&sort_records(rows, &SortSpec::asc("name")))
                .into_iter()
                .map(str::to_string)
                .collect::<Vec<_>>()
        };
        let expected = vec!["10", "1a", "2"];
        assert_eq!(sorted(["2", "10", "1a"]), expected);
        assert_eq!(sorted(["1a", "10", "2"]), expected);
        assert_eq!(sorted(["10", "2", "1a"]), expected);
    }

    #[test]
    fn test_large_amounts_keep_full_precision() {
        let big = ["123456789012345678901234.02", "123456789012345678901234.01", "9.99"];
        let rows = |order: [usize; 3]| -> Vec<Row> {
            order
                .iter()
                .map(|&i| row(&format!("r{i}"), None, None, big[i]))
                .collect()
        };
        let expected = vec!["r2", "r1", "r0"];
        for order in [[0, 1, 2], [2, 1, 0], [1, 0, 2]] {
            let sorted = sort_records(rows(order), &SortSpec::asc("price"));
            assert_eq!(names(&sorted), expected, "input order {order:?}");
        }
    }
}
