//! Tabbed detail views and edit forms.
//!
//! A detail view lays a record's fields out across named tabs. Editing goes
//! through an [`EditForm`] that starts from the record's current values, accepts
//! changes to editable fields only, enforces required fields and produces the
//! updated record for the caller to persist.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core::shared::error::ApiError;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TabSpec {
    pub name: &'static str,
    pub fields: &'static [&'static str],
}

pub trait Editable: Serialize + DeserializeOwned {
    const ENTITY: &'static str;
    const TABS: &'static [TabSpec];
    const EDITABLE_FIELDS: &'static [&'static str];
    const REQUIRED_FIELDS: &'static [&'static str];

    fn record_id(&self) -> Uuid;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailField {
    pub name: String,
    pub value: Value,
    pub editable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailTab {
    pub name: String,
    pub fields: Vec<DetailField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailView {
    pub entity: String,
    pub id: Uuid,
    pub tabs: Vec<DetailTab>,
}

impl DetailView {
    pub fn build<T: Editable>(record: &T) -> Result<Self, ApiError> {
        let fields = to_object(record)?;
        let tabs = T::TABS
            .iter()
            .map(|tab| DetailTab {
                name: tab.name.to_string(),
                fields: tab
                    .fields
                    .iter()
                    .map(|name| DetailField {
                        name: (*name).to_string(),
                        value: fields.get(*name).cloned().unwrap_or(Value::Null),
                        editable: T::EDITABLE_FIELDS.contains(name),
                    })
                    .collect(),
            })
            .collect();

        Ok(Self {
            entity: T::ENTITY.to_string(),
            id: record.record_id(),
            tabs,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EditForm {
    pub entity: String,
    pub id: Uuid,
    pub values: Map<String, Value>,
    pub required_fields: Vec<String>,
    #[serde(skip)]
    original: Map<String, Value>,
}

impl EditForm {
    /// Opens a form holding exactly the editable fields of `record`.
    pub fn prepopulate<T: Editable>(record: &T) -> Result<Self, ApiError> {
        let fields = to_object(record)?;
        let values: Map<String, Value> = T::EDITABLE_FIELDS
            .iter()
            .map(|name| {
                (
                    (*name).to_string(),
                    fields.get(*name).cloned().unwrap_or(Value::Null),
                )
            })
            .collect();

        Ok(Self {
            entity: T::ENTITY.to_string(),
            id: record.record_id(),
            original: values.clone(),
            values,
            required_fields: T::REQUIRED_FIELDS.iter().map(|f| f.to_string()).collect(),
        })
    }

    pub fn set(&mut self, field: &str, value: Value) -> Result<(), ApiError> {
        match self.values.get_mut(field) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(ApiError::validation(format!(
                "Field '{field}' is not editable on {}",
                self.entity
            ))),
        }
    }

    pub fn apply_input(&mut self, input: Map<String, Value>) -> Result<(), ApiError> {
        for (field, value) in input {
            self.set(&field, value)?;
        }
        Ok(())
    }

    pub fn missing_required(&self) -> Vec<String> {
        self.required_fields
            .iter()
            .filter(|name| match self.values.get(name.as_str()) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            })
            .cloned()
            .collect()
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        let missing = self.missing_required();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn changes(&self) -> Map<String, Value> {
        self.values
            .iter()
            .filter(|(name, value)| self.original.get(name.as_str()) != Some(*value))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        !self.changes().is_empty()
    }

    /// Produces `record` with the form's values written over it.
    pub fn apply_to<T: Editable>(&self, record: &T) -> Result<T, ApiError> {
        let mut fields = to_object(record)?;
        for (name, value) in &self.values {
            fields.insert(name.clone(), value.clone());
        }
        serde_json::from_value(Value::Object(fields))
            .map_err(|e| ApiError::validation(format!("Invalid value for {}: {e}", self.entity)))
    }

    /// Discards the form. The record it was opened from is never touched.
    pub fn cancel(self) {}
}

/// Validates `input` against the edit form of `record` and returns the
/// updated record together with the fields that actually changed.
pub fn submit<T: Editable>(
    record: &T,
    input: Map<String, Value>,
) -> Result<(T, Map<String, Value>), ApiError> {
    let mut form = EditForm::prepopulate(record)?;
    form.apply_input(input)?;
    form.validate()?;
    let updated = form.apply_to(record)?;
    Ok((updated, form.changes()))
}

fn to_object<T: Serialize>(record: &T) -> Result<Map<String, Value>, ApiError> {
    match serde_json::to_value(record) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(ApiError::Internal("Record did not serialize to an object".into())),
        Err(e) => Err(ApiError::Internal(format!("Failed to serialize record: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Contact {
        id: Uuid,
        first_name: String,
        last_name: Option<String>,
        email: Option<String>,
        status: String,
        tags: Vec<String>,
    }

    impl Editable for Contact {
        const ENTITY: &'static str = "Contact";
        const TABS: &'static [TabSpec] = &[
            TabSpec {
                name: "Overview",
                fields: &["first_name", "last_name", "status"],
            },
            TabSpec {
                name: "Contact Info",
                fields: &["email", "tags"],
            },
            TabSpec {
                name: "System",
                fields: &["id"],
            },
        ];
        const EDITABLE_FIELDS: &'static [&'static str] =
            &["first_name", "last_name", "email", "status", "tags"];
        const REQUIRED_FIELDS: &'static [&'static str] = &["first_name", "status"];

        fn record_id(&self) -> Uuid {
            self.id
        }
    }

    fn contact() -> Contact {
        Contact {
            id: Uuid::new_v4(),
            first_name: "Ada".into(),
            last_name: Some("Lovelace".into()),
            email: None,
            status: "active".into(),
            tags: vec!["vip".into()],
        }
    }

    fn input(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("object expected"),
        }
    }

    #[test]
    fn test_detail_view_tabs() {
        let record = contact();
        let view = DetailView::build(&record).expect("detail");
        assert_eq!(view.entity, "Contact");
        assert_eq!(view.id, record.id);
        let names: Vec<&str> = view.tabs.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Overview", "Contact Info", "System"]);
        assert_eq!(view.tabs[0].fields[0].value, json!("Ada"));
        assert_eq!(view.tabs[1].fields[0].value, Value::Null);
        assert!(!view.tabs[2].fields[0].editable);
    }

    #[test]
    fn test_prepopulate_holds_exactly_editable_fields() {
        let record = contact();
        let form = EditForm::prepopulate(&record).expect("form");
        let keys: Vec<&str> = form.values.keys().map(String::as_str).collect();
        let mut expected = Contact::EDITABLE_FIELDS.to_vec();
        expected.sort_unstable();
        let mut keys_sorted = keys.clone();
        keys_sorted.sort_unstable();
        assert_eq!(keys_sorted, expected);

        let current = serde_json::to_value(&record).expect("json");
        for (name, value) in &form.values {
            assert_eq!(Some(value), current.get(name), "field {name}");
        }
        assert!(!form.is_dirty());
    }

    #[test]
    fn test_cancel_leaves_record_untouched() {
        let record = contact();
        let before = record.clone();
        let mut form = EditForm::prepopulate(&record).expect("form");
        form.set("first_name", json!("Grace")).expect("set");
        assert!(form.is_dirty());
        form.cancel();
        assert_eq!(record, before);
    }

    #[test]
    fn test_submit_applies_changes() {
        let record = contact();
        let (updated, changes) = submit(
            &record,
            input(json!({"email": "ada@example.com", "first_name": "Ada"})),
        )
        .expect("submit");
        assert_eq!(updated.email.as_deref(), Some("ada@example.com"));
        assert_eq!(updated.id, record.id);
        assert_eq!(changes.len(), 1);
        assert!(changes.contains_key("email"));
    }

    #[test]
    fn test_required_fields_enforced() {
        let record = contact();
        let err = submit(&record, input(json!({"first_name": "  ", "status": null})))
            .expect_err("should fail");
        match err {
            ApiError::Validation(msg) => {
                assert!(msg.contains("first_name"));
                assert!(msg.contains("status"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_read_only_fields_rejected() {
        let record = contact();
        let err = submit(&record, input(json!({"id": Uuid::new_v4()}))).expect_err("rejected");
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn test_type_mismatch_is_validation_error() {
        let record = contact();
        let err = submit(&record, input(json!({"tags": "not-a-list"}))).expect_err("rejected");
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
