use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RdbError;

/// Field names owned by [`ObjectRecord`] itself rather than its attribute map.
pub const RESERVED_FIELDS: [&str; 3] = ["name", "modification_date", "creation_date"];

/// One domain entity stored in a container blob.
///
/// The record serializes as a flat JSON object: the fixed fields sit next to
/// the free-form attributes, matching the array-of-objects layout of a
/// container file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Unique name within the owning container.
    pub name: String,
    /// Last time any field of this record changed.
    #[serde(default)]
    pub modification_date: DateTime<Utc>,
    /// When the record was first created, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<DateTime<Utc>>,
    /// Everything else, including cross-reference maps.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl ObjectRecord {
    /// Create a record with the given name, stamped with the current time.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            modification_date: now,
            creation_date: Some(now),
            attributes: Map::new(),
        }
    }

    /// Builder-style attribute setter. Reserved fields are ignored.
    pub fn with_attribute(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        let field = field.into();
        if !is_reserved(&field) {
            self.attributes.insert(field, value.into());
        }
        self
    }

    /// Read any field by name, including the fixed ones.
    pub fn field(&self, field: &str) -> Option<Value> {
        match field {
            "name" => Some(Value::String(self.name.clone())),
            "modification_date" => Some(Value::String(self.modification_date.to_rfc3339())),
            "creation_date" => self
                .creation_date
                .map(|date| Value::String(date.to_rfc3339())),
            other => self.attributes.get(other).cloned(),
        }
    }

    /// Set a free-form attribute. Reserved fields cannot be written this way.
    pub fn set_attribute(&mut self, field: &str, value: Value) -> Result<(), RdbError> {
        if is_reserved(field) {
            return Err(RdbError::Validation(format!(
                "field '{field}' is managed by the repository and cannot be set"
            )));
        }
        self.attributes.insert(field.to_string(), value);
        Ok(())
    }

    /// Stamp the modification date.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.modification_date = now;
    }

    /// The cross-reference map stored under `field`, if present.
    pub fn links(&self, field: &str) -> Option<&Map<String, Value>> {
        self.attributes.get(field).and_then(Value::as_object)
    }

    /// Returns `true` if the cross-reference map under `field` names `target`.
    pub fn is_linked(&self, field: &str, target: &str) -> bool {
        self.links(field).is_some_and(|map| map.contains_key(target))
    }

    /// Add `target` to the cross-reference map under `field`, creating the map
    /// if needed. A non-map value under `field` is replaced.
    pub fn link(&mut self, field: &str, target: impl Into<String>, meta: Value) {
        let entry = self
            .attributes
            .entry(field.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(map) = entry {
            map.insert(target.into(), meta);
        }
    }

    /// Remove `target` from the cross-reference map under `field`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn unlink(&mut self, field: &str, target: &str) -> bool {
        match self.attributes.get_mut(field) {
            Some(Value::Object(map)) => map.remove(target).is_some(),
            _ => false,
        }
    }
}

/// Case-folded form of a record name. Two names with the same key refer to
/// the same record.
pub fn name_key(name: &str) -> String {
    name.to_lowercase()
}

/// Whether `a` and `b` name the same record.
pub fn names_equal(a: &str, b: &str) -> bool {
    a == b || name_key(a) == name_key(b)
}

/// Returns `true` if `field` is one of the record's fixed fields.
pub fn is_reserved(field: &str) -> bool {
    RESERVED_FIELDS.contains(&field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn names_fold_unicode_case() {
        assert!(names_equal("Acme", "ACME"));
        assert!(names_equal("Ärzte", "ärzte"));
        assert!(names_equal("Öl", "öl"));
        assert!(!names_equal("Acme", "Acme Labs"));
        assert_eq!(name_key("ÄRZTE"), name_key("ärzte"));
    }

    #[test]
    fn serializes_flat() {
        let record = ObjectRecord::new("Acme").with_attribute("url", "https://acme.test");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["name"], "Acme");
        assert_eq!(value["url"], "https://acme.test");
        assert!(value.get("attributes").is_none());
    }

    #[test]
    fn deserializes_without_dates() {
        let record: ObjectRecord =
            serde_json::from_value(json!({"name": "Acme", "industry": "Anvils"})).unwrap();
        assert_eq!(record.name, "Acme");
        assert_eq!(record.modification_date, DateTime::<Utc>::default());
        assert!(record.creation_date.is_none());
        assert_eq!(record.field("industry"), Some(json!("Anvils")));
    }

    #[test]
    fn field_reads_fixed_and_free_fields() {
        let record = ObjectRecord::new("Acme").with_attribute("employees", 12);
        assert_eq!(record.field("name"), Some(json!("Acme")));
        assert_eq!(record.field("employees"), Some(json!(12)));
        assert!(record.field("modification_date").is_some());
        assert!(record.field("missing").is_none());
    }

    #[test]
    fn set_attribute_rejects_reserved_fields() {
        let mut record = ObjectRecord::new("Acme");
        assert!(record.set_attribute("name", json!("Other")).is_err());
        assert!(record.set_attribute("modification_date", json!("x")).is_err());
        record.set_attribute("status", json!("active")).unwrap();
        assert_eq!(record.field("status"), Some(json!("active")));
    }

    #[test]
    fn builder_ignores_reserved_fields() {
        let record = ObjectRecord::new("Acme").with_attribute("name", "Other");
        assert_eq!(record.name, "Acme");
        assert!(record.attributes.is_empty());
    }

    #[test]
    fn link_and_unlink() {
        let mut record = ObjectRecord::new("Doc1");
        record.link("linked_companies", "Acme", json!({"linked_on": "2024-01-01"}));
        record.link("linked_companies", "Globex", json!({}));
        assert!(record.is_linked("linked_companies", "Acme"));
        assert_eq!(record.links("linked_companies").unwrap().len(), 2);

        assert!(record.unlink("linked_companies", "Acme"));
        assert!(!record.unlink("linked_companies", "Acme"));
        assert!(!record.is_linked("linked_companies", "Acme"));
        assert!(record.is_linked("linked_companies", "Globex"));
    }

    #[test]
    fn link_replaces_non_map_value() {
        let mut record = ObjectRecord::new("Doc1").with_attribute("linked_companies", "oops");
        record.link("linked_companies", "Acme", json!({}));
        assert!(record.is_linked("linked_companies", "Acme"));
    }

    #[test]
    fn unlink_on_missing_field_is_noop() {
        let mut record = ObjectRecord::new("Doc1");
        assert!(!record.unlink("linked_companies", "Acme"));
    }
}
