//! Record filtering and ordering for `find_by_*` and `search`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use rdb_types::{names_equal, ObjectRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field → wanted value. Every entry must match.
pub type SearchFilters = BTreeMap<String, Value>;

/// Ordering and truncation for [`crate::ObjectRepository::search`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Field to sort by; unsorted (container order) when `None`.
    pub sort: Option<String>,
    pub descending: bool,
    pub limit: Option<usize>,
}

impl SearchOptions {
    pub fn sorted_by(field: impl Into<String>) -> Self {
        Self {
            sort: Some(field.into()),
            ..Self::default()
        }
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Exact-match test used by `find_by_attribute`.
///
/// `name` compares case-insensitively. A cross-reference map matches a
/// string that is one of its keys.
pub fn attribute_matches(record: &ObjectRecord, field: &str, wanted: &Value) -> bool {
    let Some(actual) = record.field(field) else {
        return false;
    };
    match (&actual, wanted) {
        (Value::String(a), Value::String(w)) if field == "name" => names_equal(a, w),
        (Value::Object(map), Value::String(w)) => map.contains_key(w),
        (Value::Array(items), w) if !w.is_array() => items.contains(w),
        (a, w) => a == w,
    }
}

/// Loose test used by `search`: strings match as case-insensitive
/// substrings, everything else by [`attribute_matches`].
pub fn search_matches(record: &ObjectRecord, filters: &SearchFilters) -> bool {
    filters.iter().all(|(field, wanted)| match wanted {
        Value::String(needle) => match record.field(field) {
            Some(Value::String(hay)) => hay.to_lowercase().contains(&needle.to_lowercase()),
            Some(Value::Object(map)) => map
                .keys()
                .any(|k| k.to_lowercase().contains(&needle.to_lowercase())),
            Some(Value::Array(items)) => items.iter().any(|item| {
                item.as_str()
                    .is_some_and(|s| s.to_lowercase().contains(&needle.to_lowercase()))
            }),
            Some(other) => other.to_string().to_lowercase() == needle.to_lowercase(),
            None => false,
        },
        _ => attribute_matches(record, field, wanted),
    })
}

/// Compare two field values: numbers numerically, strings
/// case-insensitively, and missing values after present ones.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x
            .to_lowercase()
            .cmp(&y.to_lowercase())
            .then_with(|| x.cmp(y)),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

/// Filter, sort, and truncate `records`.
pub fn apply_search(
    records: &[ObjectRecord],
    filters: &SearchFilters,
    options: &SearchOptions,
) -> Vec<ObjectRecord> {
    let mut hits: Vec<ObjectRecord> = records
        .iter()
        .filter(|r| search_matches(r, filters))
        .cloned()
        .collect();

    if let Some(field) = &options.sort {
        let mut keyed: Vec<(Option<Value>, ObjectRecord)> =
            hits.into_iter().map(|r| (r.field(field), r)).collect();
        keyed.sort_by(|(a, ra), (b, rb)| {
            let ord = compare_values(a.as_ref(), b.as_ref());
            let ord = if options.descending { ord.reverse() } else { ord };
            ord.then_with(|| ra.name.cmp(&rb.name))
        });
        hits = keyed.into_iter().map(|(_, r)| r).collect();
    }

    if let Some(limit) = options.limit {
        hits.truncate(limit);
    }
    hits
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(name: &str, employees: i64, industry: &str) -> ObjectRecord {
        ObjectRecord::new(name)
            .with_attribute("employees", employees)
            .with_attribute("industry", industry)
    }

    fn sample() -> Vec<ObjectRecord> {
        vec![
            record("Globex", 900, "Energy"),
            record("acme labs", 12, "Biotech"),
            record("Acme", 50, "Biotech"),
            record("Initech", 120, "Software"),
        ]
    }

    fn names(records: &[ObjectRecord]) -> Vec<&str> {
        records.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn name_match_is_case_insensitive() {
        let r = record("Acme", 1, "x");
        assert!(attribute_matches(&r, "name", &json!("ACME")));
        assert!(!attribute_matches(&r, "industry", &json!("X")));
        assert!(attribute_matches(&r, "industry", &json!("x")));
        assert!(attribute_matches(&r, "employees", &json!(1)));
        assert!(!attribute_matches(&r, "missing", &json!(1)));
    }

    #[test]
    fn link_maps_match_by_key() {
        let mut r = ObjectRecord::new("Doc1");
        r.link("linked_companies", "Acme", json!({}));
        assert!(attribute_matches(&r, "linked_companies", &json!("Acme")));
        assert!(!attribute_matches(&r, "linked_companies", &json!("Globex")));
        assert!(search_matches(
            &r,
            &SearchFilters::from([("linked_companies".into(), json!("acm"))])
        ));
    }

    #[test]
    fn substring_search_sorted_and_limited() {
        let filters = SearchFilters::from([("name".into(), json!("acme"))]);
        let hits = apply_search(&sample(), &filters, &SearchOptions::sorted_by("name").limit(1));
        assert_eq!(names(&hits), vec!["Acme"]);

        let all = apply_search(&sample(), &filters, &SearchOptions::sorted_by("name"));
        assert_eq!(names(&all), vec!["Acme", "acme labs"]);
    }

    #[test]
    fn numeric_sort_descending() {
        let hits = apply_search(
            &sample(),
            &SearchFilters::new(),
            &SearchOptions::sorted_by("employees").descending(),
        );
        assert_eq!(names(&hits), vec!["Globex", "Initech", "Acme", "acme labs"]);
    }

    #[test]
    fn missing_sort_field_goes_last() {
        let mut records = sample();
        records.push(ObjectRecord::new("Umbrella"));
        let hits = apply_search(
            &records,
            &SearchFilters::new(),
            &SearchOptions::sorted_by("employees"),
        );
        assert_eq!(hits.last().unwrap().name, "Umbrella");
    }

    #[test]
    fn unsorted_keeps_container_order() {
        let hits = apply_search(&sample(), &SearchFilters::new(), &SearchOptions::default());
        assert_eq!(names(&hits), vec!["Globex", "acme labs", "Acme", "Initech"]);
    }

    #[test]
    fn all_filters_must_match() {
        let filters = SearchFilters::from([
            ("name".into(), json!("acme")),
            ("employees".into(), json!(50)),
        ]);
        let hits = apply_search(&sample(), &filters, &SearchOptions::default());
        assert_eq!(names(&hits), vec!["Acme"]);
    }
}
