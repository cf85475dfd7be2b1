//! Field resolution: source record to destination property map.
//!
//! Static properties come from the configured field mapping, dynamic ones
//! from the record's attributes. Resolution is fail-soft: a path that does
//! not lead anywhere yields `null` rather than an error.

use serde_json::Value;
use tracing::debug;

use crmsync_common::{AttributeEntry, PropertyMap, SourceRecord};

use crate::config::FieldMapping;

/// Where a resolved property came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKey {
    /// Destination name fixed by the field mapping.
    Static(String),
    /// Attribute key used verbatim as the destination name.
    Dynamic(String),
}

impl PropertyKey {
    /// Destination property name.
    pub fn name(&self) -> &str {
        match self {
            PropertyKey::Static(name) | PropertyKey::Dynamic(name) => name,
        }
    }

    /// Whether the property came from an attribute.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, PropertyKey::Dynamic(_))
    }
}

/// A property name together with its resolved value.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProperty {
    pub key: PropertyKey,
    pub value: Value,
}

/// Ordered result of resolving one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedProperties {
    entries: Vec<ResolvedProperty>,
}

impl ResolvedProperties {
    /// Resolved entries in resolution order.
    pub fn entries(&self) -> &[ResolvedProperty] {
        &self.entries
    }

    /// Flatten into a property map.
    ///
    /// A later entry replaces an earlier one with the same name, so
    /// dynamic attributes override static properties. The property keeps
    /// the position of its first occurrence.
    pub fn into_map(self) -> PropertyMap {
        let mut map = PropertyMap::new();
        for entry in self.entries {
            let name = entry.key.name().to_string();
            if entry.key.is_dynamic() && map.contains_key(&name) {
                debug!("Attribute '{}' overrides mapped property", name);
            }
            map.insert(name, entry.value);
        }
        map
    }
}

/// Follow a dot-separated path into a JSON value.
///
/// Object segments are keys, array segments are zero-based indexes.
/// Returns `None` when any segment is missing, a scalar is traversed, an
/// index is not a number or out of range, or the path is empty.
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Resolve the static mapping against a record, in mapping order.
pub fn resolve_static(record: &SourceRecord, mapping: &FieldMapping) -> Vec<ResolvedProperty> {
    mapping
        .entries()
        .iter()
        .map(|entry| ResolvedProperty {
            key: PropertyKey::Static(entry.destination.clone()),
            value: resolve_path(&record.data, &entry.source_path)
                .cloned()
                .unwrap_or(Value::Null),
        })
        .collect()
}

/// Turn attribute entries into dynamic properties.
pub fn resolve_dynamic(attributes: Vec<AttributeEntry>) -> Vec<ResolvedProperty> {
    attributes
        .into_iter()
        .map(|attribute| ResolvedProperty {
            key: PropertyKey::Dynamic(attribute.key),
            value: attribute.value,
        })
        .collect()
}

/// Resolve a record: static mapping first, then attributes.
pub fn resolve_record(
    record: &SourceRecord,
    mapping: &FieldMapping,
    attributes: Vec<AttributeEntry>,
) -> ResolvedProperties {
    let mut entries = resolve_static(record, mapping);
    entries.extend(resolve_dynamic(attributes));
    ResolvedProperties { entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn customer() -> SourceRecord {
        SourceRecord::from_value(json!({
            "id": 42,
            "email": "a@x.com",
            "default_address": {"city": "Berlin", "zip": null},
            "addresses": [{"city": "Paris"}, {"city": "Rome"}],
            "tags": "vip"
        }))
        .unwrap()
    }

    #[test]
    fn test_resolve_path() {
        let record = customer();
        assert_eq!(resolve_path(&record.data, "email"), Some(&json!("a@x.com")));
        assert_eq!(
            resolve_path(&record.data, "default_address.city"),
            Some(&json!("Berlin"))
        );
        assert_eq!(resolve_path(&record.data, "addresses.1.city"), Some(&json!("Rome")));
        assert_eq!(resolve_path(&record.data, "default_address.zip"), Some(&Value::Null));
    }

    #[test]
    fn test_resolve_path_fails_soft() {
        let record = customer();
        assert_eq!(resolve_path(&record.data, "phone"), None);
        assert_eq!(resolve_path(&record.data, "email.domain"), None);
        assert_eq!(resolve_path(&record.data, "addresses.9.city"), None);
        assert_eq!(resolve_path(&record.data, "addresses.first.city"), None);
        assert_eq!(resolve_path(&record.data, "addresses.-1"), None);
        assert_eq!(resolve_path(&record.data, ""), None);
        assert_eq!(resolve_path(&record.data, "default_address..city"), None);
    }

    #[test]
    fn test_static_in_mapping_order() {
        let mapping = FieldMapping::new()
            .with("default_address.city", "city")
            .with("email", "email")
            .with("phone", "phone");

        let resolved = resolve_static(&customer(), &mapping);
        let names: Vec<&str> = resolved.iter().map(|p| p.key.name()).collect();
        assert_eq!(names, vec!["city", "email", "phone"]);
        assert_eq!(resolved[2].value, Value::Null);
    }

    #[test]
    fn test_dynamic_overrides_static() {
        let mapping = FieldMapping::new().with("email", "email").with("tags", "tier");
        let attributes = vec![
            AttributeEntry::new("tier", json!("gold")),
            AttributeEntry::new("birthday", json!("1990-01-01")),
        ];

        let map = resolve_record(&customer(), &mapping, attributes).into_map();
        let keys: Vec<&String> = map.keys().collect();
        assert_eq!(keys, vec!["email", "tier", "birthday"]);
        assert_eq!(map["tier"], json!("gold"));
    }

    #[test]
    fn test_property_key() {
        assert!(PropertyKey::Dynamic("x".to_string()).is_dynamic());
        assert!(!PropertyKey::Static("x".to_string()).is_dynamic());
        assert_eq!(PropertyKey::Static("email".to_string()).name(), "email");
    }

    proptest! {
        #[test]
        fn arbitrary_paths_never_panic(path in "[a-z_0-9.-]{0,24}") {
            let record = customer();
            let _ = resolve_path(&record.data, &path);
        }

        #[test]
        fn out_of_range_index_is_none(index in 2usize..10_000) {
            let record = customer();
            let path = format!("addresses.{}.city", index);
            prop_assert_eq!(resolve_path(&record.data, &path), None);
        }

        #[test]
        fn indexing_a_scalar_is_none(segment in "[a-z0-9]{1,6}") {
            let record = customer();
            let path = format!("email.{}", segment);
            prop_assert_eq!(resolve_path(&record.data, &path), None);
        }
    }
}
