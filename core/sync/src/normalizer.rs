//! Property normalization.
//!
//! Three passes over a resolved property map, in order:
//! 1. configured defaults fill properties that are missing, `null` or empty
//! 2. arrays and objects are flattened to canonical JSON strings
//! 3. allow-lists replace or drop values outside the permitted set
//!
//! The result is idempotent: normalizing a normalized map changes nothing.

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

use crmsync_common::{canonical_json, is_blank, value_text, PropertyMap};

use crate::config::{AllowedValuesRule, ObjectConfig};

/// A change made by the allow-list pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Adjustment {
    /// The value was replaced by the rule's default.
    Substituted {
        property: String,
        from: Option<String>,
        to: String,
    },
    /// The value was dropped because the rule has no default.
    Removed {
        property: String,
        value: Option<String>,
    },
}

/// A normalized property map and the allow-list changes behind it.
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub properties: PropertyMap,
    pub adjustments: Vec<Adjustment>,
}

/// Normalizer for one object type.
pub struct Normalizer<'a> {
    defaults: &'a PropertyMap,
    rules: &'a BTreeMap<String, AllowedValuesRule>,
}

impl<'a> Normalizer<'a> {
    /// Create a normalizer from explicit defaults and rules.
    pub fn new(defaults: &'a PropertyMap, rules: &'a BTreeMap<String, AllowedValuesRule>) -> Self {
        Self { defaults, rules }
    }

    /// Create a normalizer for an object configuration.
    pub fn for_object(object: &'a ObjectConfig) -> Self {
        Self::new(&object.default_values, &object.allowed_values)
    }

    /// Run all passes.
    pub fn normalize(&self, mut properties: PropertyMap) -> Normalized {
        apply_defaults(&mut properties, self.defaults);
        flatten(&mut properties);
        let adjustments = enforce_allowed(&mut properties, self.rules);
        Normalized {
            properties,
            adjustments,
        }
    }
}

/// Fill missing, `null` or empty properties from `defaults`.
pub fn apply_defaults(properties: &mut PropertyMap, defaults: &PropertyMap) {
    for (name, default) in defaults {
        if is_blank(properties.get(name)) {
            properties.insert(name.clone(), flatten_value(default.clone()));
        }
    }
}

/// Replace every array or object value by its canonical JSON string.
pub fn flatten(properties: &mut PropertyMap) {
    for value in properties.values_mut() {
        if value.is_array() || value.is_object() {
            *value = flatten_value(std::mem::take(value));
        }
    }
}

fn flatten_value(value: Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => Value::String(canonical_json(&value)),
        scalar => scalar,
    }
}

/// Apply allow-lists. Properties without a rule, and absent properties,
/// are left alone. `null` is never an allowed value.
pub fn enforce_allowed(
    properties: &mut PropertyMap,
    rules: &BTreeMap<String, AllowedValuesRule>,
) -> Vec<Adjustment> {
    let mut adjustments = Vec::new();

    for (name, rule) in rules {
        let Some(current) = properties.get(name) else {
            continue;
        };
        let text = value_text(current);
        if rule.permits(text.as_deref()) {
            continue;
        }

        match &rule.default {
            Some(default) => {
                if text.as_deref() == Some(default.as_str()) {
                    continue;
                }
                warn!(
                    "Property '{}' value {:?} not allowed, substituted default '{}'",
                    name, text, default
                );
                properties.insert(name.clone(), Value::String(default.clone()));
                adjustments.push(Adjustment::Substituted {
                    property: name.clone(),
                    from: text,
                    to: default.clone(),
                });
            }
            None => {
                warn!(
                    "Property '{}' value {:?} not allowed and no default, removing it",
                    name, text
                );
                properties.remove(name);
                adjustments.push(Adjustment::Removed {
                    property: name.clone(),
                    value: text,
                });
            }
        }
    }

    adjustments
}
