//! Collaborator trait definitions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crmsync_common::{AttributeEntry, PropertyMap, RecordId, Result, SourceRecord};

/// Definition of a destination property created on demand.
///
/// New properties are always generic single-line text fields, since the
/// pipeline flattens every value to a scalar before sending it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDefinition {
    /// Internal property name.
    pub name: String,
    /// Human readable label.
    pub label: String,
    /// Value type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Input widget type.
    pub field_type: String,
    /// Property group the property is filed under.
    pub group_name: String,
}

impl PropertyDefinition {
    /// Build a text property definition with a label derived from the name.
    pub fn text(name: impl Into<String>, group_name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: derive_label(&name),
            name,
            kind: "string".to_string(),
            field_type: "text".to_string(),
            group_name: group_name.into(),
        }
    }
}

/// Turn `first_order_date` into `First order date`.
pub fn derive_label(name: &str) -> String {
    let words: Vec<&str> = name
        .split(|c: char| c == '_' || c == '-' || c == '.' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .collect();
    let joined = words.join(" ").to_lowercase();

    let mut chars = joined.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => name.to_string(),
    }
}

/// Result of a property creation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyCreation {
    /// The property was created.
    Created,
    /// The property already existed (possibly created by a concurrent caller).
    AlreadyExists,
    /// The destination refused the definition.
    Rejected { status: u16, body: String },
}

/// Result of a record create or update call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResponse {
    /// The write was applied to the record with this id.
    Accepted { id: String },
    /// The destination refused the write.
    Rejected { status: u16, body: String },
}

/// Source system exposing typed records with dynamic attributes.
///
/// Implementations own pagination and any transport retry policy.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Get the collaborator name (e.g., "shopify", "memory").
    fn name(&self) -> &str;

    /// Fetch every record of an object type.
    ///
    /// # Postconditions
    /// - All pages have been read
    /// - Records are returned in source order
    async fn list_records(&self, object_type: &str) -> Result<Vec<SourceRecord>>;

    /// Fetch the dynamic attributes attached to one record.
    ///
    /// A record without attributes yields an empty list, not an error.
    async fn list_attributes(
        &self,
        object_type: &str,
        record_id: &RecordId,
    ) -> Result<Vec<AttributeEntry>>;
}

/// Destination CRM whose property schema is extended on demand.
#[async_trait]
pub trait DestinationProvider: Send + Sync {
    /// Get the collaborator name (e.g., "hubspot", "memory").
    fn name(&self) -> &str;

    /// Check that the configured credentials are accepted.
    ///
    /// # Errors
    /// - `Error::Auth` when the destination rejects the credentials
    async fn verify_access(&self) -> Result<()> {
        Ok(())
    }

    /// List the property names defined on an object.
    async fn list_properties(&self, object: &str) -> Result<BTreeSet<String>>;

    /// Create a property.
    ///
    /// "Already exists" is reported as [`PropertyCreation::AlreadyExists`],
    /// never as an error.
    async fn create_property(
        &self,
        object: &str,
        definition: &PropertyDefinition,
    ) -> Result<PropertyCreation>;

    /// Find the id of the first record whose `field` equals `value` exactly.
    async fn find_by_unique_field(
        &self,
        object: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<String>>;

    /// Create a record from a full property map.
    async fn create_record(&self, object: &str, properties: &PropertyMap)
        -> Result<WriteResponse>;

    /// Update a record with a full property map.
    async fn update_record(
        &self,
        object: &str,
        id: &str,
        properties: &PropertyMap,
    ) -> Result<WriteResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_definition_serialization() {
        let def = PropertyDefinition::text("loyalty_tier", "contactinformation");
        let json = serde_json::to_value(&def).unwrap();

        assert_eq!(json["name"], "loyalty_tier");
        assert_eq!(json["label"], "Loyalty tier");
        assert_eq!(json["type"], "string");
        assert_eq!(json["fieldType"], "text");
        assert_eq!(json["groupName"], "contactinformation");
    }

    #[test]
    fn test_derive_label() {
        assert_eq!(derive_label("vip"), "Vip");
        assert_eq!(derive_label("first_order_date"), "First order date");
        assert_eq!(derive_label("Shipping-Zone"), "Shipping zone");
        assert_eq!(derive_label("__"), "__");
    }
}
