//! Sync configuration and validation.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use crmsync_common::{Error, PropertyMap, Result};
use crmsync_connector::ResourceSpec;

/// Group new properties are filed under when none is configured.
pub const DEFAULT_PROPERTY_GROUP: &str = "defaultgroup";

fn default_call_timeout_secs() -> u64 {
    60
}

fn default_creation_pause_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_property_group() -> String {
    DEFAULT_PROPERTY_GROUP.to_string()
}

/// Run-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Upper bound for every collaborator call, in seconds.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Pause after each property creation, in milliseconds.
    #[serde(default = "default_creation_pause_ms")]
    pub creation_pause_ms: u64,
    /// Check destination credentials before the first record.
    #[serde(default = "default_true")]
    pub verify_access: bool,
    /// Object types to sync, in file order.
    #[serde(
        serialize_with = "serialize_objects",
        deserialize_with = "deserialize_objects"
    )]
    pub objects: Vec<ObjectConfig>,
}

impl SyncConfig {
    /// Create a configuration with default settings for the given objects.
    pub fn new(objects: Vec<ObjectConfig>) -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
            creation_pause_ms: default_creation_pause_ms(),
            verify_access: true,
            objects,
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read configuration {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Per-call timeout.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Pause after each property creation.
    pub fn creation_pause(&self) -> Duration {
        Duration::from_millis(self.creation_pause_ms)
    }

    /// Look up an object type.
    pub fn object(&self, name: &str) -> Option<&ObjectConfig> {
        self.objects.iter().find(|o| o.name == name)
    }

    /// Keep only the named object types, in configuration order.
    ///
    /// # Errors
    /// - A name does not match any configured object type
    pub fn retain_objects(&mut self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        for name in names {
            if self.object(name).is_none() {
                return Err(Error::Config(format!("Unknown object type '{}'", name)));
            }
        }
        self.objects.retain(|o| names.contains(&o.name));
        Ok(())
    }

    /// Check the configuration for errors that would corrupt or stall a run.
    pub fn validate(&self) -> Result<()> {
        if self.objects.is_empty() {
            return Err(Error::Config("No object types configured".to_string()));
        }
        if self.call_timeout_secs == 0 {
            return Err(Error::Config("call_timeout_secs must be positive".to_string()));
        }

        let mut seen = HashSet::new();
        for object in &self.objects {
            if !seen.insert(object.name.as_str()) {
                return Err(Error::Config(format!(
                    "Object type '{}' configured twice",
                    object.name
                )));
            }
            object.validate()?;
        }
        Ok(())
    }
}

/// Allow-list for one destination property.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedValuesRule {
    /// Permitted values. Empty means unrestricted.
    #[serde(default)]
    pub allowed: Vec<String>,
    /// Replacement for values outside the allowed set.
    #[serde(default)]
    pub default: Option<String>,
}

impl AllowedValuesRule {
    /// Create a rule.
    pub fn new<I, S>(allowed: I, default: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
            default: default.map(str::to_string),
        }
    }

    /// Whether a text value is permitted.
    pub fn permits(&self, text: Option<&str>) -> bool {
        if self.allowed.is_empty() {
            return true;
        }
        text.is_some_and(|t| self.allowed.iter().any(|a| a == t))
    }
}

/// One `sourcePath -> destinationProperty` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMappingEntry {
    /// Dot path into the source record.
    pub source_path: String,
    /// Destination property name.
    pub destination: String,
}

/// Ordered static field mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMapping {
    entries: Vec<FieldMappingEntry>,
}

impl FieldMapping {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pair.
    pub fn with(mut self, source_path: &str, destination: &str) -> Self {
        self.entries.push(FieldMappingEntry {
            source_path: source_path.to_string(),
            destination: destination.to_string(),
        });
        self
    }

    /// Pairs in configured order.
    pub fn entries(&self) -> &[FieldMappingEntry] {
        &self.entries
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reject empty paths and names, and destination names used twice.
    pub fn validate(&self) -> Result<()> {
        let mut destinations = HashSet::new();
        for entry in &self.entries {
            if entry.source_path.trim().is_empty() {
                return Err(Error::Config(format!(
                    "Empty source path mapped to '{}'",
                    entry.destination
                )));
            }
            if entry.destination.trim().is_empty() {
                return Err(Error::Config(format!(
                    "Source path '{}' maps to an empty property name",
                    entry.source_path
                )));
            }
            if !destinations.insert(entry.destination.as_str()) {
                return Err(Error::Config(format!(
                    "Destination property '{}' is mapped more than once",
                    entry.destination
                )));
            }
        }
        Ok(())
    }
}

impl Serialize for FieldMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let map: serde_json::Map<String, Value> = self
            .entries
            .iter()
            .map(|e| (e.source_path.clone(), Value::String(e.destination.clone())))
            .collect();
        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FieldMapping {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let map = serde_json::Map::<String, Value>::deserialize(deserializer)?;
        let mut entries = Vec::with_capacity(map.len());
        for (source_path, destination) in map {
            match destination {
                Value::String(destination) => entries.push(FieldMappingEntry {
                    source_path,
                    destination,
                }),
                other => {
                    return Err(D::Error::custom(format!(
                        "mapping for '{}' must be a property name, got {}",
                        source_path, other
                    )));
                }
            }
        }
        Ok(Self { entries })
    }
}

/// Configuration of one object type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectConfig {
    /// Source object type name (the key in the `objects` map).
    #[serde(skip)]
    pub name: String,
    /// Destination object the records are written to (e.g. `contacts`).
    pub destination_object: String,
    /// Destination property used to locate existing records.
    pub unique_field: String,
    /// Property group new properties are filed under.
    #[serde(default = "default_property_group")]
    pub property_group: String,
    /// Static `sourcePath -> destProperty` mapping.
    #[serde(default)]
    pub field_mapping: FieldMapping,
    /// Values used when a property is missing, null or empty.
    #[serde(default)]
    pub default_values: PropertyMap,
    /// Allow-lists per destination property.
    #[serde(default)]
    pub allowed_values: BTreeMap<String, AllowedValuesRule>,
    /// Whether to merge the record's dynamic attributes.
    #[serde(default = "default_true")]
    pub include_attributes: bool,
    /// Source routing override.
    #[serde(default)]
    pub source: Option<ResourceSpec>,
}

impl ObjectConfig {
    /// Create an object configuration with defaults.
    pub fn new(
        name: impl Into<String>,
        destination_object: impl Into<String>,
        unique_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            destination_object: destination_object.into(),
            unique_field: unique_field.into(),
            property_group: default_property_group(),
            field_mapping: FieldMapping::new(),
            default_values: PropertyMap::new(),
            allowed_values: BTreeMap::new(),
            include_attributes: true,
            source: None,
        }
    }

    /// Set the property group.
    pub fn with_property_group(mut self, group: impl Into<String>) -> Self {
        self.property_group = group.into();
        self
    }

    /// Set the static mapping.
    pub fn with_mapping(mut self, mapping: FieldMapping) -> Self {
        self.field_mapping = mapping;
        self
    }

    /// Add a default value.
    pub fn with_default(mut self, property: &str, value: impl Into<Value>) -> Self {
        self.default_values.insert(property.to_string(), value.into());
        self
    }

    /// Add an allow-list rule.
    pub fn with_rule(mut self, property: &str, rule: AllowedValuesRule) -> Self {
        self.allowed_values.insert(property.to_string(), rule);
        self
    }

    /// Enable or disable dynamic attributes.
    pub fn with_attributes(mut self, include: bool) -> Self {
        self.include_attributes = include;
        self
    }

    /// Validate this object configuration.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("Object type name cannot be empty".to_string()));
        }
        if self.destination_object.trim().is_empty() {
            return Err(Error::Config(format!(
                "{}: destination_object cannot be empty",
                self.name
            )));
        }
        if self.unique_field.trim().is_empty() {
            return Err(Error::Config(format!(
                "{}: unique_field cannot be empty",
                self.name
            )));
        }
        if self.property_group.trim().is_empty() {
            return Err(Error::Config(format!(
                "{}: property_group cannot be empty",
                self.name
            )));
        }
        self.field_mapping
            .validate()
            .map_err(|e| Error::Config(format!("{}: {}", self.name, e)))
    }
}

fn serialize_objects<S: Serializer>(
    objects: &[ObjectConfig],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    use serde::ser::SerializeMap;

    let mut map = serializer.serialize_map(Some(objects.len()))?;
    for object in objects {
        map.serialize_entry(&object.name, object)?;
    }
    map.end()
}

fn deserialize_objects<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<ObjectConfig>, D::Error> {
    let raw = serde_json::Map::<String, Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(name, value)| {
            let mut object: ObjectConfig = serde_json::from_value(value)
                .map_err(|e| D::Error::custom(format!("object type '{}': {}", name, e)))?;
            object.name = name;
            Ok(object)
        })
        .collect()
}
