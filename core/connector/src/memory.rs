//! In-memory collaborators for testing and dry runs.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crmsync_common::{value_text, AttributeEntry, Error, PropertyMap, RecordId, Result, SourceRecord};

use crate::provider::{
    DestinationProvider, PropertyCreation, PropertyDefinition, SourceProvider, WriteResponse,
};

/// In-memory source.
///
/// Records and attributes are seeded up front. Failures can be injected
/// per object type or per record.
#[derive(Default)]
pub struct MemorySource {
    records: HashMap<String, Vec<SourceRecord>>,
    attributes: HashMap<(String, RecordId), Vec<AttributeEntry>>,
    failing_lists: HashSet<String>,
    failing_attributes: HashSet<(String, RecordId)>,
    attribute_calls: Mutex<usize>,
}

impl MemorySource {
    /// Create a new empty memory source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the records of an object type.
    pub fn with_records(mut self, object_type: &str, records: Vec<SourceRecord>) -> Self {
        self.records.insert(object_type.to_string(), records);
        self
    }

    /// Seed the dynamic attributes of one record.
    pub fn with_attributes(
        mut self,
        object_type: &str,
        record_id: &RecordId,
        attributes: Vec<AttributeEntry>,
    ) -> Self {
        self.attributes
            .insert((object_type.to_string(), record_id.clone()), attributes);
        self
    }

    /// Make `list_records` fail with a transport error for an object type.
    pub fn fail_listing(mut self, object_type: &str) -> Self {
        self.failing_lists.insert(object_type.to_string());
        self
    }

    /// Make `list_attributes` fail with a transport error for one record.
    pub fn fail_attributes(mut self, object_type: &str, record_id: &RecordId) -> Self {
        self.failing_attributes
            .insert((object_type.to_string(), record_id.clone()));
        self
    }

    /// Number of `list_attributes` calls served so far.
    pub fn attribute_calls(&self) -> usize {
        *self.attribute_calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SourceProvider for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_records(&self, object_type: &str) -> Result<Vec<SourceRecord>> {
        if self.failing_lists.contains(object_type) {
            return Err(Error::Transport(format!(
                "Listing {} failed: connection reset",
                object_type
            )));
        }
        Ok(self.records.get(object_type).cloned().unwrap_or_default())
    }

    async fn list_attributes(
        &self,
        object_type: &str,
        record_id: &RecordId,
    ) -> Result<Vec<AttributeEntry>> {
        *self.attribute_calls.lock().unwrap_or_else(PoisonError::into_inner) += 1;

        let key = (object_type.to_string(), record_id.clone());
        if self.failing_attributes.contains(&key) {
            return Err(Error::Transport(format!(
                "Attributes for {} {} failed: connection reset",
                object_type, record_id
            )));
        }
        Ok(self.attributes.get(&key).cloned().unwrap_or_default())
    }
}

/// Per-operation call counters of a [`MemoryDestination`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub verify_access: usize,
    pub list_properties: usize,
    pub create_property: usize,
    pub find_by_unique_field: usize,
    pub create_record: usize,
    pub update_record: usize,
}

impl CallCounts {
    /// Total number of calls of any kind.
    pub fn total(&self) -> usize {
        self.verify_access
            + self.list_properties
            + self.create_property
            + self.find_by_unique_field
            + self.create_record
            + self.update_record
    }
}

/// A record held by the memory destination.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: String,
    pub properties: PropertyMap,
}

#[derive(Default)]
struct DestinationState {
    properties: HashMap<String, BTreeSet<String>>,
    definitions: Vec<(String, PropertyDefinition)>,
    records: HashMap<String, Vec<StoredRecord>>,
    /// Created properties still missing from listings, with the number of
    /// listings they stay hidden from.
    hidden: HashMap<(String, String), usize>,
    next_id: u64,
    calls: CallCounts,
}

/// In-memory destination CRM.
///
/// Behaves like the real destination where the pipeline depends on it:
/// duplicate property creation reports "already exists", writes naming an
/// unknown property are rejected with 400, and updates merge into the
/// stored record.
pub struct MemoryDestination {
    state: Mutex<DestinationState>,
    deny_access: bool,
    strict_schema: bool,
    latency: Option<Duration>,
    listing_lag: usize,
    rejected_writes: Option<(u16, String)>,
    rejected_properties: HashMap<String, (u16, String)>,
}

impl MemoryDestination {
    /// Create a new empty destination.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DestinationState::default()),
            deny_access: false,
            strict_schema: true,
            latency: None,
            listing_lag: 0,
            rejected_writes: None,
            rejected_properties: HashMap::new(),
        }
    }

    /// Seed existing properties on an object.
    pub fn with_properties<I, S>(self, object: &str, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()
            .properties
            .entry(object.to_string())
            .or_default()
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Seed an existing record on an object.
    pub fn with_record(self, object: &str, properties: PropertyMap) -> Self {
        {
            let mut state = self.lock();
            state.next_id += 1;
            let id = state.next_id.to_string();
            state
                .records
                .entry(object.to_string())
                .or_default()
                .push(StoredRecord { id, properties });
        }
        self
    }

    /// Reject every call as unauthorized.
    pub fn deny_access(mut self) -> Self {
        self.deny_access = true;
        self
    }

    /// Accept writes naming properties that were never created.
    pub fn lenient_schema(mut self) -> Self {
        self.strict_schema = false;
        self
    }

    /// Delay every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Hide each created property from the next `listings` property listings.
    pub fn with_listing_lag(mut self, listings: usize) -> Self {
        self.listing_lag = listings;
        self
    }

    /// Reject every record write with this status and body.
    pub fn reject_writes(mut self, status: u16, body: impl Into<String>) -> Self {
        self.rejected_writes = Some((status, body.into()));
        self
    }

    /// Reject the creation of one property name.
    pub fn reject_property(mut self, name: &str, status: u16, body: impl Into<String>) -> Self {
        self.rejected_properties
            .insert(name.to_string(), (status, body.into()));
        self
    }

    /// Snapshot of the call counters.
    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    /// Records currently stored on an object.
    pub fn records(&self, object: &str) -> Vec<StoredRecord> {
        self.lock().records.get(object).cloned().unwrap_or_default()
    }

    /// Property definitions created through this destination, in order.
    pub fn created_definitions(&self, object: &str) -> Vec<PropertyDefinition> {
        self.lock()
            .definitions
            .iter()
            .filter(|(o, _)| o == object)
            .map(|(_, d)| d.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, DestinationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, count: impl FnOnce(&mut CallCounts)) -> Result<()> {
        count(&mut self.lock().calls);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.deny_access {
            return Err(Error::Auth("401 Unauthorized - invalid access token".to_string()));
        }
        Ok(())
    }

    fn unknown_properties(&self, object: &str, properties: &PropertyMap) -> Vec<String> {
        if !self.strict_schema {
            return Vec::new();
        }
        let state = self.lock();
        let known = state.properties.get(object);
        properties
            .keys()
            .filter(|k| known.map_or(true, |set| !set.contains(*k)))
            .cloned()
            .collect()
    }

    fn check_write(&self, object: &str, properties: &PropertyMap) -> Option<WriteResponse> {
        if let Some((status, body)) = &self.rejected_writes {
            return Some(WriteResponse::Rejected {
                status: *status,
                body: body.clone(),
            });
        }
        let unknown = self.unknown_properties(object, properties);
        if !unknown.is_empty() {
            return Some(WriteResponse::Rejected {
                status: 400,
                body: format!("PROPERTY_DOESNT_EXIST: {}", unknown.join(", ")),
            });
        }
        None
    }
}

impl Default for MemoryDestination {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DestinationProvider for MemoryDestination {
    fn name(&self) -> &str {
        "memory"
    }

    async fn verify_access(&self) -> Result<()> {
        self.enter(|c| c.verify_access += 1).await
    }

    async fn list_properties(&self, object: &str) -> Result<BTreeSet<String>> {
        self.enter(|c| c.list_properties += 1).await?;

        let mut state = self.lock();
        let state = &mut *state;
        let visible = state
            .properties
            .get(object)
            .map(|names| {
                names
                    .iter()
                    .filter(|n| !state.hidden.contains_key(&(object.to_string(), (*n).clone())))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        state.hidden.retain(|(o, _), remaining| {
            if o == object {
                *remaining -= 1;
            }
            *remaining > 0
        });
        Ok(visible)
    }

    async fn create_property(
        &self,
        object: &str,
        definition: &PropertyDefinition,
    ) -> Result<PropertyCreation> {
        self.enter(|c| c.create_property += 1).await?;

        if let Some((status, body)) = self.rejected_properties.get(&definition.name) {
            return Ok(PropertyCreation::Rejected {
                status: *status,
                body: body.clone(),
            });
        }

        let mut state = self.lock();
        let inserted = state
            .properties
            .entry(object.to_string())
            .or_default()
            .insert(definition.name.clone());

        if inserted {
            state
                .definitions
                .push((object.to_string(), definition.clone()));
            if self.listing_lag > 0 {
                state.hidden.insert(
                    (object.to_string(), definition.name.clone()),
                    self.listing_lag,
                );
            }
            Ok(PropertyCreation::Created)
        } else {
            Ok(PropertyCreation::AlreadyExists)
        }
    }

    async fn find_by_unique_field(
        &self,
        object: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<String>> {
        self.enter(|c| c.find_by_unique_field += 1).await?;

        let state = self.lock();
        let found = state.records.get(object).and_then(|records| {
            records.iter().find(|r| {
                r.properties
                    .get(field)
                    .and_then(value_text)
                    .is_some_and(|v| v == value)
            })
        });
        Ok(found.map(|r| r.id.clone()))
    }

    async fn create_record(
        &self,
        object: &str,
        properties: &PropertyMap,
    ) -> Result<WriteResponse> {
        self.enter(|c| c.create_record += 1).await?;

        if let Some(rejection) = self.check_write(object, properties) {
            return Ok(rejection);
        }

        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id.to_string();
        state
            .records
            .entry(object.to_string())
            .or_default()
            .push(StoredRecord {
                id: id.clone(),
                properties: properties.clone(),
            });

        Ok(WriteResponse::Accepted { id })
    }

    async fn update_record(
        &self,
        object: &str,
        id: &str,
        properties: &PropertyMap,
    ) -> Result<WriteResponse> {
        self.enter(|c| c.update_record += 1).await?;

        if let Some(rejection) = self.check_write(object, properties) {
            return Ok(rejection);
        }

        let mut state = self.lock();
        let record = state
            .records
            .get_mut(object)
            .and_then(|records| records.iter_mut().find(|r| r.id == id));

        match record {
            Some(record) => {
                for (key, value) in properties {
                    record.properties.insert(key.clone(), value.clone());
                }
                Ok(WriteResponse::Accepted { id: id.to_string() })
            }
            None => Ok(WriteResponse::Rejected {
                status: 404,
                body: format!("No {} with id {}", object, id),
            }),
        }
    }
}
