//! crmsync sync pipeline
//!
//! This module moves records from a source collaborator into a destination
//! CRM, including:
//! - Field resolution from a static mapping and dynamic attributes
//! - Normalization: defaults, flattening, allow-lists
//! - Destination schema reconciliation with a per-run cache
//! - Upsert keyed by a unique field
//! - Concurrent per-object-type orchestration with per-record isolation

pub mod config;
mod deadline;
pub mod engine;
pub mod normalizer;
pub mod outcome;
pub mod resolver;
pub mod schema;
pub mod upsert;

// Re-export main types
pub use config::{
    AllowedValuesRule, FieldMapping, FieldMappingEntry, ObjectConfig, SyncConfig,
    DEFAULT_PROPERTY_GROUP,
};
pub use engine::SyncEngine;
pub use normalizer::{Adjustment, Normalized, Normalizer};
pub use outcome::{ObjectReport, OutcomeCounts, OutcomeKind, RecordOutcome, SyncOutcome, SyncReport};
pub use resolver::{resolve_path, resolve_record, PropertyKey, ResolvedProperties, ResolvedProperty};
pub use schema::{RejectedProperty, SchemaChanges, SchemaReconciler};
pub use upsert::{unique_value, UpsertEngine};
