//! Common utilities and types shared across crmsync crates.
//!
//! This module provides the error taxonomy and the record types that flow
//! between the source collaborator, the sync pipeline and the destination.

pub mod error;
pub mod types;
pub mod value;

pub use error::{Error, Result};
pub use types::{AttributeEntry, PropertyMap, RecordId, SourceRecord};
pub use value::{canonical_json, is_blank, value_text};
