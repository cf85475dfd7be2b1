//! Collaborator abstraction for crmsync.
//!
//! This module provides trait-based interfaces for the two systems a sync
//! run talks to: the source that owns the records and the destination CRM
//! whose property schema is extended on demand.
//!
//! # Design Principles
//! - Collaborator isolation: no platform-specific logic in the sync pipeline
//! - Async operations: all calls are async and independently bounded by the caller
//! - Transport concerns (pagination, retry, status mapping) stay in the collaborator
//! - Unified error semantics: consistent error types across collaborators

pub mod http;
pub mod hubspot;
pub mod memory;
pub mod provider;
pub mod retry;
pub mod shopify;

pub use http::HttpSettings;
pub use hubspot::{HubSpotConfig, HubSpotDestination};
pub use memory::{CallCounts, MemoryDestination, MemorySource};
pub use provider::{
    DestinationProvider, PropertyCreation, PropertyDefinition, SourceProvider, WriteResponse,
};
pub use retry::{RetryConfig, RetryExecutor};
pub use shopify::{ResourceSpec, ShopifyConfig, ShopifySource};
