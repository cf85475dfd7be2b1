//! Shopify Admin REST source for crmsync.
//!
//! This module provides a source backed by the Shopify Admin API with:
//! - Cursor pagination through the `Link` response header
//! - Metafields exposed as dynamic attributes
//! - Per-object-type resource routing

pub mod client;
pub mod provider;

pub use client::{next_page_url, ShopifyClient};
pub use provider::{ResourceSpec, ShopifyConfig, ShopifySource};
