//! Shopify source implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crmsync_common::{AttributeEntry, RecordId, Result, SourceRecord};

use crate::http::HttpSettings;
use crate::provider::SourceProvider;

use super::client::ShopifyClient;

/// Default Admin API version.
pub const DEFAULT_API_VERSION: &str = "2025-01";
/// Largest page size the Admin API accepts.
pub const MAX_PAGE_SIZE: u32 = 250;

/// Where an object type lives in the Admin API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Collection endpoint relative to the versioned API root (e.g. `customers.json`).
    pub endpoint: String,
    /// Key of the record array in the collection response (e.g. `customers`).
    pub collection_key: String,
    /// Resource path used for metafields (e.g. `customers`).
    pub attribute_resource: String,
}

impl ResourceSpec {
    /// Conventional routing: `customer` → `customers.json` / `customers`.
    pub fn for_object_type(object_type: &str) -> Self {
        let plural = if object_type.ends_with('s') {
            object_type.to_string()
        } else {
            format!("{}s", object_type)
        };
        Self {
            endpoint: format!("{}.json", plural),
            collection_key: plural.clone(),
            attribute_resource: plural,
        }
    }
}

/// Shopify source configuration.
#[derive(Clone)]
pub struct ShopifyConfig {
    /// Store host or URL (e.g. `shop.myshopify.com`).
    pub store_url: String,
    /// Admin API access token.
    pub access_token: Zeroizing<String>,
    /// Admin API version.
    pub api_version: String,
    /// Records requested per page.
    pub page_size: u32,
    /// Transport settings.
    pub http: HttpSettings,
}

impl ShopifyConfig {
    /// Create a configuration with default version, page size and transport settings.
    pub fn new(store_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            store_url: store_url.into(),
            access_token: Zeroizing::new(access_token.into()),
            api_version: DEFAULT_API_VERSION.to_string(),
            page_size: MAX_PAGE_SIZE,
            http: HttpSettings::default(),
        }
    }
}

impl fmt::Debug for ShopifyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShopifyConfig")
            .field("store_url", &self.store_url)
            .field("access_token", &"[REDACTED]")
            .field("api_version", &self.api_version)
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// Shopify-backed source.
///
/// Object types are routed to Admin API resources through registered
/// [`ResourceSpec`]s, falling back to [`ResourceSpec::for_object_type`].
pub struct ShopifySource {
    client: ShopifyClient,
    resources: HashMap<String, ResourceSpec>,
}

impl ShopifySource {
    /// Create a new Shopify source.
    ///
    /// # Errors
    /// - Invalid store URL
    /// - HTTP client construction failure
    pub fn new(config: ShopifyConfig) -> Result<Self> {
        let page_size = config.page_size.clamp(1, MAX_PAGE_SIZE);
        let client = ShopifyClient::new(
            &config.store_url,
            &config.api_version,
            config.access_token,
            page_size,
            &config.http,
        )?;

        Ok(Self {
            client,
            resources: HashMap::new(),
        })
    }

    /// Route an object type to an explicit resource.
    pub fn with_resource(mut self, object_type: impl Into<String>, spec: ResourceSpec) -> Self {
        self.resources.insert(object_type.into(), spec);
        self
    }

    /// Resource routing for an object type.
    pub fn resource(&self, object_type: &str) -> ResourceSpec {
        self.resources
            .get(object_type)
            .cloned()
            .unwrap_or_else(|| ResourceSpec::for_object_type(object_type))
    }
}

#[async_trait]
impl SourceProvider for ShopifySource {
    fn name(&self) -> &str {
        "shopify"
    }

    async fn list_records(&self, object_type: &str) -> Result<Vec<SourceRecord>> {
        let spec = self.resource(object_type);
        let items = self
            .client
            .list_collection(&spec.endpoint, &spec.collection_key)
            .await?;

        let total = items.len();
        let records: Vec<SourceRecord> = items
            .into_iter()
            .filter_map(|item| match SourceRecord::from_value(item) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping malformed {} record: {}", object_type, e);
                    None
                }
            })
            .collect();

        debug!(
            "Listed {} {} records ({} malformed)",
            records.len(),
            object_type,
            total - records.len()
        );
        Ok(records)
    }

    async fn list_attributes(
        &self,
        object_type: &str,
        record_id: &RecordId,
    ) -> Result<Vec<AttributeEntry>> {
        let spec = self.resource(object_type);
        let metafields = self
            .client
            .list_metafields(&spec.attribute_resource, record_id.as_str())
            .await?;

        Ok(metafields
            .into_iter()
            .filter_map(|mf| mf.key.map(|key| AttributeEntry::new(key, mf.value)))
            .collect())
    }
}
