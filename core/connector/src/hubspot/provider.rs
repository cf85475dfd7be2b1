//! HubSpot destination implementation.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt;
use zeroize::Zeroizing;

use crmsync_common::{PropertyMap, Result};

use crate::http::HttpSettings;
use crate::provider::{DestinationProvider, PropertyCreation, PropertyDefinition, WriteResponse};

use super::client::{HubSpotClient, HUBSPOT_API_BASE};

/// HubSpot destination configuration.
#[derive(Clone)]
pub struct HubSpotConfig {
    /// API base URL.
    pub base_url: String,
    /// Private app access token.
    pub access_token: Zeroizing<String>,
    /// Transport settings.
    pub http: HttpSettings,
}

impl HubSpotConfig {
    /// Create a configuration against the public API.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            base_url: HUBSPOT_API_BASE.to_string(),
            access_token: Zeroizing::new(access_token.into()),
            http: HttpSettings::default(),
        }
    }

    /// Override the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl fmt::Debug for HubSpotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubSpotConfig")
            .field("base_url", &self.base_url)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// HubSpot-backed destination.
///
/// Object names are HubSpot object type names (`contacts`, `deals`,
/// `orders`, ...). Updates are PATCH requests, which HubSpot merges into
/// the stored record.
pub struct HubSpotDestination {
    client: HubSpotClient,
}

impl HubSpotDestination {
    /// Create a new HubSpot destination.
    pub fn new(config: HubSpotConfig) -> Result<Self> {
        let client = HubSpotClient::new(&config.base_url, config.access_token, &config.http)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DestinationProvider for HubSpotDestination {
    fn name(&self) -> &str {
        "hubspot"
    }

    async fn verify_access(&self) -> Result<()> {
        self.client.verify_token().await
    }

    async fn list_properties(&self, object: &str) -> Result<BTreeSet<String>> {
        self.client.list_properties(object).await
    }

    async fn create_property(
        &self,
        object: &str,
        definition: &PropertyDefinition,
    ) -> Result<PropertyCreation> {
        self.client.create_property(object, definition).await
    }

    async fn find_by_unique_field(
        &self,
        object: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<String>> {
        self.client.search_one(object, field, value).await
    }

    async fn create_record(
        &self,
        object: &str,
        properties: &PropertyMap,
    ) -> Result<WriteResponse> {
        self.client.create_object(object, properties).await
    }

    async fn update_record(
        &self,
        object: &str,
        id: &str,
        properties: &PropertyMap,
    ) -> Result<WriteResponse> {
        self.client.update_object(object, id, properties).await
    }
}
