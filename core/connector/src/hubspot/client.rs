//! HubSpot CRM v3 API client.

use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use zeroize::Zeroizing;

use crmsync_common::{Error, PropertyMap, Result};

use crate::http::{read_json, read_write_response, send_error, status_error, HttpSettings};
use crate::provider::{PropertyCreation, PropertyDefinition, WriteResponse};
use crate::retry::RetryExecutor;

/// Public HubSpot API base URL.
pub const HUBSPOT_API_BASE: &str = "https://api.hubapi.com";

#[derive(Debug, Deserialize)]
struct PropertySummary {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PropertyListResponse {
    #[serde(default)]
    results: Vec<PropertySummary>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// HubSpot API client.
pub struct HubSpotClient {
    http: Client,
    base_url: String,
    access_token: Zeroizing<String>,
    retry: RetryExecutor,
}

impl HubSpotClient {
    /// Create a new HubSpot client.
    pub fn new(
        base_url: &str,
        access_token: Zeroizing<String>,
        settings: &HttpSettings,
    ) -> Result<Self> {
        Ok(Self {
            http: settings.build_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
            retry: RetryExecutor::new(settings.retry.clone()),
        })
    }

    /// Get authorization header.
    fn auth_header(&self) -> String {
        format!("Bearer {}", self.access_token.as_str())
    }

    /// Check the token against the account endpoint.
    pub async fn verify_token(&self) -> Result<()> {
        let url = &format!("{}/integrations/v1/me", self.base_url);

        self.retry
            .execute("access check", || async move {
                let response = self
                    .http
                    .get(url)
                    .header(header::AUTHORIZATION, self.auth_header())
                    .send()
                    .await
                    .map_err(|e| send_error("HubSpot access check", e))?;

                let status = response.status();
                if status.is_success() {
                    Ok(())
                } else {
                    let body = response.text().await.unwrap_or_default();
                    Err(status_error(status, &body))
                }
            })
            .await
    }

    /// List property names of an object.
    pub async fn list_properties(&self, object: &str) -> Result<BTreeSet<String>> {
        let url = &format!("{}/crm/v3/properties/{}", self.base_url, object);

        let list: PropertyListResponse = self
            .retry
            .execute("property listing", || async move {
                let response = self
                    .http
                    .get(url)
                    .header(header::AUTHORIZATION, self.auth_header())
                    .send()
                    .await
                    .map_err(|e| send_error("HubSpot property listing", e))?;
                read_json(response).await
            })
            .await?;

        Ok(list.results.into_iter().filter_map(|p| p.name).collect())
    }

    /// Create a property. 409 means it already exists.
    pub async fn create_property(
        &self,
        object: &str,
        definition: &PropertyDefinition,
    ) -> Result<PropertyCreation> {
        let url = &format!("{}/crm/v3/properties/{}", self.base_url, object);

        self.retry
            .execute("property creation", || async move {
                let response = self
                    .http
                    .post(url)
                    .header(header::AUTHORIZATION, self.auth_header())
                    .json(definition)
                    .send()
                    .await
                    .map_err(|e| send_error("HubSpot property creation", e))?;

                let status = response.status();
                let body = response.text().await.unwrap_or_default();

                match status {
                    s if s.is_success() => Ok(PropertyCreation::Created),
                    StatusCode::CONFLICT => Ok(PropertyCreation::AlreadyExists),
                    StatusCode::UNAUTHORIZED
                    | StatusCode::FORBIDDEN
                    | StatusCode::TOO_MANY_REQUESTS => Err(status_error(status, &body)),
                    s if s.is_server_error() => Err(status_error(status, &body)),
                    s => Ok(PropertyCreation::Rejected {
                        status: s.as_u16(),
                        body,
                    }),
                }
            })
            .await
    }

    /// Search for the first record whose `field` equals `value`.
    pub async fn search_one(&self, object: &str, field: &str, value: &str) -> Result<Option<String>> {
        let url = &format!("{}/crm/v3/objects/{}/search", self.base_url, object);
        let payload = &json!({
            "filterGroups": [{
                "filters": [{
                    "propertyName": field,
                    "operator": "EQ",
                    "value": value,
                }]
            }],
            "properties": [field],
            "limit": 1,
        });

        let found: SearchResponse = self
            .retry
            .execute("search", || async move {
                let response = self
                    .http
                    .post(url)
                    .header(header::AUTHORIZATION, self.auth_header())
                    .json(payload)
                    .send()
                    .await
                    .map_err(|e| send_error("HubSpot search", e))?;
                read_json(response).await
            })
            .await?;

        Ok(found.results.into_iter().next().map(|hit| hit.id))
    }

    /// Create a record. Not retried: a lost response could mean a duplicate.
    pub async fn create_object(&self, object: &str, properties: &PropertyMap) -> Result<WriteResponse> {
        let url = format!("{}/crm/v3/objects/{}", self.base_url, object);

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, self.auth_header())
            .json(&json!({ "properties": properties }))
            .send()
            .await
            .map_err(|e| send_error("HubSpot create", e))?;

        read_write_response(response, None).await
    }

    /// Update a record. PATCH merges: omitted properties keep their values.
    pub async fn update_object(
        &self,
        object: &str,
        id: &str,
        properties: &PropertyMap,
    ) -> Result<WriteResponse> {
        if id.is_empty() {
            return Err(Error::Validation("Cannot update a record without id".to_string()));
        }
        let url = format!("{}/crm/v3/objects/{}/{}", self.base_url, object, id);

        let response = self
            .http
            .patch(&url)
            .header(header::AUTHORIZATION, self.auth_header())
            .json(&json!({ "properties": properties }))
            .send()
            .await
            .map_err(|e| send_error("HubSpot update", e))?;

        read_write_response(response, Some(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_list_parsing() {
        let body = r#"{"results":[{"name":"email","label":"Email"},{"label":"nameless"},{"name":"vip"}]}"#;
        let list: PropertyListResponse = serde_json::from_str(body).unwrap();
        let names: BTreeSet<String> = list.results.into_iter().filter_map(|p| p.name).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains("vip"));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = HubSpotClient::new(
            "https://api.hubapi.com/",
            Zeroizing::new("pat".to_string()),
            &HttpSettings::default(),
        )
        .unwrap();
        assert_eq!(client.base_url, HUBSPOT_API_BASE);
        assert_eq!(client.auth_header(), "Bearer pat");
    }
}
