//! Shopify Admin REST API client.

use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;
use zeroize::Zeroizing;

use crmsync_common::{Error, Result};

use crate::http::{read_json, send_error, HttpSettings};
use crate::retry::RetryExecutor;

/// Header carrying the Admin API access token.
const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

/// Metafield as returned by the Admin API.
#[derive(Debug, Clone, Deserialize)]
pub struct Metafield {
    /// Metafield key, used verbatim as the attribute key.
    #[serde(default)]
    pub key: Option<String>,
    /// Metafield value (usually a string, even for JSON-typed metafields).
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Deserialize)]
struct MetafieldListResponse {
    #[serde(default)]
    metafields: Vec<Metafield>,
}

/// Shopify Admin API client.
pub struct ShopifyClient {
    http: Client,
    base: Url,
    access_token: Zeroizing<String>,
    page_size: u32,
    retry: RetryExecutor,
}

impl ShopifyClient {
    /// Create a new client for a store.
    ///
    /// `store_url` may be a bare host (`shop.myshopify.com`) or a full URL.
    ///
    /// # Errors
    /// - The store URL cannot be parsed
    /// - The HTTP client cannot be built
    pub fn new(
        store_url: &str,
        api_version: &str,
        access_token: Zeroizing<String>,
        page_size: u32,
        settings: &HttpSettings,
    ) -> Result<Self> {
        let trimmed = store_url.trim().trim_end_matches('/');
        let root = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{}", trimmed)
        };
        let base = Url::parse(&format!("{}/admin/api/{}/", root, api_version))
            .map_err(|e| Error::Config(format!("Invalid Shopify store URL '{}': {}", store_url, e)))?;

        Ok(Self {
            http: settings.build_client()?,
            base,
            access_token,
            page_size,
            retry: RetryExecutor::new(settings.retry.clone()),
        })
    }

    /// Base URL of the versioned Admin API.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Config(format!("Invalid Shopify endpoint '{}': {}", path, e)))
    }

    /// Fetch every element of a collection, following pagination links.
    pub async fn list_collection(&self, endpoint: &str, collection_key: &str) -> Result<Vec<Value>> {
        let mut url = self.endpoint(endpoint)?;
        url.query_pairs_mut()
            .append_pair("limit", &self.page_size.to_string());

        let mut items = Vec::new();
        let mut next = Some(url);

        while let Some(page_url) = next {
            let (body, link) = self
                .retry
                .execute(collection_key, || self.fetch_page(page_url.clone()))
                .await?;

            match body.get(collection_key) {
                Some(Value::Array(page)) => items.extend(page.iter().cloned()),
                Some(other) => {
                    return Err(Error::Serialization(format!(
                        "Expected '{}' to be an array, got {}",
                        collection_key, other
                    )));
                }
                None => {}
            }

            next = match link.as_deref().and_then(next_page_url) {
                Some(href) => Some(
                    Url::parse(&href)
                        .map_err(|e| Error::Transport(format!("Invalid pagination link: {}", e)))?,
                ),
                None => None,
            };
            debug!("Fetched page of {}, {} items so far", collection_key, items.len());
        }

        Ok(items)
    }

    async fn fetch_page(&self, url: Url) -> Result<(Value, Option<String>)> {
        let response = self
            .http
            .get(url)
            .header(ACCESS_TOKEN_HEADER, self.access_token.as_str())
            .send()
            .await
            .map_err(|e| send_error("Shopify list request", e))?;

        let link = response
            .headers()
            .get(header::LINK)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body: Value = read_json(response).await?;
        Ok((body, link))
    }

    /// Fetch the metafields of one resource.
    ///
    /// A missing resource yields an empty list.
    pub async fn list_metafields(&self, resource: &str, id: &str) -> Result<Vec<Metafield>> {
        let url = self.endpoint(&format!("{}/{}/metafields.json", resource, id))?;

        self.retry
            .execute("metafield listing", || self.fetch_metafields(url.clone()))
            .await
    }

    async fn fetch_metafields(&self, url: Url) -> Result<Vec<Metafield>> {
        let response = self
            .http
            .get(url)
            .header(ACCESS_TOKEN_HEADER, self.access_token.as_str())
            .send()
            .await
            .map_err(|e| send_error("Shopify metafields request", e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let list: MetafieldListResponse = read_json(response).await?;
        Ok(list.metafields)
    }
}

/// Extract the `rel="next"` target from a `Link` header.
pub fn next_page_url(link_header: &str) -> Option<String> {
    link_header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| {
            let p = p.trim();
            p == "rel=\"next\"" || p == "rel=next"
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_page_url() {
        let header = r#"<https://shop.myshopify.com/admin/api/2025-01/customers.json?limit=250&page_info=prev>; rel="previous", <https://shop.myshopify.com/admin/api/2025-01/customers.json?limit=250&page_info=abc>; rel="next""#;
        assert_eq!(
            next_page_url(header).as_deref(),
            Some("https://shop.myshopify.com/admin/api/2025-01/customers.json?limit=250&page_info=abc")
        );
    }

    #[test]
    fn test_next_page_url_absent() {
        let header = r#"<https://shop.myshopify.com/a?page_info=prev>; rel="previous""#;
        assert_eq!(next_page_url(header), None);
        assert_eq!(next_page_url(""), None);
    }

    #[test]
    fn test_base_url_from_bare_host() {
        let client = ShopifyClient::new(
            "shop.myshopify.com/",
            "2025-01",
            Zeroizing::new("token".to_string()),
            250,
            &HttpSettings::default(),
        )
        .unwrap();
        assert_eq!(
            client.base_url().as_str(),
            "https://shop.myshopify.com/admin/api/2025-01/"
        );
        assert_eq!(
            client.endpoint("/customers.json").unwrap().as_str(),
            "https://shop.myshopify.com/admin/api/2025-01/customers.json"
        );
    }
}
