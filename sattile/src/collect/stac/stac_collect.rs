use anyhow::{Context, Result};
use reqwest::blocking::Client;
use std::time::Duration;
use url::Url;

use super::models::{StacItem, StacItemCollection, StacLink, StacSearchParams};
use crate::collect::global_variables::{PLANETARY_COMPUTER_SIGN, PLANETARY_COMPUTER_STAC};

/// Imagery catalog seam used by the acquisition pipeline.
///
/// `StacCollect` talks to a real STAC API; tests substitute their own
/// implementation.
pub trait ImageryCatalog {
    /// Root URL recorded in the cube provenance (`stac` attribute).
    fn url(&self) -> &str;

    /// Run an Item Search and return every matching item (paginated).
    fn search(&self, params: &StacSearchParams) -> Result<Vec<StacItem>>;

    /// Make the listed assets of an item readable (e.g. SAS-sign them).
    fn sign(&self, item: StacItem, assets: &[String]) -> Result<StacItem>;
}

/// Blocking STAC Item Search client
pub struct StacCollect {
    /// Catalog root, e.g. `https://planetarycomputer.microsoft.com/api/stac/v1`
    pub url: String,
    /// Page size requested from the catalog
    pub page_size: u32,
    /// Maximum items collected across pages
    pub max_items: usize,
    client: Client,
}

impl StacCollect {
    pub fn new(url: Option<String>) -> Result<Self> {
        Self::with_timeout(url, Duration::from_secs(60))
    }

    pub fn with_timeout(url: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let url = url.unwrap_or_else(|| PLANETARY_COMPUTER_STAC.to_string());
        Url::parse(&url).context(format!("Invalid STAC URL: {}", url))?;

        Ok(StacCollect {
            url,
            page_size: 100,
            max_items: 500,
            client,
        })
    }

    /// `POST /search` endpoint for this catalog
    pub fn search_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        if base.ends_with("/search") {
            base.to_string()
        } else {
            format!("{}/search", base)
        }
    }

    /// Planetary Computer assets need a SAS token before they can be read.
    pub fn needs_signing(&self) -> bool {
        Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h == "planetarycomputer.microsoft.com"))
            .unwrap_or(false)
    }

    fn post_search(&self, url: &str, params: &StacSearchParams) -> Result<StacItemCollection> {
        log::debug!("STAC search POST {}", url);

        let response = self
            .client
            .post(url)
            .json(params)
            .send()
            .context("Failed to send STAC search request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            anyhow::bail!(
                "STAC search returned HTTP {}: {}",
                status,
                body.chars().take(500).collect::<String>()
            );
        }

        response
            .json::<StacItemCollection>()
            .context("Failed to parse STAC search response")
    }

    /// Follow a `next` link: POST links carry a body (optionally merged into
    /// the original request), GET links are fetched as-is.
    fn follow_next(
        &self,
        link: &StacLink,
        original: &StacSearchParams,
    ) -> Result<StacItemCollection> {
        let method = link.method.as_deref().unwrap_or("GET").to_uppercase();

        if method == "POST" {
            let body = next_page_body(link, original)?;
            self.post_search(&link.href, &body)
        } else {
            let response = self
                .client
                .get(&link.href)
                .send()
                .context("Failed to fetch STAC next page")?;
            if !response.status().is_success() {
                anyhow::bail!("STAC pagination returned HTTP {}", response.status());
            }
            response
                .json::<StacItemCollection>()
                .context("Failed to parse STAC next page")
        }
    }

    /// Sign one href through the Planetary Computer `/sign` endpoint.
    fn sign_href(&self, href: &str) -> Result<String> {
        let url = format!(
            "{}?href={}",
            PLANETARY_COMPUTER_SIGN,
            urlencoding::encode(href)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .context("Failed to send signing request")?;

        if !response.status().is_success() {
            anyhow::bail!("Signing service returned HTTP {}", response.status());
        }

        let body: serde_json::Value = response
            .json()
            .context("Failed to parse signing response")?;

        body["href"]
            .as_str()
            .map(|s| s.to_string())
            .context("Signing response missing 'href' field")
    }
}

/// Request body for a POST `next` link.
pub(crate) fn next_page_body(
    link: &StacLink,
    original: &StacSearchParams,
) -> Result<StacSearchParams> {
    let body = match (&link.body, link.merge.unwrap_or(false)) {
        (Some(link_body), true) => {
            let mut base =
                serde_json::to_value(original).context("Failed to serialize search params")?;
            if let (Some(base_obj), Some(link_obj)) = (base.as_object_mut(), link_body.as_object())
            {
                for (k, v) in link_obj {
                    base_obj.insert(k.clone(), v.clone());
                }
            }
            base
        }
        (Some(link_body), false) => link_body.clone(),
        (None, _) => serde_json::to_value(original).context("Failed to serialize search params")?,
    };
    serde_json::from_value(body).context("Failed to parse next page body")
}

impl ImageryCatalog for StacCollect {
    fn url(&self) -> &str {
        &self.url
    }

    fn search(&self, params: &StacSearchParams) -> Result<Vec<StacItem>> {
        let mut params = params.clone();
        if params.limit.is_none() {
            params.limit = Some(self.page_size);
        }

        let mut items: Vec<StacItem> = Vec::new();
        let mut page = self.post_search(&self.search_url(), &params)?;

        loop {
            let next = page.next_link().cloned();
            items.append(&mut page.features);

            if items.len() >= self.max_items {
                break;
            }
            match next {
                Some(link) => {
                    page = self.follow_next(&link, &params)?;
                    if page.is_empty() {
                        break;
                    }
                }
                None => break,
            }
        }

        items.truncate(self.max_items);
        log::info!("STAC search returned {} items", items.len());
        Ok(items)
    }

    fn sign(&self, mut item: StacItem, assets: &[String]) -> Result<StacItem> {
        if !self.needs_signing() {
            return Ok(item);
        }
        for key in assets {
            if let Some(asset) = item.assets.get_mut(key) {
                asset.href = self
                    .sign_href(&asset.href)
                    .with_context(|| format!("Failed to sign asset {} of {}", key, item.id))?;
            }
        }
        Ok(item)
    }
}
