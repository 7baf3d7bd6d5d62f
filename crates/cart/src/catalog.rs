//! Read-only client for the public product API.
//!
//! Plain `GET`s, no caching, no pagination:
//!
//! - `/products`
//! - `/products/{id}`
//! - `/products/categories`
//! - `/products/category/{name}`

use std::sync::Arc;

use pocketshop_core::{ConversionRate, Price, ProductId};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;
use url::Url;

use crate::config::CatalogConfig;

/// Errors that can occur when reading the catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("Catalog returned HTTP {0}")]
    Status(u16),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The requested product does not exist.
    #[error("Product not found: {0}")]
    NotFound(ProductId),

    /// A URL could not be built from the configured base.
    #[error("Invalid catalog URL: {0}")]
    InvalidUrl(String),
}

/// Customer rating summary.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rating {
    pub rate: f64,
    pub count: u32,
}

/// A catalog product. Prices are in US dollars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub title: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub rating: Rating,
}

impl Product {
    /// Price in the display currency.
    #[must_use]
    pub fn display_price(&self, rate: &ConversionRate) -> Price {
        rate.to_price(self.price)
    }
}

/// Category selection for product listings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CategoryFilter {
    #[default]
    All,
    Named(String),
}

impl CategoryFilter {
    /// `"all"` (any case) or an empty name selects everything.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        let name = name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case("all") {
            Self::All
        } else {
            Self::Named(name.to_string())
        }
    }
}

/// Client for the product API.
#[derive(Clone)]
pub struct CatalogClient {
    inner: Arc<CatalogClientInner>,
}

struct CatalogClientInner {
    client: reqwest::Client,
    base_url: Url,
}

impl CatalogClient {
    /// Create a new catalog client.
    #[must_use]
    pub fn new(config: &CatalogConfig) -> Self {
        Self {
            inner: Arc::new(CatalogClientInner {
                client: reqwest::Client::new(),
                base_url: config.base_url.clone(),
            }),
        }
    }

    /// All products.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if the request or decoding fails.
    #[instrument(skip(self))]
    pub async fn products(&self) -> Result<Vec<Product>, CatalogError> {
        self.get_json(&["products"]).await
    }

    /// Products for a category filter.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if the request or decoding fails.
    #[instrument(skip(self))]
    pub async fn products_in(&self, filter: &CategoryFilter) -> Result<Vec<Product>, CatalogError> {
        match filter {
            CategoryFilter::All => self.products().await,
            CategoryFilter::Named(name) => {
                self.get_json(&["products", "category", name.as_str()])
                    .await
            }
        }
    }

    /// A single product.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if the API has no such product.
    #[instrument(skip(self))]
    pub async fn product(&self, id: ProductId) -> Result<Product, CatalogError> {
        let id_segment = id.to_string();
        // The API answers an unknown id with 200 and an empty body.
        let product: Option<Product> = self.get_json(&["products", &id_segment]).await?;
        product.ok_or(CatalogError::NotFound(id))
    }

    /// Category names, not including the implicit "all".
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if the request or decoding fails.
    #[instrument(skip(self))]
    pub async fn categories(&self) -> Result<Vec<String>, CatalogError> {
        self.get_json(&["products", "categories"]).await
    }

    /// Build the URL for a list of path segments.
    fn url(&self, segments: &[&str]) -> Result<Url, CatalogError> {
        let mut url = self.inner.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| CatalogError::InvalidUrl(self.inner.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, CatalogError> {
        let url = self.url(segments)?;
        let response = self.inner.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = %status, "catalog request failed");
            return Err(CatalogError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let body = if body.trim().is_empty() { "null" } else { body.as_str() };
        Ok(serde_json::from_str(body)?)
    }
}
