//! Product catalog proxy over the Fake Store API, with a read-through cache
//! for the category list.

use crate::cache::CacheClient;
use crate::error::HttpClientError;
use crate::httpclient::HttpClient;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const FAKE_STORE_BASE_URL: &str = "https://fakestoreapi.com";
pub const CATEGORIES_CACHE_KEY: &str = "fakeStore:categories:all";
pub const CATEGORIES_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

pub type Category = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub category: Category,
    pub image: String,
    #[serde(default)]
    pub rating: ProductRating,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductRating {
    pub rate: f64,
    pub count: i64,
}

/// Upstream catalog access.
#[async_trait]
pub trait CatalogRepo: Send + Sync {
    async fn categories(&self) -> Result<Vec<Category>, HttpClientError>;

    async fn products_by_category(&self, category: &str) -> Result<Vec<Product>, HttpClientError>;

    async fn product(&self, id: i64) -> Result<Product, HttpClientError>;
}

pub struct FakeStoreRepo {
    client: HttpClient,
}

impl FakeStoreRepo {
    pub fn new(base_url: &str) -> Result<Self, HttpClientError> {
        Ok(Self {
            client: HttpClient::new(base_url)?,
        })
    }
}

#[async_trait]
impl CatalogRepo for FakeStoreRepo {
    async fn categories(&self) -> Result<Vec<Category>, HttpClientError> {
        self.client.get(&["products", "categories"]).await
    }

    async fn products_by_category(&self, category: &str) -> Result<Vec<Product>, HttpClientError> {
        self.client.get(&["products", "category", category]).await
    }

    async fn product(&self, id: i64) -> Result<Product, HttpClientError> {
        self.client.get(&["products", &id.to_string()]).await
    }
}

/// Per-category failures collected during a fan-out.
#[derive(Debug)]
pub struct FanOutError {
    pub failures: Vec<(Category, HttpClientError)>,
}

impl std::fmt::Display for FanOutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} category request(s) failed", self.failures.len())?;
        for (category, err) in &self.failures {
            write!(f, "; {}: {}", category, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for FanOutError {}

#[derive(Clone)]
pub struct FakeStoreService {
    cache: Arc<dyn CacheClient>,
    repo: Arc<dyn CatalogRepo>,
}

impl FakeStoreService {
    pub fn new(cache: Arc<dyn CacheClient>, repo: Arc<dyn CatalogRepo>) -> Self {
        Self { cache, repo }
    }

    /// Cache problems are logged and fall through to the upstream API.
    pub async fn categories(&self, skip_cache: bool) -> Result<Vec<Category>, HttpClientError> {
        if skip_cache {
            return self.repo.categories().await;
        }

        if let Some(categories) = self.cached_categories().await {
            return Ok(categories);
        }

        let categories = self.repo.categories().await?;
        self.cache_categories(&categories).await;
        Ok(categories)
    }

    async fn cached_categories(&self) -> Option<Vec<Category>> {
        let raw = match self.cache.get(CATEGORIES_CACHE_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "failed to read cached categories");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(categories) => {
                debug!(key = CATEGORIES_CACHE_KEY, "categories served from cache");
                Some(categories)
            }
            Err(e) => {
                warn!(error = %e, "failed to unmarshal cached categories");
                None
            }
        }
    }

    async fn cache_categories(&self, categories: &[Category]) {
        let encoded = match serde_json::to_string(categories) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "failed to marshal categories for cache");
                return;
            }
        };

        if let Err(e) = self
            .cache
            .set(CATEGORIES_CACHE_KEY, &encoded, Some(CATEGORIES_CACHE_TTL))
            .await
        {
            warn!(error = %e, "failed to cache categories");
        }
    }

    pub async fn products_by_category(&self, category: &str) -> Result<Vec<Product>, HttpClientError> {
        self.repo.products_by_category(category).await
    }

    pub async fn product(&self, id: i64) -> Result<Product, HttpClientError> {
        self.repo.product(id).await
    }

    /// Fetches every category's products with at most `concurrency` requests
    /// in flight. Output follows category order.
    pub async fn all_category_products(
        &self,
        categories: Vec<Category>,
        concurrency: usize,
    ) -> Result<Vec<Product>, FanOutError> {
        let results: Vec<(usize, Category, Result<Vec<Product>, HttpClientError>)> =
            stream::iter(categories.into_iter().enumerate())
                .map(|(index, category)| async move {
                    let result = self.products_by_category(&category).await;
                    (index, category, result)
                })
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;

        let mut batches: Vec<(usize, Vec<Product>)> = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (index, category, result) in results {
            match result {
                Ok(products) => batches.push((index, products)),
                Err(e) => failures.push((category, e)),
            }
        }

        if !failures.is_empty() {
            return Err(FanOutError { failures });
        }

        batches.sort_by_key(|(index, _)| *index);
        Ok(batches.into_iter().flat_map(|(_, products)| products).collect())
    }
}
