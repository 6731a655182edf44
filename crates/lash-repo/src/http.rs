//! HTTP-backed collaborators for the install driver
//!
//! [`HttpFetcher`] retrieves manifests, [`HttpCatalog`] reads the package
//! catalog and [`HttpChartIndex`] resolves the framework chart from a Helm
//! repository index. All three share one `reqwest` client.

use std::time::Duration;

use async_trait::async_trait;
use lash_kube::{CatalogSource, ChartIndex, ChartVersion, ManifestFetcher, PackageInfo, PackageRole};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::catalog::Catalog;
use crate::error::{REQUEST_TIMEOUT_SECS, RepoError, Result};
use crate::index::HelmIndex;

/// Shared HTTP client
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("lash/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { inner })
    }

    /// GET `url` and return the body, failing on non-success status
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url, "fetching");
        let response = self.inner.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RepoError::HttpError {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Fetches raw manifests over HTTP
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: HttpClient,
}

impl HttpFetcher {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ManifestFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> lash_kube::Result<Vec<u8>> {
        Ok(self.client.get_bytes(url).await?)
    }
}

/// Package catalog served over HTTP, fetched once per instance
#[derive(Debug)]
pub struct HttpCatalog {
    client: HttpClient,
    url: String,
    catalog: OnceCell<Catalog>,
}

impl HttpCatalog {
    pub fn new(client: HttpClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            catalog: OnceCell::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The catalog, fetched on first use
    pub async fn catalog(&self) -> Result<&Catalog> {
        self.catalog
            .get_or_try_init(|| async {
                let data = self.client.get_bytes(&self.url).await?;
                let catalog = Catalog::from_bytes(&data)?.resolve(&self.url)?;
                debug!(url = %self.url, packages = catalog.packages.len(), "catalog loaded");
                Ok::<_, RepoError>(catalog)
            })
            .await
    }
}

#[async_trait]
impl CatalogSource for HttpCatalog {
    async fn packages(&self, role: PackageRole) -> lash_kube::Result<Vec<PackageInfo>> {
        Ok(self.catalog().await?.filter_by(role))
    }
}

/// Resolves a chart from a Helm repository index
#[derive(Debug, Clone)]
pub struct HttpChartIndex {
    client: HttpClient,
    index_url: String,
    chart: String,
    /// Pinned version, latest stable when `None`
    version: Option<String>,
}

impl HttpChartIndex {
    /// `repository` is the repository base URL or the full `index.yaml` URL
    pub fn new(client: HttpClient, repository: &str, chart: impl Into<String>) -> Self {
        let index_url = if repository.ends_with(".yaml") {
            repository.to_string()
        } else {
            format!("{}/index.yaml", repository.trim_end_matches('/'))
        };
        Self {
            client,
            index_url,
            chart: chart.into(),
            version: None,
        }
    }

    /// Install this version instead of the latest
    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version.filter(|v| !v.is_empty());
        self
    }

    pub fn index_url(&self) -> &str {
        &self.index_url
    }

    pub async fn fetch_index(&self) -> Result<HelmIndex> {
        let data = self.client.get_bytes(&self.index_url).await?;
        HelmIndex::from_bytes(&data)
    }

    /// Version and archive URL of the chart to install
    pub async fn resolve(&self) -> Result<ChartVersion> {
        let index = self.fetch_index().await?;
        let entry = match &self.version {
            Some(version) => index.version(&self.chart, version)?,
            None => index.latest(&self.chart)?,
        };

        Ok(ChartVersion {
            version: entry.version.clone(),
            url: entry.download_url(&self.index_url)?,
        })
    }
}

#[async_trait]
impl ChartIndex for HttpChartIndex {
    async fn latest(&self) -> lash_kube::Result<ChartVersion> {
        Ok(self.resolve().await?)
    }
}
