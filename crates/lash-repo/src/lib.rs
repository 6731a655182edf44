//! Lash remote sources
//!
//! This crate provides the collaborators the install driver reaches over
//! the network, plus the tool's configuration file:
//!
//! - **Chart index**: Helm `index.yaml` parsing and latest-stable resolution
//! - **Catalog**: the package catalog, filtered by role
//! - **HTTP collaborators**: manifest fetcher, catalog source and chart index
//!   implementing the `lash-kube` collaborator traits
//! - **Configuration**: `config.yaml` lookup with `LASH_*` overrides
//!
//! ## Example
//!
//! ```rust,no_run
//! use lash_repo::{HttpChartIndex, HttpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new()?;
//! let index = HttpChartIndex::new(client, "https://charts.crossplane.io/stable", "crossplane");
//! let chart = index.resolve().await?;
//! println!("{} from {}", chart.version, chart.url);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod http;
pub mod index;

// Re-exports for convenience
pub use catalog::Catalog;
pub use config::{ChartConfig, LashConfig, default_kubeconfig};
pub use error::{RepoError, Result};
pub use http::{HttpCatalog, HttpChartIndex, HttpClient, HttpFetcher};
pub use index::{ChartEntry, HelmIndex, resolve_url};
