//! Package catalog document
//!
//! ```yaml
//! apiVersion: v1
//! packages:
//!   - name: provider-helm
//!     version: v0.19.0
//!     role: provider
//!     manifest: providers/helm/provider.yaml
//!     image: xpkg.upbound.io/crossplane-contrib/provider-helm:v0.19.0
//! ```
//!
//! Relative manifest paths are resolved against the catalog's own URL.

use lash_kube::{PackageInfo, PackageRole};
use serde::{Deserialize, Serialize};

use crate::error::{RepoError, Result};
use crate::index::resolve_url;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub packages: Vec<PackageInfo>,
}

impl Catalog {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let catalog: Self = serde_yaml::from_str(yaml).map_err(|e| RepoError::InvalidCatalog {
            message: e.to_string(),
        })?;

        if let Some(entry) = catalog.packages.iter().find(|p| p.name.is_empty()) {
            return Err(RepoError::InvalidCatalog {
                message: format!("entry with manifest '{}' has no name", entry.manifest),
            });
        }
        Ok(catalog)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let yaml = std::str::from_utf8(bytes).map_err(|e| RepoError::InvalidCatalog {
            message: format!("Invalid UTF-8: {}", e),
        })?;
        Self::from_yaml(yaml)
    }

    /// Make every manifest URL absolute
    pub fn resolve(mut self, catalog_url: &str) -> Result<Self> {
        for package in &mut self.packages {
            package.manifest = resolve_url(catalog_url, &package.manifest)?;
        }
        Ok(self)
    }

    /// Entries with `role`, in catalog order
    pub fn filter_by(&self, role: PackageRole) -> Vec<PackageInfo> {
        self.packages
            .iter()
            .filter(|p| p.role == role)
            .cloned()
            .collect()
    }
}
