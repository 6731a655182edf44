//! Helm chart repository index
//!
//! The `index.yaml` served by a Helm repository, reduced to what the
//! framework install needs: versions, download URLs and creation dates.

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

use crate::error::{RepoError, Result};

/// Helm repository index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmIndex {
    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub generated: Option<DateTime<Utc>>,

    /// Chart versions by chart name
    #[serde(default)]
    pub entries: HashMap<String, Vec<ChartEntry>>,
}

/// One chart version in the index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartEntry {
    pub name: String,

    pub version: String,

    #[serde(default)]
    pub app_version: Option<String>,

    /// Archive URLs, absolute or relative to the index
    #[serde(default)]
    pub urls: Vec<String>,

    #[serde(default)]
    pub created: Option<DateTime<Utc>>,

    #[serde(default)]
    pub digest: Option<String>,

    #[serde(default)]
    pub deprecated: bool,
}

impl ChartEntry {
    pub fn parsed_version(&self) -> Option<Version> {
        Version::parse(self.version.trim_start_matches('v')).ok()
    }

    /// Primary download URL, resolved against the index location
    pub fn download_url(&self, index_url: &str) -> Result<String> {
        let url = self.urls.first().ok_or_else(|| RepoError::NoDownloadUrl {
            name: self.name.clone(),
            version: self.version.clone(),
        })?;
        resolve_url(index_url, url)
    }
}

impl HelmIndex {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| RepoError::InvalidIndex {
            message: e.to_string(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let yaml = std::str::from_utf8(bytes).map_err(|e| RepoError::InvalidIndex {
            message: format!("Invalid UTF-8: {}", e),
        })?;
        Self::from_yaml(yaml)
    }

    /// Highest version of `name`
    ///
    /// Prereleases are only considered when the chart has no stable
    /// version. Entries whose version is not semver lose to every entry
    /// whose version is.
    pub fn latest(&self, name: &str) -> Result<&ChartEntry> {
        let versions = self
            .entries
            .get(name)
            .ok_or_else(|| RepoError::ChartNotFound {
                name: name.to_string(),
            })?;

        let has_stable = versions
            .iter()
            .any(|e| e.parsed_version().is_some_and(|v| v.pre.is_empty()));

        versions
            .iter()
            .filter(|e| {
                !has_stable || e.parsed_version().is_some_and(|v| v.pre.is_empty())
            })
            .max_by(|a, b| match (a.parsed_version(), b.parsed_version()) {
                (Some(va), Some(vb)) => va.cmp(&vb),
                (Some(_), None) => std::cmp::Ordering::Greater,
                (None, Some(_)) => std::cmp::Ordering::Less,
                (None, None) => a.version.cmp(&b.version),
            })
            .ok_or_else(|| RepoError::NoVersionsAvailable {
                name: name.to_string(),
            })
    }

    /// A specific version of `name`, with or without a leading `v`
    pub fn version(&self, name: &str, version: &str) -> Result<&ChartEntry> {
        let wanted = version.trim_start_matches('v');
        self.entries
            .get(name)
            .ok_or_else(|| RepoError::ChartNotFound {
                name: name.to_string(),
            })?
            .iter()
            .find(|e| e.version.trim_start_matches('v') == wanted)
            .ok_or_else(|| RepoError::VersionNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }
}

/// Resolve `url` against `base`, leaving absolute URLs untouched
pub fn resolve_url(base: &str, url: &str) -> Result<String> {
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(url.to_string());
    }
    let base = Url::parse(base).map_err(|e| RepoError::InvalidUrl {
        url: base.to_string(),
        reason: e.to_string(),
    })?;
    Ok(base.join(url)?.to_string())
}
