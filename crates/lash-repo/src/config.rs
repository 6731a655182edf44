//! Tool configuration
//!
//! Read from the first of: an explicit path, `./config.yaml`,
//! `~/.lash/config.yaml`. A missing file means defaults. `LASH_*`
//! environment variables override the file.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RepoError, Result};

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "LASH_";

/// Configuration file contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LashConfig {
    /// Log filter used when `RUST_LOG` is unset
    pub log_level: Option<String>,

    /// Prompt for required claim fields
    pub interactive: bool,

    /// Git URL written to the claim's `repoURL`
    pub catalog_url: String,

    /// URL of the package catalog document
    pub catalog_index: String,

    pub kubeconfig: Option<PathBuf>,

    pub context: Option<String>,

    pub namespace: String,

    pub crossplane_chart: ChartConfig,

    /// Deadline of each readiness wait
    pub watch_timeout_secs: u64,

    /// Version written to the claim's `version`
    pub core_version: String,
}

impl Default for LashConfig {
    fn default() -> Self {
        Self {
            log_level: None,
            interactive: true,
            catalog_url: "https://github.com/platformnow/catalog.git".to_string(),
            catalog_index: "https://raw.githubusercontent.com/platformnow/catalog/main/catalog.yaml"
                .to_string(),
            kubeconfig: None,
            context: None,
            namespace: "landscape-system".to_string(),
            crossplane_chart: ChartConfig::default(),
            watch_timeout_secs: 600,
            core_version: "5.22.1".to_string(),
        }
    }
}

/// Where the framework chart comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    /// Helm repository URL
    pub repository: String,

    pub name: String,

    /// Pinned version, latest stable when unset
    pub version: Option<String>,

    /// Extra chart values
    pub values: BTreeMap<String, JsonValue>,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            repository: "https://charts.crossplane.io/stable".to_string(),
            name: "crossplane".to_string(),
            version: None,
            values: BTreeMap::new(),
        }
    }
}

impl ChartConfig {
    /// Values flattened to dotted `key=value` pairs for the chart manager
    pub fn set_values(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (key, value) in &self.values {
            flatten(key, value, &mut pairs);
        }
        pairs
    }
}

fn flatten(prefix: &str, value: &JsonValue, pairs: &mut Vec<(String, String)>) {
    match value {
        JsonValue::Object(map) => {
            for (key, nested) in map {
                flatten(&format!("{}.{}", prefix, key), nested, pairs);
            }
        }
        JsonValue::String(s) => pairs.push((prefix.to_string(), s.clone())),
        JsonValue::Null => {}
        other => pairs.push((prefix.to_string(), other.to_string())),
    }
}

impl LashConfig {
    /// Load from `explicit` or the default lookup order, then apply the environment
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(RepoError::InvalidConfig {
                        message: format!("config file not found: {}", path.display()),
                    });
                }
                Self::load_from(path)?
            }
            None => match Self::candidate_paths().into_iter().find(|p| p.exists()) {
                Some(path) => Self::load_from(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env();
        Ok(config)
    }

    /// Load a specific file, without environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|e| RepoError::InvalidConfig {
            message: format!("{}: {}", path.display(), e),
        })
    }

    /// Implicit config locations, in lookup order
    pub fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.yaml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".lash").join("config.yaml"));
        }
        paths
    }

    /// Apply `LASH_*` overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply `LASH_*` overrides from `lookup`
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.is_empty())
        };

        if let Some(v) = var("NAMESPACE") {
            self.namespace = v;
        }
        if let Some(v) = var("CONTEXT") {
            self.context = Some(v);
        }
        if let Some(v) = var("KUBECONFIG") {
            self.kubeconfig = Some(PathBuf::from(v));
        }
        if let Some(v) = var("CATALOG_URL") {
            self.catalog_url = v;
        }
        if let Some(v) = var("CATALOG_INDEX") {
            self.catalog_index = v;
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.log_level = Some(v);
        }
        if let Some(v) = var("INTERACTIVE") {
            self.interactive = !matches!(v.as_str(), "false" | "0" | "no");
        }
    }

    pub fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_timeout_secs)
    }

    /// Kubeconfig to use: configured path, then `$KUBECONFIG`, then `~/.kube/config`
    pub fn kubeconfig_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.kubeconfig {
            return Ok(path.clone());
        }
        if let Some(path) = std::env::var_os("KUBECONFIG").filter(|p| !p.is_empty()) {
            return Ok(PathBuf::from(path));
        }
        default_kubeconfig()
    }
}

/// `~/.kube/config`
pub fn default_kubeconfig() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| RepoError::InvalidConfig {
        message: "Could not determine home directory".to_string(),
    })?;
    Ok(home.join(".kube").join("config"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = LashConfig::default();
        assert_eq!(config.namespace, "landscape-system");
        assert!(config.interactive);
        assert_eq!(config.watch_timeout(), Duration::from_secs(600));
        assert_eq!(config.crossplane_chart.name, "crossplane");
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "namespace: platform\ninteractive: false\ncrossplane_chart:\n  version: 1.17.2\n",
        )
        .unwrap();

        let config = LashConfig::load_from(&path).unwrap();
        assert_eq!(config.namespace, "platform");
        assert!(!config.interactive);
        assert_eq!(config.crossplane_chart.version.as_deref(), Some("1.17.2"));
        assert_eq!(config.crossplane_chart.name, "crossplane");
        assert_eq!(config.core_version, "5.22.1");
    }

    #[test]
    fn test_empty_file_is_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "\n").unwrap();
        assert_eq!(LashConfig::load_from(&path).unwrap(), LashConfig::default());
    }

    #[test]
    fn test_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "watch_timeout_secs: soon\n").unwrap();
        assert!(matches!(
            LashConfig::load_from(&path),
            Err(RepoError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_explicit_missing_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(LashConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("LASH_NAMESPACE", "ops"),
            ("LASH_CONTEXT", "kind-lash"),
            ("LASH_CATALOG_URL", "https://git.example.com/catalog.git"),
            ("LASH_LOG_LEVEL", ""),
        ]);

        let mut config = LashConfig::default();
        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.namespace, "ops");
        assert_eq!(config.context.as_deref(), Some("kind-lash"));
        assert_eq!(config.catalog_url, "https://git.example.com/catalog.git");
        assert_eq!(config.log_level, None);
    }

    #[test]
    fn test_chart_values_flatten() {
        let mut chart = ChartConfig::default();
        chart.values.insert(
            "resourcesCrossplane".to_string(),
            json!({"limits": {"cpu": "500m", "memory": "1Gi"}}),
        );
        chart.values.insert("replicas".to_string(), json!(2));
        chart.values.insert("unset".to_string(), JsonValue::Null);

        assert_eq!(
            chart.set_values(),
            vec![
                ("replicas".to_string(), "2".to_string()),
                ("resourcesCrossplane.limits.cpu".to_string(), "500m".to_string()),
                ("resourcesCrossplane.limits.memory".to_string(), "1Gi".to_string()),
            ]
        );
    }
}
