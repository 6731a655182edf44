//! Install driver
//!
//! Installs the framework chart, then every provider and package of the
//! catalog, then applies the Core claim with values built from its XRD
//! schema. Each stage waits for the cluster to report readiness before the
//! next one starts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::claims::{
    self, CORE_XRD_NAME, Core, Field, parse_set_values, spec_fields, values::merge,
    values::set_path,
};
use crate::client::ResourceClient;
use crate::error::{KubeError, Result};
use crate::events::EventBus;
use crate::framework::{self, ChartInstall, ChartManager, ProxySettings, RELEASE_NAME};
use crate::kinds::{COMPOSITE_RESOURCE_DEFINITION, KindRef, POD};
use crate::object::{INSTALLED_BY_LABEL, INSTALLED_BY_VALUE, ObjectExt, PACKAGE_NAME_LABEL, decode};
use crate::watch::{WatchTarget, conditions, watch_until};

/// API group every provider and package document must belong to
pub const PACKAGE_GROUP: &str = "pkg.crossplane.io";

/// Documents fetched for a provider, next to its manifest
const PROVIDER_DOCUMENTS: [&str; 4] = [
    "provider",
    "controller-config",
    "service-account",
    "cluster-role-binding",
];

/// Role of a catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageRole {
    Provider,
    Package,
}

/// A catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    /// URL of the package manifest
    pub manifest: String,
    #[serde(default)]
    pub image: String,
    pub role: PackageRole,
}

/// Latest chart of the framework
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartVersion {
    pub version: String,
    pub url: String,
}

/// Source of installable packages
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn packages(&self, role: PackageRole) -> Result<Vec<PackageInfo>>;
}

/// Retrieves raw manifests
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Resolves the framework chart to install
#[async_trait]
pub trait ChartIndex: Send + Sync {
    async fn latest(&self) -> Result<ChartVersion>;
}

/// Asks the user for a claim field value
pub trait Prompter: Send + Sync {
    fn ask(&self, field: &Field) -> Result<String>;
}

/// Collaborators the install driver calls out to
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn CatalogSource>,
    pub fetcher: Arc<dyn ManifestFetcher>,
    pub chart_index: Arc<dyn ChartIndex>,
    pub charts: Arc<dyn ChartManager>,
    pub prompter: Arc<dyn Prompter>,
}

/// Options for the install driver
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Namespace to install into
    pub namespace: String,

    /// Git URL written to the claim's `repoURL`
    pub catalog_url: String,

    /// Skip the framework chart
    pub no_framework: bool,

    /// Record `managementCluster=true` in the claim
    pub management_cluster: bool,

    /// `key=value` overrides applied last
    pub set_values: Vec<String>,

    /// Proxy settings forwarded to the framework
    pub proxy: ProxySettings,

    /// Extra `key=value` chart values for the framework
    pub chart_values: Vec<(String, String)>,

    /// Version written to the claim's `version`
    pub core_version: String,

    /// Deadline of each readiness wait
    pub timeout: Duration,

    /// Publish debug events
    pub verbose: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            namespace: "landscape-system".to_string(),
            catalog_url: "https://github.com/platformnow/catalog.git".to_string(),
            no_framework: false,
            management_cluster: false,
            set_values: Vec::new(),
            proxy: ProxySettings::default(),
            chart_values: Vec::new(),
            core_version: "5.22.1".to_string(),
            timeout: Duration::from_secs(600),
            verbose: false,
        }
    }
}

/// What an install run did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstallSummary {
    /// Chart version installed, `None` when skipped or already present
    pub framework_installed: Option<String>,
    pub providers: Vec<String>,
    pub packages: Vec<String>,
    /// Spec of the applied Core claim
    pub claim_values: Option<JsonValue>,
}

/// Runs the install flow
pub struct Installer {
    client: Arc<dyn ResourceClient>,
    collaborators: Collaborators,
    bus: EventBus,
    options: InstallOptions,
    cancel: CancellationToken,
}

impl Installer {
    pub fn new(
        client: Arc<dyn ResourceClient>,
        collaborators: Collaborators,
        bus: EventBus,
        options: InstallOptions,
    ) -> Self {
        Self {
            client,
            collaborators,
            bus,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancel readiness waits when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self) -> Result<InstallSummary> {
        let mut summary = InstallSummary::default();

        if !self.options.no_framework {
            summary.framework_installed = self.install_framework().await?;
        }
        summary.providers = self.install_providers().await?;
        summary.packages = self.install_packages().await?;

        if let Some(values) = self.claim_values().await? {
            self.apply_claim(&values).await?;
            summary.claim_values = Some(values);
        }

        Ok(summary)
    }

    fn debug(&self, message: impl Into<String>) {
        if self.options.verbose {
            self.bus.debug(message);
        }
    }

    async fn install_framework(&self) -> Result<Option<String>> {
        let namespace = &self.options.namespace;
        if let Some(existing) = framework::detect(self.client.as_ref(), namespace).await? {
            debug!(pod = %existing.pod, "framework already installed");
            self.debug(format!(
                "crossplane {} already installed",
                existing.display_version()
            ));
            return Ok(None);
        }

        let chart = self.collaborators.chart_index.latest().await?;
        self.bus
            .start_wait(format!("installing crossplane {}...", chart.version));

        let mut values = self.options.chart_values.clone();
        values.extend(self.options.proxy.chart_values());
        let request = ChartInstall {
            release: RELEASE_NAME.to_string(),
            chart_url: chart.url.clone(),
            namespace: namespace.clone(),
            values,
        };
        self.collaborators.charts.install(&request).await?;

        self.bus
            .done(format!("crossplane {} installed", chart.version));
        info!(version = %chart.version, "framework installed");
        Ok(Some(chart.version))
    }

    async fn install_providers(&self) -> Result<Vec<String>> {
        let providers = self
            .collaborators
            .catalog
            .packages(PackageRole::Provider)
            .await
            .map_err(|e| e.in_step("fetching providers from catalog"))?;

        let mut installed = Vec::new();
        for info in providers {
            self.bus.start_wait(format!(
                "installing provider {} ({})...",
                info.name, info.version
            ));
            self.install_provider(&info)
                .await
                .map_err(|e| e.in_step(format!("installing package '{}'", info.name)))?;
            self.bus.done(format!(
                "Provider {} ({}) installed",
                info.name, info.version
            ));
            self.debug(format!("> image: {}", info.image));
            installed.push(info.name);
        }
        Ok(installed)
    }

    async fn install_provider(&self, info: &PackageInfo) -> Result<()> {
        for document in PROVIDER_DOCUMENTS {
            let url = if document == "provider" {
                info.manifest.clone()
            } else {
                sibling_url(&info.manifest, &format!("{}.yaml", document))
            };

            let (mut object, kind) = self.fetch_document(&url).await?;

            if document == "provider" && kind.group != PACKAGE_GROUP {
                return Err(KubeError::InvalidManifest(format!(
                    "{} is not a provider",
                    object.name()
                )));
            }

            // pods of the provider carry these labels, the readiness wait selects on them
            if document == "controller-config" {
                object.set_field(
                    &["spec", "metadata"],
                    json!({ "labels": {
                        INSTALLED_BY_LABEL: INSTALLED_BY_VALUE,
                        PACKAGE_NAME_LABEL: info.name,
                    }}),
                )?;
            }

            self.bus
                .start_wait(format!("Installing {} {}", info.name, document));
            self.client.apply(&object, &kind).await?;
            self.bus.done(format!("Installed {} {}", info.name, document));
        }

        let target = WatchTarget::new(POD.kind_ref())
            .in_namespace(&self.options.namespace)
            .with_selector(format!("{}={}", PACKAGE_NAME_LABEL, info.name));
        let (client, target, cancel) = (self.client.as_ref(), &target, &self.cancel);
        reopening(self.options.timeout, move |remaining| {
            watch_until(client, target, conditions::pod_ready, cancel, remaining)
        })
        .await
    }

    async fn install_packages(&self) -> Result<Vec<String>> {
        let packages = self
            .collaborators
            .catalog
            .packages(PackageRole::Package)
            .await
            .map_err(|e| e.in_step("fetching packages from catalog"))?;

        let mut installed = Vec::new();
        for info in packages {
            self.bus.start_wait(format!(
                "installing package {} ({})...",
                info.name, info.version
            ));
            self.install_package(&info)
                .await
                .map_err(|e| e.in_step(format!("installing package '{}'", info.name)))?;
            self.bus.done(format!(
                "Package {} ({}) installed",
                info.name, info.version
            ));
            self.debug(format!("> image: {}", info.image));
            installed.push(info.name);
        }
        Ok(installed)
    }

    async fn install_package(&self, info: &PackageInfo) -> Result<()> {
        let (object, kind) = self.fetch_document(&info.manifest).await?;
        if kind.group != PACKAGE_GROUP {
            return Err(KubeError::InvalidManifest(format!(
                "{} is not a package",
                object.name()
            )));
        }

        self.client.apply(&object, &kind).await?;

        let predicate = conditions::named(
            object.name().to_string(),
            conditions::all_true(&["Installed", "Healthy"]),
        );
        let target = WatchTarget::new(kind);
        let (client, target, cancel, predicate) =
            (self.client.as_ref(), &target, &self.cancel, &predicate);
        reopening(self.options.timeout, move |remaining| {
            watch_until(client, target, predicate, cancel, remaining)
        })
        .await
    }

    async fn fetch_document(&self, url: &str) -> Result<(DynamicObject, KindRef)> {
        let raw = self.collaborators.fetcher.fetch(url).await?;
        self.debug(format!(
            "Retrieved YAML ... \n{}",
            String::from_utf8_lossy(&raw)
        ));
        decode(&raw)
    }

    /// Claim spec built from the Core XRD, `None` when the XRD is absent
    async fn claim_values(&self) -> Result<Option<JsonValue>> {
        let Some(xrd) = self
            .client
            .get(&COMPOSITE_RESOURCE_DEFINITION.kind_ref(), CORE_XRD_NAME, None)
            .await?
        else {
            debug!(xrd = CORE_XRD_NAME, "core XRD not installed, skipping claims");
            return Ok(None);
        };

        let mut values = json!({
            "namespace": self.options.namespace,
            "version": self.options.core_version,
        });

        for field in spec_fields(&xrd)? {
            if !field.required {
                if let Some(default) = field.default_value()? {
                    set_path(&mut values, &field.name, default)?;
                }
                continue;
            }

            if field.name == "repoURL" {
                self.bus
                    .done(format!("Setting catalogUrl to {}", self.options.catalog_url));
                set_path(
                    &mut values,
                    &field.name,
                    JsonValue::String(self.options.catalog_url.clone()),
                )?;
            } else {
                let answer = self.collaborators.prompter.ask(&field)?;
                set_path(&mut values, &field.name, field.parse_value(&answer)?)?;
            }
        }

        if self.options.management_cluster {
            set_path(&mut values, "managementCluster", JsonValue::Bool(true))?;
        }
        if !self.options.set_values.is_empty() {
            merge(&mut values, &parse_set_values(&self.options.set_values)?);
        }

        Ok(Some(values))
    }

    async fn apply_claim(&self, values: &JsonValue) -> Result<()> {
        self.bus.start_wait("installing core module claims ...");
        if self.options.verbose {
            self.debug(serde_yaml::to_string(values)?);
        }

        let core = Core::new();
        claims::apply_claim(self.client.as_ref(), &core, values).await?;
        self.bus.done("core package claims installed");

        self.bus.start_wait("waiting for readiness ...");
        let (client, core, cancel) = (self.client.as_ref(), &core, &self.cancel);
        reopening(self.options.timeout, move |remaining| {
            claims::wait_until_ready(client, core, cancel, remaining)
        })
        .await?;
        self.bus.done("Landscape IDP is ready");
        Ok(())
    }
}

/// Repeat a readiness wait whenever the server closes its watch, within one deadline
///
/// API servers end each watch after about 290s. `wait` gets the time left and
/// each reopen replays current state. Any other outcome ends the loop.
async fn reopening<W, Fut>(timeout: Duration, wait: W) -> Result<()>
where
    W: Fn(Duration) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match wait(remaining).await {
            Err(KubeError::StreamClosed { target }) => {
                debug!(watch = %target, "watch closed by server, reopening");
            }
            Err(KubeError::TimedOut { target, .. }) => {
                return Err(KubeError::TimedOut { target, timeout });
            }
            other => return other,
        }
    }
}

/// URL of `file` in the same directory as `manifest`
pub fn sibling_url(manifest: &str, file: &str) -> String {
    match manifest.rsplit_once('/') {
        Some((directory, _)) => format!("{}/{}", directory, file),
        None => file.to_string(),
    }
}
