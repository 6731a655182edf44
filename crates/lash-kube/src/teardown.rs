//! Teardown sequencer
//!
//! Removes everything the installer created, in an order that never leaves
//! objects stuck terminating:
//!
//! 1. gitops applications and projects
//! 2. packages and providers
//! 3. provider releases, controller configs and provider configs
//! 4. composite resource definitions
//! 5. the base framework (Helm release)
//! 6. quiet cleanup: compositions, lingering custom resources, fixed role
//!    allow-lists, claims and managed objects, the package lock, provider
//!    revisions
//! 7. the install namespace
//!
//! Failures in steps 1 to 5 abort the teardown. Step 6 swallows per-object
//! failures. A step 7 failure is returned once everything else is done.
//! In dry-run mode every step only lists and reports.

use std::fmt;
use std::sync::Arc;

use kube::api::DynamicObject;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::claims::{Core, Gitops, ManagedResource};
use crate::client::ResourceClient;
use crate::error::{KubeError, Result};
use crate::events::EventBus;
use crate::framework::{self, ChartManager, RELEASE_NAME};
use crate::kinds::{
    APP_PROJECT, APPLICATION, CLUSTER_ROLE, CLUSTER_ROLE_BINDING, COMPOSITE_RESOURCE_DEFINITION,
    COMPOSITION, CONFIGURATION, CONTROLLER_CONFIG, CUSTOM_RESOURCE_DEFINITION, HELM_PROVIDER_CONFIG,
    HELM_RELEASE, KUBERNETES_OBJECT, KUBERNETES_PROVIDER_CONFIG, KindRef, LOCK, NAMESPACE, PROVIDER,
    PROVIDER_REVISION, Scope,
};
use crate::object::ObjectExt;

/// Group suffixes whose custom resources are removed during cleanup
pub const DEFAULT_MANAGED_GROUPS: &[&str] =
    &["crossplane.io", "platformnow.io", "argoproj.io", "upbound.io"];

/// Cluster role bindings created by the providers and the gitops module
pub const CLUSTER_ROLE_BINDINGS: &[&str] = &[
    "provider-helm-admin-binding",
    "provider-kubernetes-admin-binding",
    "argocd-server-repo-server",
    "argocd-server-server",
    "argocd-server-application-controller",
];

/// Cluster roles created by the gitops module
pub const CLUSTER_ROLES: &[&str] = &[
    "argocd-server-aggregate-to-admin",
    "argocd-server-aggregate-to-edit",
    "argocd-server-aggregate-to-view",
    "argocd-server-application-controller",
    "argocd-server-repo-server",
    "argocd-server-server",
];

/// The seven teardown phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Gitops = 1,
    Packages = 2,
    ProviderResources = 3,
    Definitions = 4,
    Framework = 5,
    Cleanup = 6,
    Namespace = 7,
}

impl Phase {
    pub fn number(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Gitops => "gitops applications",
            Phase::Packages => "packages",
            Phase::ProviderResources => "provider resources",
            Phase::Definitions => "composite resource definitions",
            Phase::Framework => "framework",
            Phase::Cleanup => "cleanup",
            Phase::Namespace => "namespace",
        };
        write!(f, "step {} ({})", self.number(), name)
    }
}

/// Which objects of a kind a step removes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    /// Only objects with one of these names
    Named(Vec<String>),
}

impl Selection {
    pub fn named(names: &[&str]) -> Self {
        Selection::Named(names.iter().map(|n| n.to_string()).collect())
    }

    fn accepts(&self, object: &DynamicObject) -> bool {
        match self {
            Selection::All => true,
            Selection::Named(names) => names.iter().any(|n| n == object.name()),
        }
    }
}

/// Deletion of the objects of one kind
#[derive(Debug, Clone)]
pub struct DeleteSpec {
    pub kind: KindRef,
    /// Singular noun used in progress messages
    pub noun: &'static str,
    /// Plural noun used in dry-run counts
    pub plural: &'static str,
    pub selection: Selection,
    /// Clear finalizers before deleting
    pub strip_finalizers: bool,
}

impl DeleteSpec {
    pub fn new(kind: KindRef, noun: &'static str, plural: &'static str) -> Self {
        Self {
            kind,
            noun,
            plural,
            selection: Selection::All,
            strip_finalizers: false,
        }
    }

    /// Clear finalizers before deleting
    pub fn stripped(mut self) -> Self {
        self.strip_finalizers = true;
        self
    }

    pub fn only(mut self, names: &[&str]) -> Self {
        self.selection = Selection::named(names);
        self
    }

    /// The claim instance of a managed resource kind
    pub fn claim(claim: &dyn ManagedResource) -> Self {
        Self {
            kind: claim.kind_ref(),
            noun: "claim",
            plural: "claims",
            selection: Selection::named(&[claim.name()]),
            strip_finalizers: true,
        }
    }
}

/// What a step does
#[derive(Debug, Clone)]
pub enum StepAction {
    Delete(DeleteSpec),
    /// Detect the framework pod and uninstall its chart
    RemoveFramework,
    /// Delete instances of custom resource definitions in managed groups, then the definitions
    RemoveLingeringCustomResources,
    /// Strip and delete the install namespace
    RemoveNamespace,
}

/// One entry of the teardown plan
#[derive(Debug, Clone)]
pub struct TeardownStep {
    pub phase: Phase,
    pub action: StepAction,
    /// Per-object failures are logged and skipped instead of aborting
    pub quiet: bool,
}

impl TeardownStep {
    fn new(phase: Phase, action: StepAction) -> Self {
        Self {
            phase,
            action,
            quiet: phase == Phase::Cleanup,
        }
    }

    fn delete(phase: Phase, spec: DeleteSpec) -> Self {
        Self::new(phase, StepAction::Delete(spec))
    }

    /// Short name for logs and reports
    pub fn label(&self) -> String {
        match &self.action {
            StepAction::Delete(spec) => spec.plural.to_string(),
            StepAction::RemoveFramework => "crossplane".to_string(),
            StepAction::RemoveLingeringCustomResources => "custom resources".to_string(),
            StepAction::RemoveNamespace => "namespace".to_string(),
        }
    }
}

/// The fixed teardown order
pub fn plan() -> Vec<TeardownStep> {
    vec![
        TeardownStep::delete(
            Phase::Gitops,
            DeleteSpec::new(APPLICATION.kind_ref(), "application", "applications").stripped(),
        ),
        TeardownStep::delete(
            Phase::Gitops,
            DeleteSpec::new(APP_PROJECT.kind_ref(), "project", "projects").stripped(),
        ),
        TeardownStep::delete(
            Phase::Packages,
            DeleteSpec::new(CONFIGURATION.kind_ref(), "package", "packages"),
        ),
        TeardownStep::delete(
            Phase::Packages,
            DeleteSpec::new(PROVIDER.kind_ref(), "provider", "providers"),
        ),
        TeardownStep::delete(
            Phase::ProviderResources,
            DeleteSpec::new(HELM_RELEASE.kind_ref(), "release", "releases").stripped(),
        ),
        TeardownStep::delete(
            Phase::ProviderResources,
            DeleteSpec::new(
                CONTROLLER_CONFIG.kind_ref(),
                "controller config",
                "controller configs",
            ),
        ),
        TeardownStep::delete(
            Phase::ProviderResources,
            DeleteSpec::new(
                HELM_PROVIDER_CONFIG.kind_ref(),
                "provider config",
                "provider configs for Helm",
            )
            .stripped(),
        ),
        TeardownStep::delete(
            Phase::ProviderResources,
            DeleteSpec::new(
                KUBERNETES_PROVIDER_CONFIG.kind_ref(),
                "provider config",
                "provider configs for Kubernetes",
            )
            .stripped(),
        ),
        TeardownStep::delete(
            Phase::Definitions,
            DeleteSpec::new(
                COMPOSITE_RESOURCE_DEFINITION.kind_ref(),
                "composite resource definition",
                "composite resource definitions",
            )
            .stripped(),
        ),
        TeardownStep::new(Phase::Framework, StepAction::RemoveFramework),
        TeardownStep::delete(
            Phase::Cleanup,
            DeleteSpec::new(COMPOSITION.kind_ref(), "composition", "compositions"),
        ),
        TeardownStep::new(Phase::Cleanup, StepAction::RemoveLingeringCustomResources),
        TeardownStep::delete(
            Phase::Cleanup,
            DeleteSpec::new(
                CLUSTER_ROLE_BINDING.kind_ref(),
                "cluster role binding",
                "cluster role bindings",
            )
            .only(CLUSTER_ROLE_BINDINGS),
        ),
        TeardownStep::delete(
            Phase::Cleanup,
            DeleteSpec::new(CLUSTER_ROLE.kind_ref(), "cluster role", "cluster roles")
                .only(CLUSTER_ROLES),
        ),
        TeardownStep::delete(Phase::Cleanup, DeleteSpec::claim(&Core::new())),
        TeardownStep::delete(Phase::Cleanup, DeleteSpec::claim(&Gitops::named("core-argo-cd"))),
        TeardownStep::delete(
            Phase::Cleanup,
            DeleteSpec::new(HELM_RELEASE.kind_ref(), "release", "releases").stripped(),
        ),
        TeardownStep::delete(
            Phase::Cleanup,
            DeleteSpec::new(KUBERNETES_OBJECT.kind_ref(), "object", "managed objects").stripped(),
        ),
        TeardownStep::delete(
            Phase::Cleanup,
            DeleteSpec::new(LOCK.kind_ref(), "lock", "lock")
                .only(&["lock"])
                .stripped(),
        ),
        TeardownStep::delete(
            Phase::Cleanup,
            DeleteSpec::new(
                PROVIDER_REVISION.kind_ref(),
                "provider revision",
                "provider revisions",
            )
            .stripped(),
        ),
        TeardownStep::new(Phase::Namespace, StepAction::RemoveNamespace),
    ]
}

/// Options for a teardown run
#[derive(Debug, Clone)]
pub struct TeardownOptions {
    /// Namespace the platform was installed into
    pub namespace: String,

    /// Only list and report
    pub dry_run: bool,

    /// Publish debug events
    pub verbose: bool,

    /// Group suffixes whose lingering custom resources are removed
    pub managed_groups: Vec<String>,
}

impl Default for TeardownOptions {
    fn default() -> Self {
        Self {
            namespace: "landscape-system".to_string(),
            dry_run: false,
            verbose: false,
            managed_groups: DEFAULT_MANAGED_GROUPS.iter().map(|g| g.to_string()).collect(),
        }
    }
}

impl TeardownOptions {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Enable dry-run mode
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    fn is_managed_group(&self, group: &str) -> bool {
        self.managed_groups
            .iter()
            .any(|suffix| group == suffix || group.ends_with(&format!(".{}", suffix)))
    }
}

/// Outcome of one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub phase: Phase,
    pub label: String,
    pub found: usize,
    pub deleted: usize,
    /// Objects whose removal failed in a quiet step
    pub failed: usize,
}

impl StepReport {
    fn new(step: &TeardownStep) -> Self {
        Self {
            phase: step.phase,
            label: step.label(),
            found: 0,
            deleted: 0,
            failed: 0,
        }
    }
}

/// Outcome of a teardown run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub steps: Vec<StepReport>,
    /// Version of the framework that was found
    pub framework_version: Option<String>,
    pub dry_run: bool,
}

impl TeardownReport {
    /// Report of the first step with `label` in `phase`
    pub fn step(&self, phase: Phase, label: &str) -> Option<&StepReport> {
        self.steps
            .iter()
            .find(|s| s.phase == phase && s.label == label)
    }

    pub fn total_deleted(&self) -> usize {
        self.steps.iter().map(|s| s.deleted).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.steps.iter().map(|s| s.failed).sum()
    }
}

/// Runs the teardown plan against a cluster
pub struct Teardown {
    client: Arc<dyn ResourceClient>,
    charts: Arc<dyn ChartManager>,
    bus: EventBus,
    options: TeardownOptions,
    steps: Vec<TeardownStep>,
}

impl Teardown {
    pub fn new(
        client: Arc<dyn ResourceClient>,
        charts: Arc<dyn ChartManager>,
        bus: EventBus,
        options: TeardownOptions,
    ) -> Self {
        Self {
            client,
            charts,
            bus,
            options,
            steps: plan(),
        }
    }

    /// Steps this teardown will run
    pub fn steps(&self) -> &[TeardownStep] {
        &self.steps
    }

    /// Run every step in order
    pub async fn run(&self) -> Result<TeardownReport> {
        let mut report = TeardownReport {
            dry_run: self.options.dry_run,
            ..Default::default()
        };
        let mut cleanup_announced = false;

        for step in &self.steps {
            if step.phase == Phase::Cleanup && !cleanup_announced {
                self.bus.start_wait("Finishing cleaning...");
                cleanup_announced = true;
            }

            let mut step_report = StepReport::new(step);
            match &step.action {
                StepAction::Delete(spec) => self.delete_step(step, spec, &mut step_report).await?,
                StepAction::RemoveFramework => {
                    report.framework_version = self.framework_step(step, &mut step_report).await?;
                }
                StepAction::RemoveLingeringCustomResources => {
                    self.custom_resources_step(&mut step_report).await
                }
                StepAction::RemoveNamespace => self.namespace_step(step, &mut step_report).await?,
            }

            info!(
                step = %step.phase,
                label = %step_report.label,
                found = step_report.found,
                deleted = step_report.deleted,
                failed = step_report.failed,
                "teardown step finished"
            );
            report.steps.push(step_report);
        }

        self.bus.done("Cleaning done");
        Ok(report)
    }

    fn debug(&self, message: impl Into<String>) {
        if self.options.verbose || self.options.dry_run {
            self.bus.debug(message);
        }
    }

    fn fatal(step: &TeardownStep, err: KubeError) -> KubeError {
        err.in_step(format!("{}: {}", step.phase, step.label()))
    }

    async fn delete_step(
        &self,
        step: &TeardownStep,
        spec: &DeleteSpec,
        report: &mut StepReport,
    ) -> Result<()> {
        let listed = match self.client.list_or_empty(&spec.kind, None, None).await {
            Ok(listed) => listed,
            Err(e) if step.quiet => {
                debug!(kind = %spec.kind, error = %e, "listing failed, skipping quiet step");
                return Ok(());
            }
            Err(e) => return Err(Self::fatal(step, e)),
        };

        let objects: Vec<DynamicObject> = listed
            .into_iter()
            .filter(|o| spec.selection.accepts(o))
            .collect();
        report.found = objects.len();
        if objects.is_empty() {
            return Ok(());
        }

        if self.options.dry_run {
            self.debug(format!("found [{}] {}", objects.len(), spec.plural));
            for object in &objects {
                self.debug(format!(" > {}", object.name()));
            }
            return Ok(());
        }

        for object in &objects {
            if step.quiet {
                self.debug(format!(" > {}", object.name()));
                match self.remove(&spec.kind, object, spec.strip_finalizers).await {
                    Ok(()) => report.deleted += 1,
                    Err(e) => self.swallow(spec.noun, object, e, report),
                }
            } else {
                self.bus
                    .start_wait(format!("removing {} {}...", spec.noun, object.name()));
                self.remove(&spec.kind, object, spec.strip_finalizers)
                    .await
                    .map_err(|e| Self::fatal(step, e))?;
                report.deleted += 1;
                self.bus
                    .done(format!("{} {} uninstalled", spec.noun, object.name()));
            }
        }

        Ok(())
    }

    /// Strip finalizers when asked, then delete
    async fn remove(&self, kind: &KindRef, object: &DynamicObject, strip: bool) -> Result<()> {
        if strip {
            self.client
                .strip_finalizers(kind, object.name(), object.namespace())
                .await?;
        }
        self.client.delete(kind, object).await?;
        debug!(kind = %kind, name = %object.name(), namespace = ?object.namespace(), "deleted");
        Ok(())
    }

    fn swallow(&self, noun: &str, object: &DynamicObject, err: KubeError, report: &mut StepReport) {
        report.failed += 1;
        debug!(noun, name = %object.name(), error = %err, "ignoring failure in quiet step");
        self.debug(format!("could not remove {} {}: {}", noun, object.name(), err));
    }

    async fn framework_step(
        &self,
        step: &TeardownStep,
        report: &mut StepReport,
    ) -> Result<Option<String>> {
        let namespace = &self.options.namespace;
        let Some(instance) = framework::detect(self.client.as_ref(), namespace)
            .await
            .map_err(|e| Self::fatal(step, e))?
        else {
            self.debug("crossplane not found");
            return Ok(None);
        };

        report.found = 1;
        let version = instance.display_version().to_string();

        if self.options.dry_run {
            self.debug(format!(
                "found crossplane ({}) pod: {} in namespace: {}",
                version, instance.pod, namespace
            ));
            return Ok(Some(version));
        }

        self.bus
            .start_wait(format!("uninstalling crossplane {}...", version));
        self.charts
            .uninstall(RELEASE_NAME, namespace)
            .await
            .map_err(|e| Self::fatal(step, e))?;
        report.deleted = 1;
        self.bus.done(format!("crossplane {} uninstalled", version));

        Ok(Some(version))
    }

    async fn custom_resources_step(&self, report: &mut StepReport) {
        let crd_kind = CUSTOM_RESOURCE_DEFINITION.kind_ref();
        let definitions: Vec<(DynamicObject, KindRef)> =
            match self.client.list_or_empty(&crd_kind, None, None).await {
                Ok(crds) => crds
                    .into_iter()
                    .filter_map(|crd| {
                        let kind = crd_kind_ref(&crd)?;
                        self.options
                            .is_managed_group(&kind.group)
                            .then_some((crd, kind))
                    })
                    .collect(),
                Err(e) => {
                    debug!(error = %e, "listing custom resource definitions failed");
                    return;
                }
            };
        if definitions.is_empty() {
            return;
        }

        let mut instances = Vec::new();
        for (_, kind) in &definitions {
            match self.client.list_or_empty(kind, None, None).await {
                Ok(found) => instances.extend(found.into_iter().map(|o| (kind.clone(), o))),
                Err(e) => debug!(kind = %kind, error = %e, "listing custom resources failed"),
            }
        }
        report.found = instances.len() + definitions.len();

        if self.options.dry_run {
            self.debug(format!("found [{}] custom resources", instances.len()));
            for (kind, object) in &instances {
                self.debug(format!(" > {} ({})", object.name(), kind.api_version()));
            }
            self.debug(format!(
                "found [{}] custom resource definitions",
                definitions.len()
            ));
            for (crd, _) in &definitions {
                self.debug(format!(" > {} ({})", crd.name(), crd_kind.api_version()));
            }
            return;
        }

        for (kind, object) in &instances {
            self.debug(format!(" > {}", object.name()));
            match self.remove(kind, object, true).await {
                Ok(()) => report.deleted += 1,
                Err(e) => self.swallow("custom resource", object, e, report),
            }
        }

        for (crd, _) in &definitions {
            match self.remove(&crd_kind, crd, true).await {
                Ok(()) => report.deleted += 1,
                Err(e) => self.swallow("custom resource definition", crd, e, report),
            }
        }
    }

    async fn namespace_step(&self, step: &TeardownStep, report: &mut StepReport) -> Result<()> {
        let kind = NAMESPACE.kind_ref();
        let namespace = &self.options.namespace;

        let Some(object) = self
            .client
            .get(&kind, namespace, None)
            .await
            .map_err(|e| Self::fatal(step, e))?
        else {
            return Ok(());
        };
        report.found = 1;

        if self.options.dry_run {
            self.debug(format!("found namespace {}", namespace));
            return Ok(());
        }

        self.remove(&kind, &object, object.has_finalizers())
            .await
            .map_err(|e| Self::fatal(step, e))?;
        report.deleted = 1;
        Ok(())
    }
}

/// Kind served by a CustomResourceDefinition, using its storage version
pub fn crd_kind_ref(crd: &DynamicObject) -> Option<KindRef> {
    let group = crd.field(&["spec", "group"])?.as_str()?;
    let kind = crd.field(&["spec", "names", "kind"])?.as_str()?;
    let plural = crd.field(&["spec", "names", "plural"])?.as_str()?;
    let versions = crd.field(&["spec", "versions"])?.as_array()?;
    let version = versions
        .iter()
        .find(|v| v.get("storage").and_then(JsonValue::as_bool) == Some(true))
        .or_else(|| versions.first())?
        .get("name")?
        .as_str()?;
    let scope = match crd.field(&["spec", "scope"]).and_then(JsonValue::as_str) {
        Some("Namespaced") => Scope::Namespaced,
        _ => Scope::Cluster,
    };

    Some(KindRef::new(group, version, kind).with_resource(plural, scope))
}
