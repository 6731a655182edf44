//! Kind references and the static kind table
//!
//! Every kind the installer touches is listed here with its plural resource
//! name and scope, so GVK and GVR never drift apart. Kinds that only show up
//! in decoded manifests are resolved against cluster discovery instead.

use std::fmt;
use std::hash::{Hash, Hasher};

use kube::core::{GroupVersionKind, TypeMeta};

/// Whether objects of a kind live in a namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Namespaced,
    Cluster,
}

/// Group/version/kind plus the optional plural resource name and scope
///
/// Equality and hashing only consider group, version and kind.
#[derive(Debug, Clone)]
pub struct KindRef {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Plural resource name (the "R" in GVR), when known
    pub plural: Option<String>,
    /// Scope, when known
    pub scope: Option<Scope>,
}

impl KindRef {
    /// Create a reference with no plural or scope information
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
            plural: None,
            scope: None,
        }
    }

    /// Attach plural and scope
    pub fn with_resource(mut self, plural: impl Into<String>, scope: Scope) -> Self {
        self.plural = Some(plural.into());
        self.scope = Some(scope);
        self
    }

    /// Build from an `apiVersion` and `kind`, filling plural and scope from the kind table
    ///
    /// - "apps/v1" -> group="apps", version="v1"
    /// - "v1" -> group="", version="v1" (core API)
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        let (group, version) = match api_version.rsplit_once('/') {
            Some((g, v)) => (g, v),
            None => ("", api_version),
        };

        match lookup(group, version, kind) {
            Some(spec) => spec.kind_ref(),
            None => Self::new(group, version, kind),
        }
    }

    /// Build from an object's type metadata
    pub fn from_type_meta(types: &TypeMeta) -> Self {
        Self::from_api_version(&types.api_version, &types.kind)
    }

    /// The `apiVersion` string for this kind
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Type metadata for objects of this kind
    pub fn type_meta(&self) -> TypeMeta {
        TypeMeta {
            api_version: self.api_version(),
            kind: self.kind.clone(),
        }
    }

    /// kube's GroupVersionKind
    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }
}

impl PartialEq for KindRef {
    fn eq(&self, other: &Self) -> bool {
        self.group == other.group && self.version == other.version && self.kind == other.kind
    }
}

impl Eq for KindRef {}

impl Hash for KindRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.group.hash(state);
        self.version.hash(state);
        self.kind.hash(state);
    }
}

impl fmt::Display for KindRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}.{}", self.kind, self.version)
        } else {
            write!(f, "{}.{}.{}", self.kind, self.version, self.group)
        }
    }
}

/// A compile-time entry of the kind table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindSpec {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
    pub scope: Scope,
}

impl KindSpec {
    const fn cluster(
        group: &'static str,
        version: &'static str,
        kind: &'static str,
        plural: &'static str,
    ) -> Self {
        Self {
            group,
            version,
            kind,
            plural,
            scope: Scope::Cluster,
        }
    }

    const fn namespaced(
        group: &'static str,
        version: &'static str,
        kind: &'static str,
        plural: &'static str,
    ) -> Self {
        Self {
            group,
            version,
            kind,
            plural,
            scope: Scope::Namespaced,
        }
    }

    /// Owned reference with plural and scope filled in
    pub fn kind_ref(&self) -> KindRef {
        KindRef::new(self.group, self.version, self.kind).with_resource(self.plural, self.scope)
    }
}

pub const APPLICATION: KindSpec =
    KindSpec::namespaced("argoproj.io", "v1alpha1", "Application", "applications");
pub const APP_PROJECT: KindSpec =
    KindSpec::namespaced("argoproj.io", "v1alpha1", "AppProject", "appprojects");

pub const PROVIDER: KindSpec = KindSpec::cluster("pkg.crossplane.io", "v1", "Provider", "providers");
pub const CONFIGURATION: KindSpec =
    KindSpec::cluster("pkg.crossplane.io", "v1", "Configuration", "configurations");
pub const PROVIDER_REVISION: KindSpec =
    KindSpec::cluster("pkg.crossplane.io", "v1", "ProviderRevision", "providerrevisions");
pub const CONTROLLER_CONFIG: KindSpec =
    KindSpec::cluster("pkg.crossplane.io", "v1alpha1", "ControllerConfig", "controllerconfigs");
pub const LOCK: KindSpec = KindSpec::cluster("pkg.crossplane.io", "v1beta1", "Lock", "locks");

pub const HELM_RELEASE: KindSpec =
    KindSpec::cluster("helm.crossplane.io", "v1beta1", "Release", "releases");
pub const HELM_PROVIDER_CONFIG: KindSpec =
    KindSpec::cluster("helm.crossplane.io", "v1alpha1", "ProviderConfig", "providerconfigs");
pub const KUBERNETES_PROVIDER_CONFIG: KindSpec = KindSpec::cluster(
    "kubernetes.crossplane.io",
    "v1alpha1",
    "ProviderConfig",
    "providerconfigs",
);
pub const KUBERNETES_OBJECT: KindSpec =
    KindSpec::cluster("kubernetes.crossplane.io", "v1alpha1", "Object", "objects");

pub const COMPOSITE_RESOURCE_DEFINITION: KindSpec = KindSpec::cluster(
    "apiextensions.crossplane.io",
    "v1",
    "CompositeResourceDefinition",
    "compositeresourcedefinitions",
);
pub const COMPOSITION: KindSpec =
    KindSpec::cluster("apiextensions.crossplane.io", "v1", "Composition", "compositions");

pub const CUSTOM_RESOURCE_DEFINITION: KindSpec = KindSpec::cluster(
    "apiextensions.k8s.io",
    "v1",
    "CustomResourceDefinition",
    "customresourcedefinitions",
);
pub const CLUSTER_ROLE: KindSpec =
    KindSpec::cluster("rbac.authorization.k8s.io", "v1", "ClusterRole", "clusterroles");
pub const CLUSTER_ROLE_BINDING: KindSpec = KindSpec::cluster(
    "rbac.authorization.k8s.io",
    "v1",
    "ClusterRoleBinding",
    "clusterrolebindings",
);
pub const NAMESPACE: KindSpec = KindSpec::cluster("", "v1", "Namespace", "namespaces");
pub const POD: KindSpec = KindSpec::namespaced("", "v1", "Pod", "pods");
pub const SERVICE_ACCOUNT: KindSpec =
    KindSpec::namespaced("", "v1", "ServiceAccount", "serviceaccounts");

pub const CORE_CLAIM: KindSpec = KindSpec::cluster("pkg.platformnow.io", "v1", "Core", "cores");
pub const GITOPS_CLAIM: KindSpec = KindSpec::cluster("pkg.platformnow.io", "v1", "Gitops", "gitops");

/// Every kind with a fixed plural and scope
pub const KIND_TABLE: &[KindSpec] = &[
    APPLICATION,
    APP_PROJECT,
    PROVIDER,
    CONFIGURATION,
    PROVIDER_REVISION,
    CONTROLLER_CONFIG,
    LOCK,
    HELM_RELEASE,
    HELM_PROVIDER_CONFIG,
    KUBERNETES_PROVIDER_CONFIG,
    KUBERNETES_OBJECT,
    COMPOSITE_RESOURCE_DEFINITION,
    COMPOSITION,
    CUSTOM_RESOURCE_DEFINITION,
    CLUSTER_ROLE,
    CLUSTER_ROLE_BINDING,
    NAMESPACE,
    POD,
    SERVICE_ACCOUNT,
    CORE_CLAIM,
    GITOPS_CLAIM,
];

/// Find a kind in the table
pub fn lookup(group: &str, version: &str, kind: &str) -> Option<&'static KindSpec> {
    KIND_TABLE
        .iter()
        .find(|spec| spec.group == group && spec.version == version && spec.kind == kind)
}

/// A named object of some kind
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub kind: KindRef,
    pub name: String,
    pub namespace: Option<String>,
}

impl ResourceRef {
    pub fn new(kind: KindRef, name: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace,
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", ns, self.kind.kind, self.name),
            None => write!(f, "{}/{}", self.kind.kind, self.name),
        }
    }
}
