//! Install flow against the in-memory client and fake collaborators

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use lash_kube::claims::CORE_XRD_NAME;
use lash_kube::client::Operation;
use lash_kube::client::mock::new_object;
use lash_kube::kinds::{
    CLUSTER_ROLE_BINDING, COMPOSITE_RESOURCE_DEFINITION, CONFIGURATION, CONTROLLER_CONFIG,
    CORE_CLAIM, POD, PROVIDER, SERVICE_ACCOUNT,
};
use lash_kube::object::{INSTALLED_BY_LABEL, INSTALLED_BY_VALUE, PACKAGE_NAME_LABEL};
use lash_kube::{
    CatalogSource, ChartIndex, ChartInstall, ChartManager, ChartVersion, Collaborators, EventBus,
    EventKind, EventRecorder, InstallOptions, Installer, KubeError, ManifestFetcher,
    MockResourceClient, ObjectExt, PackageInfo, PackageRole, Prompter, ProxySettings, Result,
    WatchEventType, claims::Field,
};

const NAMESPACE_NAME: &str = "landscape-system";
const CATALOG: &str = "https://catalog.test";

struct StaticCatalog {
    entries: Vec<PackageInfo>,
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn packages(&self, role: PackageRole) -> Result<Vec<PackageInfo>> {
        Ok(self
            .entries
            .iter()
            .filter(|p| p.role == role)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct MapFetcher {
    documents: HashMap<String, String>,
}

#[async_trait]
impl ManifestFetcher for MapFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.documents
            .get(url)
            .map(|doc| doc.as_bytes().to_vec())
            .ok_or_else(|| KubeError::Collaborator(format!("404 for {}", url)))
    }
}

struct FixedChart;

#[async_trait]
impl ChartIndex for FixedChart {
    async fn latest(&self) -> Result<ChartVersion> {
        Ok(ChartVersion {
            version: "1.18.0".to_string(),
            url: "https://charts.crossplane.io/stable/crossplane-1.18.0.tgz".to_string(),
        })
    }
}

#[derive(Default)]
struct RecordingCharts {
    installs: Mutex<Vec<ChartInstall>>,
}

#[async_trait]
impl ChartManager for RecordingCharts {
    async fn install(&self, request: &ChartInstall) -> Result<()> {
        self.installs.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn uninstall(&self, _release: &str, _namespace: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedPrompter {
    answers: HashMap<String, String>,
    asked: Mutex<Vec<String>>,
}

impl Prompter for ScriptedPrompter {
    fn ask(&self, field: &Field) -> Result<String> {
        self.asked.lock().unwrap().push(field.name.clone());
        self.answers
            .get(&field.name)
            .cloned()
            .ok_or_else(|| KubeError::Collaborator(format!("no answer for {}", field.name)))
    }
}

fn provider_documents() -> HashMap<String, String> {
    let base = format!("{}/providers/helm", CATALOG);
    HashMap::from([
        (
            format!("{}/provider.yaml", base),
            "apiVersion: pkg.crossplane.io/v1\n\
             kind: Provider\n\
             metadata:\n  name: provider-helm\n\
             spec:\n  package: xpkg.upbound.io/crossplane-contrib/provider-helm:v0.19.0\n"
                .to_string(),
        ),
        (
            format!("{}/controller-config.yaml", base),
            "apiVersion: pkg.crossplane.io/v1alpha1\n\
             kind: ControllerConfig\n\
             metadata:\n  name: provider-helm\n\
             spec:\n  serviceAccountName: provider-helm\n"
                .to_string(),
        ),
        (
            format!("{}/service-account.yaml", base),
            "apiVersion: v1\n\
             kind: ServiceAccount\n\
             metadata:\n  name: provider-helm\n  namespace: landscape-system\n"
                .to_string(),
        ),
        (
            format!("{}/cluster-role-binding.yaml", base),
            "apiVersion: rbac.authorization.k8s.io/v1\n\
             kind: ClusterRoleBinding\n\
             metadata:\n  name: provider-helm-admin-binding\n\
             roleRef:\n  apiGroup: rbac.authorization.k8s.io\n  kind: ClusterRole\n  name: cluster-admin\n"
                .to_string(),
        ),
        (
            format!("{}/packages/core/configuration.yaml", CATALOG),
            "apiVersion: pkg.crossplane.io/v1\n\
             kind: Configuration\n\
             metadata:\n  name: landscape-core\n\
             spec:\n  package: ghcr.io/platformnow/core:v5.22.1\n"
                .to_string(),
        ),
    ])
}

fn catalog_entries() -> Vec<PackageInfo> {
    vec![
        PackageInfo {
            name: "provider-helm".to_string(),
            version: "v0.19.0".to_string(),
            manifest: format!("{}/providers/helm/provider.yaml", CATALOG),
            image: "xpkg.upbound.io/crossplane-contrib/provider-helm:v0.19.0".to_string(),
            role: PackageRole::Provider,
        },
        PackageInfo {
            name: "landscape-core".to_string(),
            version: "v5.22.1".to_string(),
            manifest: format!("{}/packages/core/configuration.yaml", CATALOG),
            image: "ghcr.io/platformnow/core:v5.22.1".to_string(),
            role: PackageRole::Package,
        },
    ]
}

fn core_xrd() -> kube::api::DynamicObject {
    let mut xrd = new_object(CORE_XRD_NAME, None);
    xrd.data = json!({"spec": {
        "group": "pkg.platformnow.io",
        "versions": [{
            "name": "v1",
            "schema": {"openAPIV3Schema": {"properties": {"spec": {
                "required": ["repoURL", "domain"],
                "properties": {
                    "namespace": {"type": "string"},
                    "version": {"type": "string"},
                    "repoURL": {"type": "string"},
                    "domain": {"type": "string"},
                    "replicas": {"type": "integer", "default": 2},
                    "tls": {"type": "boolean"}
                }
            }}}}
        }]
    }});
    xrd
}

/// Marks packages healthy and the Core claim ready once they are applied
fn spawn_controller(client: MockResourceClient) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            for (kind, conditions) in [
                (CONFIGURATION.kind_ref(), &["Installed", "Healthy"][..]),
                (CORE_CLAIM.kind_ref(), &["Ready"][..]),
            ] {
                for mut object in client.objects(&kind) {
                    if object.field(&["status"]).is_some() {
                        continue;
                    }
                    let conditions: Vec<JsonValue> = conditions
                        .iter()
                        .map(|t| json!({"type": t, "status": "True"}))
                        .collect();
                    object.data["status"] = json!({ "conditions": conditions });
                    client.emit(&kind, WatchEventType::Modified, object);
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
}

struct Fixture {
    client: MockResourceClient,
    charts: Arc<RecordingCharts>,
    prompter: Arc<ScriptedPrompter>,
    documents: HashMap<String, String>,
    bus: EventBus,
    recorder: EventRecorder,
}

impl Fixture {
    fn new() -> Self {
        let client = MockResourceClient::new();

        let mut pod = new_object("provider-helm-5c8b", Some(NAMESPACE_NAME));
        pod.set_label(PACKAGE_NAME_LABEL, "provider-helm");
        pod.data = json!({"status": {"conditions": [{"type": "Ready", "status": "True"}]}});
        client.insert(&POD.kind_ref(), pod);
        client.insert(&COMPOSITE_RESOURCE_DEFINITION.kind_ref(), core_xrd());

        Self {
            client,
            charts: Arc::new(RecordingCharts::default()),
            prompter: Arc::new(ScriptedPrompter {
                answers: HashMap::from([("domain".to_string(), "idp.example.org".to_string())]),
                ..Default::default()
            }),
            documents: provider_documents(),
            bus: EventBus::new(),
            recorder: EventRecorder::new(),
        }
    }

    fn installer(&self, options: InstallOptions) -> Installer {
        let collaborators = Collaborators {
            catalog: Arc::new(StaticCatalog {
                entries: catalog_entries(),
            }),
            fetcher: Arc::new(MapFetcher {
                documents: self.documents.clone(),
            }),
            chart_index: Arc::new(FixedChart),
            charts: self.charts.clone(),
            prompter: self.prompter.clone(),
        };
        Installer::new(
            Arc::new(self.client.clone()),
            collaborators,
            self.bus.clone(),
            options,
        )
    }
}

fn options() -> InstallOptions {
    InstallOptions {
        catalog_url: "https://github.com/platformnow/catalog.git".to_string(),
        timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_full_install() {
    let fixture = Fixture::new();
    let _subscriptions = fixture.recorder.attach(&fixture.bus);
    let controller = spawn_controller(fixture.client.clone());

    let mut options = options();
    options.management_cluster = true;
    options.set_values = vec!["replicas=3".to_string()];
    options.proxy = ProxySettings {
        http_proxy: Some("http://proxy.internal:3128".to_string()),
        ..Default::default()
    };

    let summary = fixture.installer(options).run().await.unwrap();
    controller.abort();

    assert_eq!(summary.framework_installed.as_deref(), Some("1.18.0"));
    assert_eq!(summary.providers, vec!["provider-helm".to_string()]);
    assert_eq!(summary.packages, vec!["landscape-core".to_string()]);

    let installs = fixture.charts.installs.lock().unwrap().clone();
    assert_eq!(installs.len(), 1);
    assert_eq!(installs[0].release, "crossplane");
    assert_eq!(installs[0].namespace, NAMESPACE_NAME);
    assert_eq!(
        installs[0].values,
        vec![(
            "extraEnvVarsCrossplane.HTTP_PROXY".to_string(),
            "http://proxy.internal:3128".to_string()
        )]
    );

    let expected = json!({
        "namespace": NAMESPACE_NAME,
        "version": "5.22.1",
        "repoURL": "https://github.com/platformnow/catalog.git",
        "domain": "idp.example.org",
        "replicas": 3,
        "managementCluster": true
    });
    assert_eq!(summary.claim_values, Some(expected.clone()));

    let claim = fixture
        .client
        .object(&CORE_CLAIM.kind_ref(), "core", None)
        .unwrap();
    assert_eq!(claim.field(&["spec"]), Some(&expected));
    assert_eq!(*fixture.prompter.asked.lock().unwrap(), vec!["domain".to_string()]);

    let done = fixture.recorder.messages(EventKind::Done);
    assert_eq!(done.first().map(String::as_str), Some("crossplane 1.18.0 installed"));
    assert!(done.contains(&"Installed provider-helm controller-config".to_string()));
    assert!(done.contains(&"Provider provider-helm (v0.19.0) installed".to_string()));
    assert!(done.contains(&"Package landscape-core (v5.22.1) installed".to_string()));
    assert!(done.contains(&"Setting catalogUrl to https://github.com/platformnow/catalog.git".to_string()));
    assert_eq!(done.last().map(String::as_str), Some("Landscape IDP is ready"));
}

fn provider_pod(ready: bool) -> kube::api::DynamicObject {
    let status = if ready { "True" } else { "False" };
    let mut pod = new_object("provider-helm-5c8b", Some(NAMESPACE_NAME));
    pod.set_label(PACKAGE_NAME_LABEL, "provider-helm");
    pod.data = json!({"status": {"conditions": [{"type": "Ready", "status": status}]}});
    pod
}

#[tokio::test]
async fn test_install_survives_server_closing_the_watch() {
    let fixture = Fixture::new();
    fixture.client.insert(&POD.kind_ref(), provider_pod(false));
    let controller = spawn_controller(fixture.client.clone());

    // once the provider wait is watching pods, end its stream like an API
    // server timeout would, then mark the pod ready
    let apiserver = fixture.client.clone();
    let restarts = tokio::spawn(async move {
        loop {
            let watching_pods = apiserver
                .calls()
                .iter()
                .any(|c| c.operation == Operation::Watch && c.kind == POD.kind_ref());
            if watching_pods && apiserver.open_watches() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        apiserver.close_watches();
        tokio::time::sleep(Duration::from_millis(20)).await;
        apiserver.emit(&POD.kind_ref(), WatchEventType::Modified, provider_pod(true));
    });

    let mut options = options();
    options.no_framework = true;
    let summary = fixture.installer(options).run().await.unwrap();
    restarts.await.unwrap();
    controller.abort();

    assert_eq!(summary.providers, vec!["provider-helm".to_string()]);
    let pod_watches = fixture
        .client
        .calls()
        .iter()
        .filter(|c| c.operation == Operation::Watch && c.kind == POD.kind_ref())
        .count();
    assert!(pod_watches >= 2, "pod watch was not reopened");
}

#[tokio::test]
async fn test_provider_documents_are_applied_and_labeled() {
    let fixture = Fixture::new();
    let controller = spawn_controller(fixture.client.clone());

    fixture.installer(options()).run().await.unwrap();
    controller.abort();

    let provider = fixture
        .client
        .object(&PROVIDER.kind_ref(), "provider-helm", None)
        .unwrap();
    assert_eq!(provider.label(INSTALLED_BY_LABEL), Some(INSTALLED_BY_VALUE));

    let config = fixture
        .client
        .object(&CONTROLLER_CONFIG.kind_ref(), "provider-helm", None)
        .unwrap();
    assert_eq!(
        config.field(&["spec", "metadata", "labels", PACKAGE_NAME_LABEL]),
        Some(&json!("provider-helm"))
    );
    assert_eq!(
        config.field(&["spec", "serviceAccountName"]),
        Some(&json!("provider-helm"))
    );

    assert!(
        fixture
            .client
            .object(&SERVICE_ACCOUNT.kind_ref(), "provider-helm", Some(NAMESPACE_NAME))
            .is_some()
    );
    assert!(
        fixture
            .client
            .object(&CLUSTER_ROLE_BINDING.kind_ref(), "provider-helm-admin-binding", None)
            .is_some()
    );
}

#[tokio::test]
async fn test_existing_framework_is_kept() {
    let fixture = Fixture::new();
    let mut pod = new_object("crossplane-7d9f", Some(NAMESPACE_NAME));
    pod.set_label("app", "crossplane");
    pod.data = json!({"spec": {"containers": [{"image": "crossplane/crossplane:v1.17.1"}]}});
    fixture.client.insert(&POD.kind_ref(), pod);
    let controller = spawn_controller(fixture.client.clone());

    let summary = fixture.installer(options()).run().await.unwrap();
    controller.abort();

    assert_eq!(summary.framework_installed, None);
    assert!(fixture.charts.installs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_no_framework_skips_chart() {
    let fixture = Fixture::new();
    let controller = spawn_controller(fixture.client.clone());

    let mut options = options();
    options.no_framework = true;
    let summary = fixture.installer(options).run().await.unwrap();
    controller.abort();

    assert_eq!(summary.framework_installed, None);
    assert!(fixture.charts.installs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_claims_skipped_without_xrd() {
    let fixture = Fixture::new();
    fixture.client.emit(
        &COMPOSITE_RESOURCE_DEFINITION.kind_ref(),
        WatchEventType::Deleted,
        core_xrd(),
    );
    let controller = spawn_controller(fixture.client.clone());

    let summary = fixture.installer(options()).run().await.unwrap();
    controller.abort();

    assert_eq!(summary.claim_values, None);
    assert!(fixture.client.objects(&CORE_CLAIM.kind_ref()).is_empty());
    assert!(fixture.prompter.asked.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_provider_from_wrong_group_is_rejected() {
    let mut fixture = Fixture::new();
    fixture.documents.insert(
        format!("{}/providers/helm/provider.yaml", CATALOG),
        "apiVersion: helm.crossplane.io/v1beta1\nkind: Release\nmetadata:\n  name: provider-helm\n"
            .to_string(),
    );

    let err = fixture.installer(options()).run().await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("installing package 'provider-helm'"), "{}", message);
    assert!(message.contains("provider-helm is not a provider"), "{}", message);
    assert!(fixture.client.objects(&PROVIDER.kind_ref()).is_empty());
}

#[tokio::test]
async fn test_unhealthy_package_times_out() {
    let fixture = Fixture::new();

    let mut options = options();
    options.no_framework = true;
    options.timeout = Duration::from_millis(50);
    let err = fixture.installer(options).run().await.unwrap_err();

    match err {
        KubeError::Step { step, source } => {
            assert_eq!(step, "installing package 'landscape-core'");
            assert!(matches!(*source, KubeError::TimedOut { .. }));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_cancelled_install() {
    let fixture = Fixture::new();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let mut options = options();
    options.no_framework = true;
    let err = fixture
        .installer(options)
        .with_cancellation(cancel)
        .run()
        .await
        .unwrap_err();

    match err {
        KubeError::Step { source, .. } => {
            assert!(matches!(*source, KubeError::Cancelled { .. }));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_missing_answer_fails_before_apply() {
    let fixture = Fixture {
        prompter: Arc::new(ScriptedPrompter::default()),
        ..Fixture::new()
    };
    let controller = spawn_controller(fixture.client.clone());

    let mut options = options();
    options.no_framework = true;
    let err = fixture.installer(options).run().await.unwrap_err();
    controller.abort();

    assert!(matches!(err, KubeError::Collaborator(_)));
    assert!(fixture.client.objects(&CORE_CLAIM.kind_ref()).is_empty());
}
