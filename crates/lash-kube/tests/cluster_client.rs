//! Cluster-backed client against a local mock API server
//!
//! Checks how HTTP status codes from the API server map onto the error
//! kinds the teardown and install flows branch on.

use std::time::Duration;

use futures::StreamExt;
use kube::{Client, Config};
use serde_json::{Value as JsonValue, json};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lash_kube::kinds::{POD, PROVIDER};
use lash_kube::object::new_object;
use lash_kube::watch::conditions;
use lash_kube::{
    ClusterClient, KindRef, KubeError, ObjectExt, ResourceClient, WatchEventType, WatchTarget,
    watch_until,
};

const NAMESPACE_NAME: &str = "landscape-system";

async fn cluster(server: &MockServer) -> ClusterClient {
    let config = Config::new(server.uri().parse().unwrap());
    ClusterClient::new(Client::try_from(config).unwrap())
}

/// `Status` body the API server sends with a failed request
fn status(code: u16, reason: &str, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(code).set_body_json(json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code
    }))
}

fn not_found() -> ResponseTemplate {
    status(404, "NotFound", "the server could not find the requested resource")
}

fn widget_kind() -> KindRef {
    KindRef::new("pkg.example.io", "v1", "Widget")
}

fn widget_resources() -> JsonValue {
    json!({
        "kind": "APIResourceList",
        "apiVersion": "v1",
        "groupVersion": "pkg.example.io/v1",
        "resources": [
            {
                "name": "widgets",
                "singularName": "widget",
                "namespaced": true,
                "kind": "Widget",
                "verbs": ["get", "list", "watch", "delete", "patch"]
            },
            {
                "name": "widgets/status",
                "singularName": "",
                "namespaced": true,
                "kind": "Widget",
                "verbs": ["get", "patch"]
            }
        ]
    })
}

#[tokio::test]
async fn test_list_of_unserved_kind_is_kind_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/apis/pkg.crossplane.io/v1/providers"))
        .respond_with(not_found())
        .mount(&server)
        .await;
    let client = cluster(&server).await;

    let err = client.list(&PROVIDER.kind_ref(), None, None).await.unwrap_err();
    assert!(matches!(err, KubeError::KindNotFound { .. }), "got {:?}", err);

    let listed = client.list_or_empty(&PROVIDER.kind_ref(), None, None).await.unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn test_list_fills_missing_item_types() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/apis/pkg.crossplane.io/v1/providers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "apiVersion": "pkg.crossplane.io/v1",
            "kind": "ProviderList",
            "metadata": {"resourceVersion": "41"},
            "items": [{"metadata": {"name": "provider-helm"}, "spec": {}}]
        })))
        .mount(&server)
        .await;
    let client = cluster(&server).await;

    let items = client.list(&PROVIDER.kind_ref(), None, None).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].name(), "provider-helm");
    assert_eq!(items[0].types, Some(PROVIDER.kind_ref().type_meta()));
}

#[tokio::test]
async fn test_get_of_missing_object_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/namespaces/landscape-system/pods/provider-helm-5c8b"))
        .respond_with(status(404, "NotFound", "pods \"provider-helm-5c8b\" not found"))
        .mount(&server)
        .await;
    let client = cluster(&server).await;

    let found = client
        .get(&POD.kind_ref(), "provider-helm-5c8b", Some(NAMESPACE_NAME))
        .await
        .unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn test_delete_of_missing_object_is_ok() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/apis/pkg.crossplane.io/v1/providers/provider-helm"))
        .respond_with(status(404, "NotFound", "providers \"provider-helm\" not found"))
        .expect(1)
        .mount(&server)
        .await;
    let client = cluster(&server).await;

    client
        .delete(&PROVIDER.kind_ref(), &new_object("provider-helm", None))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delete_failure_is_returned() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/apis/pkg.crossplane.io/v1/providers/provider-helm"))
        .respond_with(status(403, "Forbidden", "providers is forbidden"))
        .mount(&server)
        .await;
    let client = cluster(&server).await;

    let err = client
        .delete(&PROVIDER.kind_ref(), &new_object("provider-helm", None))
        .await
        .unwrap_err();
    assert!(matches!(err, KubeError::Api(kube::Error::Api(ref resp)) if resp.code == 403));
}

#[tokio::test]
async fn test_strip_finalizers_of_missing_object_is_ok() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/apis/pkg.crossplane.io/v1/providers/provider-helm"))
        .respond_with(status(404, "NotFound", "providers \"provider-helm\" not found"))
        .expect(1)
        .mount(&server)
        .await;
    let client = cluster(&server).await;

    client
        .strip_finalizers(&PROVIDER.kind_ref(), "provider-helm", None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_apply_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/apis/pkg.crossplane.io/v1/providers/provider-helm"))
        .and(query_param("fieldManager", "lash"))
        .respond_with(status(
            409,
            "Conflict",
            "Apply failed with 1 conflict: conflict with \"kubectl\": .spec.package",
        ))
        .mount(&server)
        .await;
    let client = cluster(&server).await;

    let err = client
        .apply(&new_object("provider-helm", None), &PROVIDER.kind_ref())
        .await
        .unwrap_err();
    match err {
        KubeError::ApplyConflict {
            kind,
            name,
            message,
        } => {
            assert_eq!(kind, "Provider");
            assert_eq!(name, "provider-helm");
            assert!(message.contains(".spec.package"));
        }
        other => panic!("expected ApplyConflict, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unlisted_kind_is_resolved_through_discovery_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/apis/pkg.example.io/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(widget_resources()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/apis/pkg.example.io/v1/namespaces/team-a/widgets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "apiVersion": "pkg.example.io/v1",
            "kind": "WidgetList",
            "metadata": {"resourceVersion": "7"},
            "items": [{"metadata": {"name": "w1", "namespace": "team-a"}, "spec": {"size": 3}}]
        })))
        .expect(2)
        .mount(&server)
        .await;
    let client = cluster(&server).await;

    for _ in 0..2 {
        let items = client.list(&widget_kind(), Some("team-a"), None).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].field(&["spec", "size"]), Some(&json!(3)));
    }
}

#[tokio::test]
async fn test_kind_missing_from_discovery() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/apis/pkg.example.io/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "APIResourceList",
            "apiVersion": "v1",
            "groupVersion": "pkg.example.io/v1",
            "resources": []
        })))
        .mount(&server)
        .await;
    let client = cluster(&server).await;

    let err = client.list(&widget_kind(), None, None).await.unwrap_err();
    assert!(matches!(err, KubeError::KindNotFound { .. }), "got {:?}", err);
    assert!(client.get(&widget_kind(), "w1", None).await.unwrap().is_none());
    client
        .delete(&widget_kind(), &new_object("w1", None))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_group_unknown_to_discovery() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/apis/pkg.example.io/v1"))
        .respond_with(not_found())
        .mount(&server)
        .await;
    let client = cluster(&server).await;

    let err = client.list(&widget_kind(), None, None).await.unwrap_err();
    assert!(matches!(err, KubeError::KindNotFound { .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_watch_of_unserved_kind_is_kind_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/apis/pkg.crossplane.io/v1/providers"))
        .and(query_param("watch", "true"))
        .respond_with(not_found())
        .mount(&server)
        .await;
    let client = cluster(&server).await;

    let err = watch_until(
        &client,
        &WatchTarget::new(PROVIDER.kind_ref()),
        |_, _| Ok(true),
        &CancellationToken::new(),
        Duration::from_secs(5),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, KubeError::KindNotFound { .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_watch_maps_events_and_skips_bookmarks() {
    let events = [
        json!({"type": "BOOKMARK", "object": {
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"resourceVersion": "12"}
        }}),
        json!({"type": "ADDED", "object": {
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "provider-helm-5c8b", "namespace": NAMESPACE_NAME},
            "status": {"conditions": [{"type": "Ready", "status": "False"}]}
        }}),
        json!({"type": "MODIFIED", "object": {
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "provider-helm-5c8b", "namespace": NAMESPACE_NAME},
            "status": {"conditions": [{"type": "Ready", "status": "True"}]}
        }}),
    ];
    let body: String = events.iter().map(|e| format!("{}\n", e)).collect();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/namespaces/landscape-system/pods"))
        .and(query_param("watch", "true"))
        .and(query_param("labelSelector", "pkg.crossplane.io/package=provider-helm"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;
    let client = cluster(&server).await;

    let stream = client
        .watch(
            &POD.kind_ref(),
            Some(NAMESPACE_NAME),
            Some("pkg.crossplane.io/package=provider-helm"),
        )
        .await
        .unwrap();
    let received: Vec<_> = stream.map(|event| event.unwrap()).collect().await;

    let types: Vec<WatchEventType> = received.iter().map(|e| e.event_type).collect();
    assert_eq!(types, vec![WatchEventType::Added, WatchEventType::Modified]);
    assert!(conditions::pod_ready(received[1].event_type, &received[1].object).unwrap());
}
