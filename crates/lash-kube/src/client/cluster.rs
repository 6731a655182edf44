//! [`ResourceClient`] backed by a live API server

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use kube::{
    Client,
    api::{
        Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PropagationPolicy,
        WatchParams,
    },
    core::WatchEvent as KubeWatchEvent,
    discovery::{self, ApiResource},
};
use serde_json::Value as JsonValue;
use tracing::debug;

use super::{
    FIELD_MANAGER, PatchKind, ResourceClient, WatchEvent, WatchEventType, WatchStream, apply_error,
    prepare_for_apply,
};
use crate::error::{KubeError, Result};
use crate::kinds::{KindRef, Scope};
use crate::object::ObjectExt;

/// Resource client talking to the cluster through kube's dynamic API
pub struct ClusterClient {
    client: Client,
    /// Kinds resolved through discovery, keyed by GVK
    resolved: Mutex<HashMap<KindRef, (ApiResource, Scope)>>,
}

impl ClusterClient {
    /// Create a client from an existing kube client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a kind to its API resource and scope
    ///
    /// Kinds with a known plural skip discovery entirely.
    async fn resolve(&self, kind: &KindRef) -> Result<(ApiResource, Scope)> {
        if let (Some(plural), Some(scope)) = (&kind.plural, kind.scope) {
            return Ok((ApiResource::from_gvk_with_plural(&kind.gvk(), plural), scope));
        }

        if let Some(hit) = self
            .resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
        {
            return Ok(hit);
        }

        let (resource, capabilities) = discovery::pinned_kind(&self.client, &kind.gvk())
            .await
            .map_err(|e| match e {
                kube::Error::Discovery(_) => KubeError::KindNotFound {
                    kind: kind.to_string(),
                },
                kube::Error::Api(resp) if resp.code == 404 => KubeError::KindNotFound {
                    kind: kind.to_string(),
                },
                other => KubeError::Api(other),
            })?;

        let scope = match capabilities.scope {
            discovery::Scope::Namespaced => Scope::Namespaced,
            discovery::Scope::Cluster => Scope::Cluster,
        };

        debug!(kind = %kind, plural = %resource.plural, "resolved kind through discovery");
        self.resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind.clone(), (resource.clone(), scope));

        Ok((resource, scope))
    }

    /// Create an Api handle for a kind, scoped to `namespace` when namespaced
    async fn api(&self, kind: &KindRef, namespace: Option<&str>) -> Result<Api<DynamicObject>> {
        let (resource, scope) = self.resolve(kind).await?;
        Ok(match (scope, namespace) {
            (Scope::Namespaced, Some(ns)) => {
                Api::namespaced_with(self.client.clone(), ns, &resource)
            }
            _ => Api::all_with(self.client.clone(), &resource),
        })
    }
}

#[async_trait]
impl ResourceClient for ClusterClient {
    async fn list(
        &self,
        kind: &KindRef,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let api = self.api(kind, namespace).await?;

        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }

        let list = api.list(&params).await.map_err(|e| not_served(kind, e))?;

        // list items usually come back without apiVersion/kind
        Ok(list
            .items
            .into_iter()
            .map(|mut obj| {
                obj.types.get_or_insert_with(|| kind.type_meta());
                obj
            })
            .collect())
    }

    async fn get(
        &self,
        kind: &KindRef,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<DynamicObject>> {
        let api = match self.api(kind, namespace).await {
            Ok(api) => api,
            Err(e) if e.is_kind_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let found = api.get_opt(name).await.map_err(KubeError::Api)?;
        Ok(found.map(|mut obj| {
            obj.types.get_or_insert_with(|| kind.type_meta());
            obj
        }))
    }

    async fn apply(&self, object: &DynamicObject, kind: &KindRef) -> Result<()> {
        let prepared = prepare_for_apply(object, kind)?;
        let name = prepared.name().to_string();
        let api = self.api(kind, prepared.namespace()).await?;

        // Take ownership of fields
        let params = PatchParams::apply(FIELD_MANAGER).force();

        api.patch(&name, &params, &Patch::Apply(&prepared))
            .await
            .map_err(|e| apply_error(kind, &name, e))?;

        debug!(kind = %kind, name = %name, "applied");
        Ok(())
    }

    async fn patch(
        &self,
        kind: &KindRef,
        name: &str,
        namespace: Option<&str>,
        patch: &JsonValue,
        patch_kind: PatchKind,
    ) -> Result<()> {
        let api = self.api(kind, namespace).await?;
        let params = PatchParams::default();

        let result = match patch_kind {
            PatchKind::Merge => api.patch(name, &params, &Patch::Merge(patch)).await,
            PatchKind::StrategicMerge => api.patch(name, &params, &Patch::Strategic(patch)).await,
        };

        result.map(|_| ()).map_err(KubeError::Api)
    }

    async fn delete(&self, kind: &KindRef, object: &DynamicObject) -> Result<()> {
        let name = object.name();
        let api = match self.api(kind, object.namespace()).await {
            Ok(api) => api,
            Err(e) if e.is_kind_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };

        match api.delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                debug!(kind = %kind, name, "already deleted");
                Ok(())
            }
            Err(e) => Err(KubeError::Api(e)),
        }
    }

    async fn watch(
        &self,
        kind: &KindRef,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<WatchStream> {
        let api = self.api(kind, namespace).await?;

        // the server ends this stream after timeoutSeconds (290 by default)
        let mut params = WatchParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }

        // "0" starts from any cached state, so existing objects arrive as Added
        let events = api
            .watch(&params, "0")
            .await
            .map_err(|e| not_served(kind, e))?;

        // a rejected watch arrives as the first stream item, not as an error above
        let unserved = kind.clone();
        let stream = events
            .map_err(move |e| not_served(&unserved, e))
            .try_filter_map(|event| {
                futures::future::ready(match event {
                    KubeWatchEvent::Added(object) => Ok(Some(WatchEvent {
                        event_type: WatchEventType::Added,
                        object,
                    })),
                    KubeWatchEvent::Modified(object) => Ok(Some(WatchEvent {
                        event_type: WatchEventType::Modified,
                        object,
                    })),
                    KubeWatchEvent::Deleted(object) => Ok(Some(WatchEvent {
                        event_type: WatchEventType::Deleted,
                        object,
                    })),
                    KubeWatchEvent::Bookmark(_) => Ok(None),
                    KubeWatchEvent::Error(resp) => Err(KubeError::Api(kube::Error::Api(resp))),
                })
            });

        Ok(stream.boxed())
    }
}

/// A 404 on a collection means the cluster does not serve the kind
fn not_served(kind: &KindRef, err: kube::Error) -> KubeError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => KubeError::KindNotFound {
            kind: kind.to_string(),
        },
        other => KubeError::Api(other),
    }
}
