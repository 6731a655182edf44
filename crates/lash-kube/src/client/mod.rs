//! Generic resource client
//!
//! [`ResourceClient`] is CRUD plus watch over any kind, addressed by
//! [`KindRef`] instead of a compiled type. Two implementations exist:
//! - [`ClusterClient`]: talks to a real API server through kube
//! - [`MockResourceClient`]: in-memory, records every call for tests

mod cluster;
pub mod mock;

pub use cluster::ClusterClient;
pub use mock::{Call, MockResourceClient, Operation};

pub use crate::connection::resolve_connection;
pub use crate::object::decode;

use async_trait::async_trait;
use futures::stream::BoxStream;
use kube::api::DynamicObject;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::{KubeError, Result};
use crate::kinds::KindRef;
use crate::object::{INSTALLED_BY_LABEL, INSTALLED_BY_VALUE, ObjectExt};

/// Field manager name for Server-Side Apply
pub const FIELD_MANAGER: &str = "lash";

/// How a patch document is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    /// JSON merge patch: named fields are replaced wholesale
    Merge,
    /// Strategic merge patch: lists and maps merge field by field
    StrategicMerge,
}

/// Type of a watch event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// One change observed on a watch stream
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    pub object: DynamicObject,
}

/// Change stream returned by [`ResourceClient::watch`]
///
/// Ends when the server closes the connection; nothing reconnects.
pub type WatchStream = BoxStream<'static, Result<WatchEvent>>;

/// CRUD and watch over arbitrary kinds
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// List objects of a kind
    ///
    /// `namespace` of `None` lists across all namespaces. Fails with
    /// [`KubeError::KindNotFound`] when the cluster does not serve the kind;
    /// a served kind with no objects yields an empty vector.
    async fn list(
        &self,
        kind: &KindRef,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>>;

    /// Get one object, `None` when it does not exist
    async fn get(
        &self,
        kind: &KindRef,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<DynamicObject>>;

    /// Create or replace an object, tagging it with the installed-by label
    async fn apply(&self, object: &DynamicObject, kind: &KindRef) -> Result<()>;

    /// Apply a partial update
    async fn patch(
        &self,
        kind: &KindRef,
        name: &str,
        namespace: Option<&str>,
        patch: &JsonValue,
        patch_kind: PatchKind,
    ) -> Result<()>;

    /// Delete an object; an object that is already gone counts as deleted
    async fn delete(&self, kind: &KindRef, object: &DynamicObject) -> Result<()>;

    /// Open a change stream for objects of a kind
    async fn watch(
        &self,
        kind: &KindRef,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<WatchStream>;

    /// Like [`list`](Self::list), but an unknown kind yields an empty vector
    async fn list_or_empty(
        &self,
        kind: &KindRef,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        match self.list(kind, namespace, label_selector).await {
            Err(e) if e.is_kind_not_found() => {
                debug!(kind = %kind, "kind not served by cluster, nothing to list");
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Clear `metadata.finalizers` with a merge patch
    ///
    /// An object that no longer exists needs no stripping.
    async fn strip_finalizers(
        &self,
        kind: &KindRef,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<()> {
        let patch = finalizer_patch();
        match self
            .patch(kind, name, namespace, &patch, PatchKind::Merge)
            .await
        {
            Err(e) if e.is_not_found() => {
                debug!(kind = %kind, name, "object gone before finalizers were stripped");
                Ok(())
            }
            other => other,
        }
    }
}

/// Merge patch that empties the finalizer list
pub fn finalizer_patch() -> JsonValue {
    serde_json::json!({ "metadata": { "finalizers": [] } })
}

/// Copy of `object` ready to send: type metadata set and installed-by label added
pub(crate) fn prepare_for_apply(object: &DynamicObject, kind: &KindRef) -> Result<DynamicObject> {
    if object.name().is_empty() {
        return Err(KubeError::InvalidManifest(format!(
            "{} is missing metadata.name",
            kind.kind
        )));
    }

    let mut prepared = object.clone();
    prepared.types = Some(kind.type_meta());
    prepared.set_label(INSTALLED_BY_LABEL, INSTALLED_BY_VALUE);
    // server-side apply rejects these
    prepared.metadata.managed_fields = None;
    prepared.metadata.resource_version = None;
    Ok(prepared)
}

/// Map a failed apply to [`KubeError::ApplyConflict`] where it was a 409
pub(crate) fn apply_error(kind: &KindRef, name: &str, err: kube::Error) -> KubeError {
    match err {
        kube::Error::Api(resp) if resp.code == 409 => KubeError::ApplyConflict {
            kind: kind.kind.clone(),
            name: name.to_string(),
            message: resp.message,
        },
        other => KubeError::Api(other),
    }
}
