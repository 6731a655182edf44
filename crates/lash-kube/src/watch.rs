//! Wait for a condition on watched objects
//!
//! [`watch_until`] opens one change stream and feeds every event to a stop
//! predicate until it reports success. Stream closure, cancellation and the
//! deadline end the wait with distinct errors; retrying is up to the caller.

use std::fmt;
use std::time::Duration;

use futures::StreamExt;
use kube::api::DynamicObject;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::{ResourceClient, WatchEventType};
use crate::error::{KubeError, Result};
use crate::kinds::KindRef;

/// What to watch
#[derive(Debug, Clone)]
pub struct WatchTarget {
    pub kind: KindRef,
    pub namespace: Option<String>,
    pub label_selector: Option<String>,
}

impl WatchTarget {
    /// Watch every object of a kind, cluster-wide
    pub fn new(kind: KindRef) -> Self {
        Self {
            kind,
            namespace: None,
            label_selector: None,
        }
    }

    /// Restrict to a namespace
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Restrict to objects matching a label selector
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }
}

impl fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.plural.as_deref().unwrap_or(&self.kind.kind))?;
        if let Some(ns) = &self.namespace {
            write!(f, " in {}", ns)?;
        }
        if let Some(selector) = &self.label_selector {
            write!(f, " ({})", selector)?;
        }
        Ok(())
    }
}

/// Block until `predicate` first returns `Ok(true)` for an event on `target`
///
/// The predicate sees every event with the object's state at that moment; an
/// error from it ends the wait and is returned unchanged. Returns
/// [`KubeError::StreamClosed`] if the server ends the stream first,
/// [`KubeError::Cancelled`] once `cancel` fires and
/// [`KubeError::TimedOut`] after `timeout`. Cancellation wins over a
/// simultaneously available event.
pub async fn watch_until<C, F>(
    client: &C,
    target: &WatchTarget,
    predicate: F,
    cancel: &CancellationToken,
    timeout: Duration,
) -> Result<()>
where
    C: ResourceClient + ?Sized,
    F: Fn(WatchEventType, &DynamicObject) -> Result<bool>,
{
    let described = target.to_string();
    if cancel.is_cancelled() {
        return Err(KubeError::Cancelled { target: described });
    }

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(KubeError::Cancelled { target: described }),
        _ = &mut deadline => return Err(KubeError::TimedOut { target: described, timeout }),
        opened = client.watch(
            &target.kind,
            target.namespace.as_deref(),
            target.label_selector.as_deref(),
        ) => opened?,
    };

    debug!(watch = %described, "watching");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(KubeError::Cancelled { target: described });
            }
            _ = &mut deadline => {
                return Err(KubeError::TimedOut { target: described, timeout });
            }
            next = stream.next() => match next {
                Some(Ok(event)) => {
                    if predicate(event.event_type, &event.object)? {
                        debug!(watch = %described, "condition met");
                        return Ok(());
                    }
                }
                Some(Err(e)) => return Err(e),
                None => return Err(KubeError::StreamClosed { target: described }),
            },
        }
    }
}

/// Ready-made stop predicates
pub mod conditions {
    use kube::api::DynamicObject;

    use crate::client::WatchEventType;
    use crate::error::Result;
    use crate::object::ObjectExt;

    /// Status of a `status.conditions[]` entry
    pub fn condition_status<'a>(object: &'a DynamicObject, condition_type: &str) -> Option<&'a str> {
        object
            .field(&["status", "conditions"])?
            .as_array()?
            .iter()
            .find(|c| c.get("type").and_then(|t| t.as_str()) == Some(condition_type))?
            .get("status")?
            .as_str()
    }

    /// Pod has `Ready=True`
    pub fn pod_ready(event_type: WatchEventType, object: &DynamicObject) -> Result<bool> {
        Ok(event_type != WatchEventType::Deleted && condition_status(object, "Ready") == Some("True"))
    }

    /// Every listed condition is `True`
    pub fn all_true(
        condition_types: &'static [&'static str],
    ) -> impl Fn(WatchEventType, &DynamicObject) -> Result<bool> {
        move |event_type, object| {
            Ok(event_type != WatchEventType::Deleted
                && condition_types
                    .iter()
                    .all(|t| condition_status(object, t) == Some("True")))
        }
    }

    /// Restrict another predicate to the object called `name`
    pub fn named<F>(name: String, inner: F) -> impl Fn(WatchEventType, &DynamicObject) -> Result<bool>
    where
        F: Fn(WatchEventType, &DynamicObject) -> Result<bool>,
    {
        move |event_type, object| {
            if object.name() == name {
                inner(event_type, object)
            } else {
                Ok(false)
            }
        }
    }

    /// The object called `name` was deleted
    pub fn deleted(name: String) -> impl Fn(WatchEventType, &DynamicObject) -> Result<bool> {
        move |event_type, object| Ok(event_type == WatchEventType::Deleted && object.name() == name)
    }
}
