//! In-memory resource client for testing
//!
//! Objects live in a map keyed by kind, namespace and name. Every call is
//! recorded in order so tests can assert on call sequences, and failures can
//! be injected per operation. Deleting an object that still carries
//! finalizers only marks it terminating, the way the API server does.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedSender, unbounded};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::DynamicObject;
use serde_json::Value as JsonValue;

use super::{
    PatchKind, ResourceClient, WatchEvent, WatchEventType, WatchStream, apply_error,
    prepare_for_apply,
};
use crate::error::{KubeError, Result, api_error};
use crate::kinds::KindRef;
pub use crate::object::new_object;
use crate::object::ObjectExt;

/// Client operations, as recorded by the mock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Get,
    Apply,
    Patch,
    Delete,
    Watch,
}

impl Operation {
    /// Whether the operation changes cluster state
    pub fn is_mutating(self) -> bool {
        matches!(self, Operation::Apply | Operation::Patch | Operation::Delete)
    }
}

/// One recorded call
#[derive(Debug, Clone)]
pub struct Call {
    pub operation: Operation,
    pub kind: KindRef,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub patch: Option<(PatchKind, JsonValue)>,
}

impl Call {
    fn new(operation: Operation, kind: &KindRef) -> Self {
        Self {
            operation,
            kind: kind.clone(),
            name: None,
            namespace: None,
            patch: None,
        }
    }

    fn named(mut self, name: &str, namespace: Option<&str>) -> Self {
        self.name = Some(name.to_string());
        self.namespace = namespace.map(str::to_string);
        self
    }

    /// Whether this call targets `kind`/`name`
    pub fn targets(&self, kind: &KindRef, name: &str) -> bool {
        &self.kind == kind && self.name.as_deref() == Some(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
    group: String,
    kind: String,
    namespace: String,
    name: String,
}

impl ObjectKey {
    fn new(kind: &KindRef, namespace: Option<&str>, name: &str) -> Self {
        Self {
            group: kind.group.clone(),
            kind: kind.kind.clone(),
            namespace: namespace.unwrap_or_default().to_string(),
            name: name.to_string(),
        }
    }

    fn is_kind(&self, kind: &KindRef) -> bool {
        self.group == kind.group && self.kind == kind.kind
    }
}

#[derive(Debug, Clone)]
struct Failure {
    operation: Operation,
    kind: KindRef,
    name: Option<String>,
    code: u16,
}

struct Watcher {
    kind: KindRef,
    namespace: Option<String>,
    selector: Option<String>,
    sender: UnboundedSender<Result<WatchEvent>>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    missing_kinds: HashSet<KindRef>,
    calls: Vec<Call>,
    failures: Vec<Failure>,
    watchers: Vec<Watcher>,
    revision: u64,
}

impl State {
    fn check_kind(&self, kind: &KindRef) -> Result<()> {
        if self.missing_kinds.contains(kind) {
            Err(KubeError::KindNotFound {
                kind: kind.to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn check_failure(&self, operation: Operation, kind: &KindRef, name: Option<&str>) -> Result<()> {
        let hit = self.failures.iter().find(|f| {
            f.operation == operation
                && &f.kind == kind
                && (f.name.is_none() || f.name.as_deref() == name)
        });
        match hit {
            Some(f) => Err(api_error(
                f.code,
                "InjectedFailure",
                format!("injected {:?} failure for {}", operation, kind),
            )),
            None => Ok(()),
        }
    }

    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn notify(&mut self, kind: &KindRef, event_type: WatchEventType, object: &DynamicObject) {
        self.watchers.retain(|w| {
            if &w.kind != kind || !matches_scope(object, w.namespace.as_deref(), w.selector.as_deref())
            {
                return !w.sender.is_closed();
            }
            w.sender
                .unbounded_send(Ok(WatchEvent {
                    event_type,
                    object: object.clone(),
                }))
                .is_ok()
        });
    }

    fn remove(&mut self, kind: &KindRef, key: &ObjectKey) {
        if let Some(removed) = self.objects.remove(key) {
            self.notify(kind, WatchEventType::Deleted, &removed);
        }
    }
}

/// In-memory [`ResourceClient`] for tests
#[derive(Clone, Default)]
pub struct MockResourceClient {
    state: Arc<Mutex<State>>,
}

impl MockResourceClient {
    /// Create an empty mock where every kind is served
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an object without recording a call
    pub fn insert(&self, kind: &KindRef, mut object: DynamicObject) {
        let mut state = self.state();
        object.types = Some(kind.type_meta());
        object.metadata.resource_version = Some(state.next_revision());
        let key = ObjectKey::new(kind, object.namespace(), object.name());
        state.notify(kind, WatchEventType::Added, &object);
        state.objects.insert(key, object);
    }

    /// Seed an object built from a name, namespace and body
    pub fn insert_named(
        &self,
        kind: &KindRef,
        name: &str,
        namespace: Option<&str>,
        body: JsonValue,
    ) -> DynamicObject {
        let mut object = new_object(name, namespace);
        object.data = body;
        self.insert(kind, object.clone());
        object
    }

    /// Make the cluster report `kind` as unknown
    pub fn without_kind(&self, kind: &KindRef) {
        self.state().missing_kinds.insert(kind.clone());
    }

    /// Fail `operation` on `kind` (optionally only for `name`) with a 500
    pub fn fail_on(&self, operation: Operation, kind: &KindRef, name: Option<&str>) {
        self.fail_with(operation, kind, name, 500);
    }

    /// Fail `operation` on `kind` (optionally only for `name`) with `code`
    pub fn fail_with(&self, operation: Operation, kind: &KindRef, name: Option<&str>, code: u16) {
        self.state().failures.push(Failure {
            operation,
            kind: kind.clone(),
            name: name.map(str::to_string),
            code,
        });
    }

    /// Send an event to open watches and update the store to match
    ///
    /// Simulates a change made by something other than this client, such as
    /// a controller marking a pod ready.
    pub fn emit(&self, kind: &KindRef, event_type: WatchEventType, mut object: DynamicObject) {
        let mut state = self.state();
        object.types = Some(kind.type_meta());
        let key = ObjectKey::new(kind, object.namespace(), object.name());
        match event_type {
            WatchEventType::Deleted => {
                state.objects.remove(&key);
            }
            _ => {
                object.metadata.resource_version = Some(state.next_revision());
                state.objects.insert(key, object.clone());
            }
        }
        state.notify(kind, event_type, &object);
    }

    /// Close every open watch stream
    pub fn close_watches(&self) {
        self.state().watchers.clear();
    }

    /// Number of watch streams still open
    pub fn open_watches(&self) -> usize {
        let mut state = self.state();
        state.watchers.retain(|w| !w.sender.is_closed());
        state.watchers.len()
    }

    /// Objects currently stored for a kind
    pub fn objects(&self, kind: &KindRef) -> Vec<DynamicObject> {
        self.state()
            .objects
            .iter()
            .filter(|(key, _)| key.is_kind(kind))
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    /// Stored object by name
    pub fn object(&self, kind: &KindRef, name: &str, namespace: Option<&str>) -> Option<DynamicObject> {
        self.state()
            .objects
            .get(&ObjectKey::new(kind, namespace, name))
            .cloned()
    }

    /// All recorded calls in order
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Recorded calls that change cluster state
    pub fn mutating_calls(&self) -> Vec<Call> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.operation.is_mutating())
            .cloned()
            .collect()
    }

    /// Forget recorded calls
    pub fn reset_calls(&self) {
        self.state().calls.clear();
    }
}

#[async_trait]
impl ResourceClient for MockResourceClient {
    async fn list(
        &self,
        kind: &KindRef,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let mut state = self.state();
        let mut call = Call::new(Operation::List, kind);
        call.namespace = namespace.map(str::to_string);
        state.calls.push(call);

        state.check_kind(kind)?;
        state.check_failure(Operation::List, kind, None)?;

        Ok(state
            .objects
            .iter()
            .filter(|(key, obj)| key.is_kind(kind) && matches_scope(obj, namespace, label_selector))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn get(
        &self,
        kind: &KindRef,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<DynamicObject>> {
        let mut state = self.state();
        state
            .calls
            .push(Call::new(Operation::Get, kind).named(name, namespace));

        if state.check_kind(kind).is_err() {
            return Ok(None);
        }
        state.check_failure(Operation::Get, kind, Some(name))?;

        Ok(state
            .objects
            .get(&ObjectKey::new(kind, namespace, name))
            .cloned())
    }

    async fn apply(&self, object: &DynamicObject, kind: &KindRef) -> Result<()> {
        let mut state = self.state();
        state
            .calls
            .push(Call::new(Operation::Apply, kind).named(object.name(), object.namespace()));

        state.check_kind(kind)?;
        let mut prepared = prepare_for_apply(object, kind)?;
        let name = prepared.name().to_string();
        if let Err(KubeError::Api(e)) = state.check_failure(Operation::Apply, kind, Some(&name)) {
            return Err(apply_error(kind, &name, e));
        }

        let key = ObjectKey::new(kind, prepared.namespace(), &name);
        let event_type = match state.objects.get(&key) {
            Some(existing) => {
                // server-managed metadata survives an apply
                prepared.metadata.finalizers = existing
                    .metadata
                    .finalizers
                    .clone()
                    .or(prepared.metadata.finalizers);
                prepared.metadata.deletion_timestamp = existing.metadata.deletion_timestamp.clone();
                WatchEventType::Modified
            }
            None => WatchEventType::Added,
        };
        prepared.metadata.resource_version = Some(state.next_revision());

        state.notify(kind, event_type, &prepared);
        state.objects.insert(key, prepared);
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
        let mut state = self.state();
        let mut call = Call::new(Operation::Patch, kind).named(name, namespace);
        call.patch = Some((patch_kind, patch.clone()));
        state.calls.push(call);

        state.check_kind(kind)?;
        state.check_failure(Operation::Patch, kind, Some(name))?;

        let key = ObjectKey::new(kind, namespace, name);
        let Some(existing) = state.objects.get(&key) else {
            return Err(api_error(
                404,
                "NotFound",
                format!("{} \"{}\" not found", kind.kind, name),
            ));
        };

        // strategic merge only differs from merge for keyed lists, which no caller patches
        let mut document = serde_json::to_value(existing)?;
        merge_patch(&mut document, patch);
        let mut patched: DynamicObject = serde_json::from_value(document)?;
        patched.metadata.resource_version = Some(state.next_revision());

        if patched.is_terminating() && !patched.has_finalizers() {
            state.remove(kind, &key);
        } else {
            state.notify(kind, WatchEventType::Modified, &patched);
            state.objects.insert(key, patched);
        }
        Ok(())
    }

    async fn delete(&self, kind: &KindRef, object: &DynamicObject) -> Result<()> {
        let mut state = self.state();
        state
            .calls
            .push(Call::new(Operation::Delete, kind).named(object.name(), object.namespace()));

        if state.check_kind(kind).is_err() {
            return Ok(());
        }
        state.check_failure(Operation::Delete, kind, Some(object.name()))?;

        let key = ObjectKey::new(kind, object.namespace(), object.name());
        let Some(existing) = state.objects.get_mut(&key) else {
            return Ok(());
        };

        if existing.has_finalizers() {
            if existing.metadata.deletion_timestamp.is_none() {
                existing.metadata.deletion_timestamp = Some(Time(Utc::now()));
                let marked = existing.clone();
                state.notify(kind, WatchEventType::Modified, &marked);
            }
        } else {
            state.remove(kind, &key);
        }
        Ok(())
    }

    async fn watch(
        &self,
        kind: &KindRef,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<WatchStream> {
        let mut state = self.state();
        let mut call = Call::new(Operation::Watch, kind);
        call.namespace = namespace.map(str::to_string);
        state.calls.push(call);

        state.check_kind(kind)?;
        state.check_failure(Operation::Watch, kind, None)?;

        let (sender, receiver) = unbounded();
        for (key, obj) in &state.objects {
            if key.is_kind(kind) && matches_scope(obj, namespace, label_selector) {
                let _ = sender.unbounded_send(Ok(WatchEvent {
                    event_type: WatchEventType::Added,
                    object: obj.clone(),
                }));
            }
        }

        state.watchers.push(Watcher {
            kind: kind.clone(),
            namespace: namespace.map(str::to_string),
            selector: label_selector.map(str::to_string),
            sender,
        });

        Ok(receiver.boxed())
    }
}

fn matches_scope(object: &DynamicObject, namespace: Option<&str>, selector: Option<&str>) -> bool {
    if let Some(ns) = namespace {
        if object.namespace() != Some(ns) {
            return false;
        }
    }
    selector.is_none_or(|s| matches_selector(object, s))
}

/// Equality-based label selector: `a=b`, `a==b`, `a!=b`, `a`, `!a`
fn matches_selector(object: &DynamicObject, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((key, value)) = term.split_once("!=") {
                object.label(key.trim()) != Some(value.trim())
            } else if let Some((key, value)) = term
                .split_once("==")
                .or_else(|| term.split_once('='))
            {
                object.label(key.trim()) == Some(value.trim())
            } else if let Some(key) = term.strip_prefix('!') {
                object.label(key.trim()).is_none()
            } else {
                object.label(term).is_some()
            }
        })
}

/// JSON merge patch (RFC 7386)
fn merge_patch(target: &mut JsonValue, patch: &JsonValue) {
    let JsonValue::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = JsonValue::Object(serde_json::Map::new());
    }

    if let JsonValue::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(
                    target_map.entry(key.clone()).or_insert(JsonValue::Null),
                    value,
                );
            }
        }
    }
}
