//! In-memory [`ClusterClient`] for tests.
//!
//! Objects live in a map keyed by (kind, namespace, name). Creates and deletes
//! are broadcast to matching watches as `Added`/`Deleted` events, and tests can
//! push arbitrary events with [`MockCluster::emit`]. Failures are scripted per
//! verb and kind.

use crate::error::{ClusterError, ClusterResult};
use crate::object::{
    ClusterObject, LabelSelector, PropagationPolicy, ResourceKind, RuntimeKind, WatchTarget,
};
use crate::watch::{Watch, WatchEvent, WatchHandle};
use crate::ClusterClient;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockVerb {
    Get,
    List,
    Create,
    Delete,
    Watch,
    Logs,
}

type ObjectKey = (ResourceKind, Option<String>, String);

struct MockWatcher {
    kind: ResourceKind,
    namespace: Option<String>,
    target: WatchTarget,
    sender: mpsc::UnboundedSender<WatchEvent>,
    handle: WatchHandle,
}

impl MockWatcher {
    fn wants(&self, kind: ResourceKind, object: &ClusterObject) -> bool {
        if self.kind != kind || self.handle.is_closed() {
            return false;
        }
        if self.namespace.is_some() && self.namespace != object.metadata.namespace {
            return false;
        }
        match &self.target {
            WatchTarget::Name(name) => object.name() == name,
            WatchTarget::Selector(selector) => selector.matches(&object.metadata.labels),
        }
    }
}

#[derive(Default)]
struct MockState {
    objects: HashMap<ObjectKey, ClusterObject>,
    failures: HashMap<(MockVerb, ResourceKind), ClusterError>,
    logs: HashMap<String, ClusterResult<String>>,
    created: Vec<ClusterObject>,
    deleted: Vec<(ResourceKind, String)>,
    calls: HashMap<(MockVerb, ResourceKind), usize>,
    watchers: Vec<MockWatcher>,
    keep_on_delete: bool,
}

#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<Mutex<MockState>>,
    closed_watches: Arc<AtomicUsize>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Store an object without going through `create` (no counters, no events).
    pub fn insert(&self, object: ClusterObject) {
        let Some(kind) = object.resource_kind() else {
            panic!("mock cluster cannot store kind '{}'", object.kind);
        };
        let key = (kind, object.metadata.namespace.clone(), object.name().to_string());
        self.state().objects.insert(key, object);
    }

    /// Drop an object silently, as if it vanished between two calls.
    pub fn remove(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) {
        self.state()
            .objects
            .remove(&(kind, namespace.map(str::to_string), name.to_string()));
    }

    pub fn object(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Option<ClusterObject> {
        self.state()
            .objects
            .get(&(kind, namespace.map(str::to_string), name.to_string()))
            .cloned()
    }

    /// Make every `verb` call on `kind` fail with `error` until cleared.
    pub fn fail(&self, verb: MockVerb, kind: ResourceKind, error: ClusterError) {
        self.state().failures.insert((verb, kind), error);
    }

    pub fn clear_failure(&self, verb: MockVerb, kind: ResourceKind) {
        self.state().failures.remove(&(verb, kind));
    }

    pub fn set_logs(&self, name: &str, logs: impl Into<String>) {
        self.state().logs.insert(name.to_string(), Ok(logs.into()));
    }

    pub fn fail_logs(&self, name: &str, error: ClusterError) {
        self.state().logs.insert(name.to_string(), Err(error));
    }

    /// Leave objects in place on delete, as a cluster with finalizers would.
    pub fn keep_objects_on_delete(&self) {
        self.state().keep_on_delete = true;
    }

    /// Deliver `event` to every open watch on `kind` whose target matches.
    pub fn emit(&self, kind: ResourceKind, event: WatchEvent) {
        let state = self.state();
        let Some(object) = event.object() else {
            for watcher in state.watchers.iter().filter(|w| w.kind == kind) {
                let _ = watcher.sender.send(event.clone());
            }
            return;
        };
        for watcher in state.watchers.iter().filter(|w| w.wants(kind, object)) {
            let _ = watcher.sender.send(event.clone());
        }
    }

    /// Drop the sending side of every watch on `kind`, as a dropped connection would.
    pub fn disconnect_watches(&self, kind: ResourceKind) {
        self.state().watchers.retain(|w| w.kind != kind);
    }

    pub fn calls(&self, verb: MockVerb, kind: ResourceKind) -> usize {
        self.state().calls.get(&(verb, kind)).copied().unwrap_or(0)
    }

    pub fn created(&self) -> Vec<ClusterObject> {
        self.state().created.clone()
    }

    pub fn deleted(&self) -> Vec<(ResourceKind, String)> {
        self.state().deleted.clone()
    }

    pub fn watches_opened(&self, kind: ResourceKind) -> usize {
        self.calls(MockVerb::Watch, kind)
    }

    pub fn watches_closed(&self) -> usize {
        self.closed_watches.load(Ordering::SeqCst)
    }

    pub fn open_watches(&self) -> usize {
        self.state()
            .watchers
            .iter()
            .filter(|w| !w.handle.is_closed())
            .count()
    }

    fn enter(&self, verb: MockVerb, kind: ResourceKind) -> ClusterResult<MutexGuard<'_, MockState>> {
        let mut state = self.state();
        *state.calls.entry((verb, kind)).or_default() += 1;
        match state.failures.get(&(verb, kind)) {
            Some(error) => Err(error.clone()),
            None => Ok(state),
        }
    }

    fn broadcast(state: &MockState, kind: ResourceKind, event: WatchEvent) {
        if let Some(object) = event.object() {
            for watcher in state.watchers.iter().filter(|w| w.wants(kind, object)) {
                let _ = watcher.sender.send(event.clone());
            }
        }
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> ClusterResult<Option<ClusterObject>> {
        let state = self.enter(MockVerb::Get, kind)?;
        Ok(state
            .objects
            .get(&(kind, namespace.map(str::to_string), name.to_string()))
            .cloned())
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> ClusterResult<Vec<ClusterObject>> {
        let state = self.enter(MockVerb::List, kind)?;
        let mut items: Vec<ClusterObject> = state
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && (namespace.is_none() || ns.as_deref() == namespace))
            .map(|(_, object)| object)
            .filter(|object| selector.matches(&object.metadata.labels))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(items)
    }

    async fn create(
        &self,
        namespace: Option<&str>,
        object: &ClusterObject,
    ) -> ClusterResult<ClusterObject> {
        let kind = object
            .resource_kind()
            .ok_or_else(|| ClusterError::Api(format!("unknown kind '{}'", object.kind)))?;
        let mut state = self.enter(MockVerb::Create, kind)?;

        let mut stored = object.clone();
        if kind.is_namespaced() {
            stored.metadata.namespace = namespace
                .map(str::to_string)
                .or_else(|| stored.metadata.namespace.clone());
        }
        if stored.metadata.creation_timestamp.is_none() {
            stored.metadata.creation_timestamp = Some(Utc::now());
        }
        state.created.push(stored.clone());

        let key = (kind, stored.metadata.namespace.clone(), stored.name().to_string());
        if state.objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(format!(
                "{} \"{}\" already exists",
                kind.resource_name(),
                stored.name()
            )));
        }
        state.objects.insert(key, stored.clone());
        Self::broadcast(&state, kind, WatchEvent::Added(stored.clone()));
        Ok(stored)
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        _propagation: PropagationPolicy,
    ) -> ClusterResult<bool> {
        let mut state = self.enter(MockVerb::Delete, kind)?;
        state.deleted.push((kind, name.to_string()));

        let key = (kind, namespace.map(str::to_string), name.to_string());
        if state.keep_on_delete {
            return Ok(state.objects.contains_key(&key));
        }
        match state.objects.remove(&key) {
            Some(removed) => {
                Self::broadcast(&state, kind, WatchEvent::Deleted(removed));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_collection(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &LabelSelector,
        _propagation: PropagationPolicy,
    ) -> ClusterResult<()> {
        let mut state = self.enter(MockVerb::Delete, kind)?;
        let doomed: Vec<ObjectKey> = state
            .objects
            .iter()
            .filter(|((k, ns, _), object)| {
                *k == kind
                    && ns.as_deref() == Some(namespace)
                    && selector.matches(&object.metadata.labels)
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            state.deleted.push((kind, key.2.clone()));
            if let Some(removed) = state.objects.remove(&key) {
                Self::broadcast(&state, kind, WatchEvent::Deleted(removed));
            }
        }
        Ok(())
    }

    async fn watch(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        target: WatchTarget,
    ) -> ClusterResult<Watch> {
        let mut state = self.enter(MockVerb::Watch, kind)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let closed = self.closed_watches.clone();
        let handle = WatchHandle::new(move || {
            closed.fetch_add(1, Ordering::SeqCst);
        });
        state.watchers.push(MockWatcher {
            kind,
            namespace: namespace.map(str::to_string),
            target,
            sender,
            handle: handle.clone(),
        });
        Ok(Watch::new(handle, receiver))
    }

    async fn logs(&self, kind: RuntimeKind, _namespace: &str, name: &str) -> ClusterResult<String> {
        let state = self.enter(MockVerb::Logs, kind.resource())?;
        state.logs.get(name).cloned().unwrap_or_else(|| Ok(String::new()))
    }
}
