//! Cluster object model.
//!
//! Objects are kept close to their wire shape: typed metadata plus `spec` and
//! `status` as raw JSON, with accessors for the handful of fields the
//! lifecycle logic actually reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Label attached to every runtime object created for a workspace.
pub const WORKSPACE_ID_LABEL: &str = "workspace.id";

/// Label that ties a deployment's pods to that one deployment.
pub const DEPLOYMENT_LABEL: &str = "deployment";

/// Resource kinds the lifecycle layer touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Namespace,
    ServiceAccount,
    Pod,
    Deployment,
    Service,
    Ingress,
    Secret,
    ConfigMap,
    PersistentVolumeClaim,
}

impl ResourceKind {
    /// Kinds removed when a workspace's objects are cleaned out of a namespace,
    /// controllers first so they do not recreate what was just deleted.
    pub const WORKSPACE_SCOPED: [ResourceKind; 7] = [
        ResourceKind::Deployment,
        ResourceKind::Pod,
        ResourceKind::Service,
        ResourceKind::Ingress,
        ResourceKind::Secret,
        ResourceKind::ConfigMap,
        ResourceKind::PersistentVolumeClaim,
    ];

    pub fn kind_name(&self) -> &'static str {
        match self {
            ResourceKind::Namespace => "Namespace",
            ResourceKind::ServiceAccount => "ServiceAccount",
            ResourceKind::Pod => "Pod",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::Service => "Service",
            ResourceKind::Ingress => "Ingress",
            ResourceKind::Secret => "Secret",
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::PersistentVolumeClaim => "PersistentVolumeClaim",
        }
    }

    /// Resource name as understood by `kubectl`.
    pub fn resource_name(&self) -> &'static str {
        match self {
            ResourceKind::Namespace => "namespaces",
            ResourceKind::ServiceAccount => "serviceaccounts",
            ResourceKind::Pod => "pods",
            ResourceKind::Deployment => "deployments.apps",
            ResourceKind::Service => "services",
            ResourceKind::Ingress => "ingresses.networking.k8s.io",
            ResourceKind::Secret => "secrets",
            ResourceKind::ConfigMap => "configmaps",
            ResourceKind::PersistentVolumeClaim => "persistentvolumeclaims",
        }
    }

    pub fn api_version(&self) -> &'static str {
        match self {
            ResourceKind::Deployment => "apps/v1",
            ResourceKind::Ingress => "networking.k8s.io/v1",
            _ => "v1",
        }
    }

    pub fn is_namespaced(&self) -> bool {
        !matches!(self, ResourceKind::Namespace)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind_name())
    }
}

/// Runtime object kinds that can back a running workspace component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeKind {
    Pod,
    Deployment,
}

impl RuntimeKind {
    pub fn resource(&self) -> ResourceKind {
        match self {
            RuntimeKind::Pod => ResourceKind::Pod,
            RuntimeKind::Deployment => ResourceKind::Deployment,
        }
    }

    pub fn label(&self) -> &'static str {
        self.resource().kind_name()
    }

    /// Current phase of `object`, plus the failure reason when one is reported.
    pub fn phase_of(&self, object: &ClusterObject) -> (PodPhase, Option<String>) {
        match self {
            RuntimeKind::Pod => (object.pod_phase(), object.status_reason()),
            RuntimeKind::Deployment => deployment_phase(object),
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(value: &str) -> Self {
        match value {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    #[serde(default)]
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

/// A cluster object as read from or written to the control plane.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterObject {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub spec: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub status: Value,
}

impl ClusterObject {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            api_version: kind.api_version().to_string(),
            kind: kind.kind_name().to_string(),
            metadata: ObjectMeta {
                name: name.into(),
                ..Default::default()
            },
            spec: Value::Null,
            status: Value::Null,
        }
    }

    pub fn namespace(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Namespace, name)
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.metadata.namespace = Some(namespace.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_spec(mut self, spec: Value) -> Self {
        self.spec = spec;
        self
    }

    pub fn with_status(mut self, status: Value) -> Self {
        self.status = status;
        self
    }

    /// Shortcut used by tests and the mock cluster.
    pub fn with_phase(self, phase: PodPhase) -> Self {
        self.with_status(json!({ "phase": phase.as_str() }))
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn resource_kind(&self) -> Option<ResourceKind> {
        [
            ResourceKind::Namespace,
            ResourceKind::ServiceAccount,
            ResourceKind::Pod,
            ResourceKind::Deployment,
            ResourceKind::Service,
            ResourceKind::Ingress,
            ResourceKind::Secret,
            ResourceKind::ConfigMap,
            ResourceKind::PersistentVolumeClaim,
        ]
        .into_iter()
        .find(|kind| kind.kind_name() == self.kind)
    }

    pub fn pod_phase(&self) -> PodPhase {
        self.status
            .get("phase")
            .and_then(Value::as_str)
            .map(PodPhase::parse)
            .unwrap_or(PodPhase::Unknown)
    }

    /// `status.reason`, ignoring empty strings.
    pub fn status_reason(&self) -> Option<String> {
        self.status
            .get("reason")
            .and_then(Value::as_str)
            .filter(|reason| !reason.is_empty())
            .map(str::to_string)
    }

    /// `spec.selector.matchLabels` of a deployment.
    pub fn match_labels(&self) -> BTreeMap<String, String> {
        self.spec
            .pointer("/selector/matchLabels")
            .and_then(Value::as_object)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Wrap this pod into a single-replica deployment with the same metadata.
    ///
    /// The selector is the pod's labels plus [`DEPLOYMENT_LABEL`], so sibling
    /// objects of the same workspace never match it.
    pub fn into_deployment(self) -> ClusterObject {
        let mut selector = self.metadata.labels.clone();
        selector.insert(DEPLOYMENT_LABEL.to_string(), self.metadata.name.clone());
        let mut template_meta = self.metadata.clone();
        template_meta.labels.extend(selector.clone());
        template_meta.namespace = None;

        let mut pod_spec = self.spec;
        if let Some(spec) = pod_spec.as_object_mut() {
            // Deployments only accept "Always".
            spec.insert("restartPolicy".to_string(), json!("Always"));
        }

        let mut deployment = ClusterObject::new(ResourceKind::Deployment, self.metadata.name.clone());
        deployment.metadata = ObjectMeta {
            labels: template_meta.labels.clone(),
            ..self.metadata
        };
        deployment.spec = json!({
            "replicas": 1,
            "selector": { "matchLabels": selector },
            "template": {
                "metadata": template_meta,
                "spec": pod_spec,
            }
        });
        deployment
    }
}

fn deployment_phase(object: &ClusterObject) -> (PodPhase, Option<String>) {
    let conditions = object
        .status
        .get("conditions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let find = |kind: &str| {
        conditions
            .iter()
            .find(|c| c.get("type").and_then(Value::as_str) == Some(kind))
    };
    let is = |cond: &Value, status: &str| cond.get("status").and_then(Value::as_str) == Some(status);
    let reason_of = |cond: &Value| {
        cond.get("message")
            .and_then(Value::as_str)
            .or_else(|| cond.get("reason").and_then(Value::as_str))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    if let Some(failure) = find("ReplicaFailure").filter(|c| is(*c, "True")) {
        return (PodPhase::Failed, reason_of(failure));
    }
    if let Some(progressing) = find("Progressing").filter(|c| is(*c, "False")) {
        return (PodPhase::Failed, reason_of(progressing));
    }
    if find("Available").is_some_and(|c| is(c, "True")) {
        return (PodPhase::Running, None);
    }
    (PodPhase::Pending, None)
}

/// Equality-based label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workspace(workspace_id: &str) -> Self {
        Self::new().with(WORKSPACE_ID_LABEL, workspace_id)
    }

    pub fn from_labels(labels: BTreeMap<String, String>) -> Self {
        Self { match_labels: labels }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }

    /// `k=v,k2=v2` form used by `kubectl -l`.
    pub fn render(&self) -> String {
        self.match_labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// What a watch is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    Name(String),
    Selector(LabelSelector),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PropagationPolicy {
    #[default]
    Background,
    Foreground,
    Orphan,
}

impl PropagationPolicy {
    pub fn as_cascade(&self) -> &'static str {
        match self {
            PropagationPolicy::Background => "background",
            PropagationPolicy::Foreground => "foreground",
            PropagationPolicy::Orphan => "orphan",
        }
    }
}
