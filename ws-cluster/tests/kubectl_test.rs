//! Drives the kubectl backend against a scripted stand-in binary.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use ws_cluster::{
    ClusterClient, KubectlClient, KubectlConfig, NamespaceProvisioner, PodPhase,
    PropagationPolicy, ResourceKind, RuntimeKind, RuntimeObjectWatcher,
};

const FAKE_KUBECTL: &str = r#"#!/bin/sh
echo "$*" >> "$(dirname "$0")/calls.log"
if [ "$1" = "--context" ]; then shift 2; fi
case "$1 $2 $3" in
  "get pods web")
    echo '{"apiVersion":"v1","kind":"Pod","metadata":{"name":"web","namespace":"ns1"},"status":{"phase":"Running"}}'
    ;;
  "get namespaces testNamespace")
    echo '{"apiVersion":"v1","kind":"Namespace","metadata":{"name":"testNamespace"}}'
    ;;
  *)
    echo "Error from server (NotFound): $2 \"$3\" not found" >&2
    exit 1
    ;;
esac
"#;

struct FakeKubectl {
    dir: TempDir,
}

impl FakeKubectl {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let binary = dir.path().join("kubectl");
        std::fs::write(&binary, FAKE_KUBECTL).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir }
    }

    fn binary(&self) -> PathBuf {
        self.dir.path().join("kubectl")
    }

    fn client(&self) -> KubectlClient {
        KubectlClient::new(KubectlConfig {
            binary: self.binary().display().to_string(),
            context: Some("test".to_string()),
            kubeconfig: None,
        })
    }

    fn calls(&self) -> Vec<String> {
        read_calls(&self.dir.path().join("calls.log"))
    }
}

fn read_calls(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_get_parses_object_and_maps_not_found() {
    let fake = FakeKubectl::new();
    let client = fake.client();

    let pod = client
        .get(ResourceKind::Pod, Some("ns1"), "web")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pod.name(), "web");
    assert_eq!(pod.pod_phase(), PodPhase::Running);

    assert!(client
        .get(ResourceKind::Pod, Some("ns1"), "ghost")
        .await
        .unwrap()
        .is_none());

    // global args come first
    assert!(fake.calls()[0].starts_with("--context test get pods web"));
}

#[tokio::test]
async fn test_delete_of_absent_object_reports_nothing_deleted() {
    let fake = FakeKubectl::new();
    let deleted = fake
        .client()
        .delete(ResourceKind::Pod, Some("ns1"), "ghost", PropagationPolicy::Background)
        .await
        .unwrap();
    assert!(!deleted);
    assert!(fake.calls()[0].contains("--cascade=background"));
}

#[tokio::test]
async fn test_running_pod_resolves_without_watch() {
    let fake = FakeKubectl::new();
    let watcher = RuntimeObjectWatcher::new(Arc::new(fake.client()));

    watcher
        .wait_for_phase(RuntimeKind::Pod, "ns1", "web", PodPhase::Running)
        .await
        .unwrap();

    assert!(fake.calls().iter().all(|call| !call.contains("--watch")));
}

#[tokio::test]
async fn test_prepare_existing_namespace_creates_nothing() {
    let fake = FakeKubectl::new();
    let provisioner = NamespaceProvisioner::new(Arc::new(fake.client()));

    provisioner.prepare("testNamespace").await.unwrap();

    let calls = fake.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls.iter().all(|call| !call.contains("create")));
}
