//! [`ClusterClient`] backed by the `kubectl` binary.
//!
//! Every invocation runs on the blocking pool. Watches stream
//! `--output-watch-events -o json` documents from a long-running `kubectl get
//! --watch`; closing the watch kills that process.

mod command;

pub use command::{classify_error, KubectlCommand};

use crate::error::{ClusterError, ClusterResult};
use crate::object::{
    ClusterObject, LabelSelector, PropagationPolicy, ResourceKind, RuntimeKind, WatchTarget,
};
use crate::watch::{Watch, WatchEvent, WatchHandle};
use crate::ClusterClient;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use ws_core::command_stream::is_tool_installed;

/// Connection settings for the `kubectl` backend.
#[derive(Debug, Clone)]
pub struct KubectlConfig {
    pub binary: String,
    pub context: Option<String>,
    pub kubeconfig: Option<PathBuf>,
}

impl Default for KubectlConfig {
    fn default() -> Self {
        Self {
            binary: "kubectl".to_string(),
            context: None,
            kubeconfig: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KubectlClient {
    binary: String,
    global_args: Vec<String>,
}

#[derive(Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<ClusterObject>,
}

#[derive(Deserialize)]
struct RawWatchEvent {
    #[serde(rename = "type")]
    event_type: String,
    object: serde_json::Value,
}

impl KubectlClient {
    pub fn new(config: KubectlConfig) -> Self {
        let mut global_args = Vec::new();
        if let Some(context) = config.context {
            global_args.push("--context".to_string());
            global_args.push(context);
        }
        if let Some(kubeconfig) = config.kubeconfig {
            global_args.push("--kubeconfig".to_string());
            global_args.push(kubeconfig.display().to_string());
        }
        Self {
            binary: config.binary,
            global_args,
        }
    }

    pub fn is_available(&self) -> bool {
        is_tool_installed(&self.binary)
    }

    fn command(&self) -> KubectlCommand {
        KubectlCommand::new(&self.binary, &self.global_args)
    }

    async fn run(&self, command: KubectlCommand) -> ClusterResult<String> {
        tokio::task::spawn_blocking(move || command.output())
            .await
            .map_err(|e| ClusterError::Unexpected(format!("kubectl task failed: {}", e)))?
    }
}

fn target_args(target: &WatchTarget) -> Vec<String> {
    match target {
        WatchTarget::Name(name) => vec![
            "--field-selector".to_string(),
            format!("metadata.name={}", name),
        ],
        WatchTarget::Selector(selector) => vec!["-l".to_string(), selector.render()],
    }
}

fn convert_event(raw: RawWatchEvent) -> WatchEvent {
    let object = || serde_json::from_value::<ClusterObject>(raw.object.clone());
    let parsed = match raw.event_type.as_str() {
        "ADDED" => object().map(WatchEvent::Added),
        "MODIFIED" => object().map(WatchEvent::Modified),
        "DELETED" => object().map(WatchEvent::Deleted),
        _ => {
            let message = raw
                .object
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("watch error")
                .to_string();
            return WatchEvent::Error(message);
        }
    };
    parsed.unwrap_or_else(|e| WatchEvent::Error(format!("Malformed watch event: {}", e)))
}

#[async_trait]
impl ClusterClient for KubectlClient {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> ClusterResult<Option<ClusterObject>> {
        let command = self
            .command()
            .args(["get", kind.resource_name(), name])
            .namespace(namespace)
            .args(["-o", "json"]);

        match self.run(command).await {
            Ok(stdout) => Ok(Some(serde_json::from_str(&stdout)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> ClusterResult<Vec<ClusterObject>> {
        let mut command = self.command().args(["get", kind.resource_name()]);
        command = match namespace {
            Some(ns) => command.namespace(Some(ns)),
            None if kind.is_namespaced() => command.arg("--all-namespaces"),
            None => command,
        };
        if !selector.match_labels.is_empty() {
            command = command.arg("-l").arg(selector.render());
        }
        let stdout = self.run(command.args(["-o", "json"])).await?;
        let list: ObjectList = serde_json::from_str(&stdout)?;
        Ok(list.items)
    }

    async fn create(
        &self,
        namespace: Option<&str>,
        object: &ClusterObject,
    ) -> ClusterResult<ClusterObject> {
        let body = serde_json::to_vec(object)?;
        let command = self
            .command()
            .args(["create", "-f", "-"])
            .namespace(namespace)
            .args(["-o", "json"])
            .stdin(body);
        let stdout = self.run(command).await?;
        Ok(serde_json::from_str(&stdout)?)
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        propagation: PropagationPolicy,
    ) -> ClusterResult<bool> {
        let command = self
            .command()
            .args(["delete", kind.resource_name(), name])
            .namespace(namespace)
            .arg(format!("--cascade={}", propagation.as_cascade()))
            .arg("--wait=false");

        match self.run(command).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete_collection(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &LabelSelector,
        propagation: PropagationPolicy,
    ) -> ClusterResult<()> {
        if selector.match_labels.is_empty() {
            return Err(ClusterError::Unexpected(format!(
                "Refusing to delete all {} in namespace '{}' without a label selector",
                kind.resource_name(),
                namespace
            )));
        }
        let command = self
            .command()
            .args(["delete", kind.resource_name()])
            .namespace(Some(namespace))
            .arg("-l")
            .arg(selector.render())
            .arg(format!("--cascade={}", propagation.as_cascade()))
            .arg("--wait=false");
        self.run(command).await.map(|_| ())
    }

    async fn watch(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        target: WatchTarget,
    ) -> ClusterResult<Watch> {
        let command = self
            .command()
            .args(["get", kind.resource_name()])
            .namespace(namespace)
            .args(target_args(&target))
            .args(["--watch", "--output-watch-events", "-o", "json"]);

        let reader = Arc::new(
            tokio::task::spawn_blocking(move || command.stream())
                .await
                .map_err(|e| ClusterError::Unexpected(format!("kubectl task failed: {}", e)))??,
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let killer = reader.clone();
        let handle = WatchHandle::new(move || {
            if let Err(e) = killer.kill() {
                debug!("Failed to stop kubectl watch process: {}", e);
            }
        });

        let stream_handle = handle.clone();
        let description = format!("{} {:?}", kind, target);
        std::thread::spawn(move || {
            let events =
                serde_json::Deserializer::from_reader(&*reader).into_iter::<RawWatchEvent>();
            for raw in events {
                match raw {
                    Ok(raw) => {
                        if tx.send(convert_event(raw)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        if !stream_handle.is_closed() {
                            warn!("Watch stream for {} ended with error: {}", description, e);
                            let _ = tx.send(WatchEvent::Error(e.to_string()));
                        }
                        break;
                    }
                }
            }
        });

        Ok(Watch::new(handle, rx))
    }

    async fn logs(&self, kind: RuntimeKind, namespace: &str, name: &str) -> ClusterResult<String> {
        let target = match kind {
            RuntimeKind::Pod => format!("pod/{}", name),
            RuntimeKind::Deployment => format!("deployment/{}", name),
        };
        let command = self
            .command()
            .args(["logs", target.as_str()])
            .namespace(Some(namespace))
            .arg("--all-containers=true");
        self.run(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_global_args_from_config() {
        let client = KubectlClient::new(KubectlConfig {
            binary: "kubectl".to_string(),
            context: Some("dev".to_string()),
            kubeconfig: Some(PathBuf::from("/tmp/kubeconfig")),
        });
        assert_eq!(
            client.command().arg("version").build_args(),
            vec!["--context", "dev", "--kubeconfig", "/tmp/kubeconfig", "version"]
        );
    }

    #[test]
    fn test_target_args() {
        assert_eq!(
            target_args(&WatchTarget::Name("default".into())),
            vec!["--field-selector", "metadata.name=default"]
        );
        assert_eq!(
            target_args(&WatchTarget::Selector(LabelSelector::workspace("ws1"))),
            vec!["-l", "workspace.id=ws1"]
        );
    }

    #[test]
    fn test_convert_event() {
        let raw = RawWatchEvent {
            event_type: "MODIFIED".to_string(),
            object: json!({"kind": "Pod", "metadata": {"name": "p"}, "status": {"phase": "Running"}}),
        };
        match convert_event(raw) {
            WatchEvent::Modified(pod) => assert_eq!(pod.name(), "p"),
            other => panic!("unexpected event {:?}", other),
        }

        let error = RawWatchEvent {
            event_type: "ERROR".to_string(),
            object: json!({"kind": "Status", "message": "too old resource version"}),
        };
        assert_eq!(
            convert_event(error),
            WatchEvent::Error("too old resource version".to_string())
        );
    }
}
