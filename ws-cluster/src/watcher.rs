//! Readiness waits for pods and deployments.
//!
//! [`RuntimeObjectWatcher::wait_for_phase`] returns a [`ReadinessFuture`]
//! straight away; the wait itself runs as a spawned task that does one `get`,
//! attaches a name-scoped watch only when the object is not already decisive,
//! and settles on the first decisive event. The watch is closed and the
//! [`WatchSlot`] released before the result is delivered, or as soon as the
//! future is dropped.

use crate::object::{ClusterObject, PodPhase, RuntimeKind, WatchTarget};
use crate::watch::{WatchEvent, WatchSlot};
use crate::ClusterClient;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, instrument};
use ws_core::{Result, WsError};

/// Outcome of a readiness wait. Resolves exactly once.
#[derive(Debug)]
pub struct ReadinessFuture {
    receiver: oneshot::Receiver<Result<()>>,
}

impl Future for ReadinessFuture {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(WsError::infrastructure(
                    "Readiness wait ended without producing a result",
                ))
            })
        })
    }
}

#[derive(Clone)]
pub struct RuntimeObjectWatcher {
    client: Arc<dyn ClusterClient>,
}

impl RuntimeObjectWatcher {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    pub fn wait_for_phase(
        &self,
        kind: RuntimeKind,
        namespace: &str,
        name: &str,
        target: PodPhase,
    ) -> ReadinessFuture {
        self.wait_for_phase_in(kind, namespace, name, target, WatchSlot::new())
    }

    /// Like [`Self::wait_for_phase`], parking the watch in `slot` so that a
    /// concurrent delete can tear it down.
    pub fn wait_for_phase_in(
        &self,
        kind: RuntimeKind,
        namespace: &str,
        name: &str,
        target: PodPhase,
        slot: WatchSlot,
    ) -> ReadinessFuture {
        let (sender, receiver) = oneshot::channel();
        let client = self.client.clone();
        let namespace = namespace.to_string();
        let name = name.to_string();

        tokio::spawn(async move {
            let mut sender = sender;
            let outcome = tokio::select! {
                result = wait(client.as_ref(), kind, &namespace, &name, target, &slot) => Some(result),
                _ = sender.closed() => None,
            };
            slot.release();
            match outcome {
                Some(result) => {
                    let _ = sender.send(result);
                }
                None => debug!("Readiness wait for {} '{}' abandoned by its caller", kind, name),
            }
        });

        ReadinessFuture { receiver }
    }
}

#[instrument(skip(client, slot))]
async fn wait(
    client: &dyn ClusterClient,
    kind: RuntimeKind,
    namespace: &str,
    name: &str,
    target: PodPhase,
    slot: &WatchSlot,
) -> Result<()> {
    let current = client
        .get(kind.resource(), Some(namespace), name)
        .await
        .map_err(WsError::from)?
        .ok_or_else(|| {
            WsError::infrastructure(format!(
                "Specified {} {} doesn't exist",
                kind.label().to_lowercase(),
                name
            ))
        })?;

    if let Some(outcome) = evaluate(client, kind, namespace, &current, target).await {
        debug!("{} '{}' settled without a watch", kind, name);
        return outcome;
    }

    let mut watch = client
        .watch(kind.resource(), Some(namespace), WatchTarget::Name(name.to_string()))
        .await
        .map_err(WsError::from)?;
    if !slot.attach(watch.handle()) {
        return Err(interrupted(kind, name));
    }

    let outcome = loop {
        match watch.next().await {
            Some(WatchEvent::Added(object)) | Some(WatchEvent::Modified(object)) => {
                if let Some(outcome) = evaluate(client, kind, namespace, &object, target).await {
                    break outcome;
                }
            }
            Some(WatchEvent::Deleted(_)) => {
                break Err(WsError::infrastructure(format!(
                    "{} '{}' was deleted while waiting for it to become {}",
                    kind,
                    name,
                    target.as_str().to_lowercase()
                )));
            }
            Some(WatchEvent::Error(message)) => {
                break Err(WsError::infrastructure(format!(
                    "Watching {} '{}' failed: {}",
                    kind.label().to_lowercase(),
                    name,
                    message
                )));
            }
            None => break Err(interrupted(kind, name)),
        }
    };
    watch.close();
    outcome
}

fn interrupted(kind: RuntimeKind, name: &str) -> WsError {
    WsError::infrastructure(format!(
        "Waiting for {} '{}' was interrupted",
        kind.label().to_lowercase(),
        name
    ))
}

/// `Some` when `object` is in a decisive phase.
async fn evaluate(
    client: &dyn ClusterClient,
    kind: RuntimeKind,
    namespace: &str,
    object: &ClusterObject,
    target: PodPhase,
) -> Option<Result<()>> {
    let (phase, reason) = kind.phase_of(object);
    if phase == target {
        return Some(Ok(()));
    }
    match phase {
        PodPhase::Succeeded if target == PodPhase::Running => Some(Err(WsError::StartupFailure(
            format!(
                "{} container has been terminated. Container must be configured to use a non-terminating command.",
                kind
            ),
        ))),
        PodPhase::Failed => {
            let message = failure_message(client, kind, namespace, object.name(), reason).await;
            Some(Err(WsError::StartupFailure(message)))
        }
        _ => None,
    }
}

/// Best-effort diagnostic: reason, then logs, then the log fetch error.
async fn failure_message(
    client: &dyn ClusterClient,
    kind: RuntimeKind,
    namespace: &str,
    name: &str,
    reason: Option<String>,
) -> String {
    let prefix = format!("{} '{}' failed to start.", kind, name);
    if let Some(reason) = reason {
        return format!("{} Reason: {}", prefix, reason);
    }
    match client.logs(kind, namespace, name).await {
        Ok(logs) if !logs.trim().is_empty() => format!("{} Pod logs: {}", prefix, logs.trim_end()),
        Ok(_) => format!("{} No reason or logs are available.", prefix),
        Err(e) => format!(
            "{} Error occurred while fetching pod logs: {}",
            prefix,
            e.message()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClusterError;
    use crate::mock::{MockCluster, MockVerb};
    use crate::object::ResourceKind;
    use serde_json::json;
    use std::time::Duration;

    const NS: &str = "ns";

    fn pod(phase: PodPhase) -> ClusterObject {
        ClusterObject::new(ResourceKind::Pod, "podName")
            .in_namespace(NS)
            .with_phase(phase)
    }

    fn setup(initial: PodPhase) -> (MockCluster, RuntimeObjectWatcher) {
        let cluster = MockCluster::new();
        cluster.insert(pod(initial));
        let watcher = RuntimeObjectWatcher::new(Arc::new(cluster.clone()));
        (cluster, watcher)
    }

    async fn until_watching(cluster: &MockCluster) {
        for _ in 0..100 {
            if cluster.open_watches() > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("watch was never attached");
    }

    async fn settle(future: ReadinessFuture) -> Result<()> {
        tokio::time::timeout(Duration::from_secs(5), future)
            .await
            .expect("readiness future did not settle")
    }

    #[tokio::test]
    async fn test_already_running_resolves_without_watch() {
        let (cluster, watcher) = setup(PodPhase::Running);

        let result = settle(watcher.wait_for_phase(RuntimeKind::Pod, NS, "podName", PodPhase::Running)).await;

        assert!(result.is_ok());
        assert_eq!(cluster.watches_opened(ResourceKind::Pod), 0);
    }

    #[tokio::test]
    async fn test_modified_running_resolves() {
        let (cluster, watcher) = setup(PodPhase::Pending);
        let future = watcher.wait_for_phase(RuntimeKind::Pod, NS, "podName", PodPhase::Running);

        until_watching(&cluster).await;
        cluster.emit(ResourceKind::Pod, WatchEvent::Modified(pod(PodPhase::Running)));

        assert!(settle(future).await.is_ok());
        assert_eq!(cluster.watches_closed(), 1);
    }

    #[tokio::test]
    async fn test_succeeded_fails_with_terminated_message() {
        let (cluster, watcher) = setup(PodPhase::Pending);
        let future = watcher.wait_for_phase(RuntimeKind::Pod, NS, "podName", PodPhase::Running);

        until_watching(&cluster).await;
        cluster.emit(ResourceKind::Pod, WatchEvent::Modified(pod(PodPhase::Succeeded)));

        let err = settle(future).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Pod container has been terminated. Container must be configured to use a non-terminating command."
        );
    }

    #[tokio::test]
    async fn test_failed_with_reason() {
        let (cluster, watcher) = setup(PodPhase::Pending);
        let future = watcher.wait_for_phase(RuntimeKind::Pod, NS, "podName", PodPhase::Running);

        until_watching(&cluster).await;
        let evicted = pod(PodPhase::Pending).with_status(json!({"phase": "Failed", "reason": "Evicted"}));
        cluster.emit(ResourceKind::Pod, WatchEvent::Modified(evicted));

        let err = settle(future).await.unwrap_err();
        assert!(matches!(err, WsError::StartupFailure(_)));
        assert_eq!(err.to_string(), "Pod 'podName' failed to start. Reason: Evicted");
        assert_eq!(cluster.calls(MockVerb::Logs, ResourceKind::Pod), 0);
    }

    #[tokio::test]
    async fn test_failed_without_reason_reports_logs() {
        let (cluster, watcher) = setup(PodPhase::Pending);
        cluster.set_logs("podName", "Pod fail log\n");
        let future = watcher.wait_for_phase(RuntimeKind::Pod, NS, "podName", PodPhase::Running);

        until_watching(&cluster).await;
        cluster.emit(ResourceKind::Pod, WatchEvent::Modified(pod(PodPhase::Failed)));

        let err = settle(future).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Pod 'podName' failed to start. Pod logs: Pod fail log"
        );
    }

    #[tokio::test]
    async fn test_failed_when_log_fetch_errors() {
        let (cluster, watcher) = setup(PodPhase::Pending);
        cluster.fail_logs(
            "podName",
            ClusterError::Unexpected("Unable to create client".into()),
        );
        let future = watcher.wait_for_phase(RuntimeKind::Pod, NS, "podName", PodPhase::Running);

        until_watching(&cluster).await;
        cluster.emit(ResourceKind::Pod, WatchEvent::Modified(pod(PodPhase::Failed)));

        let err = settle(future).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Pod 'podName' failed to start. Error occurred while fetching pod logs: Unable to create client"
        );
    }

    #[tokio::test]
    async fn test_failed_without_reason_or_logs() {
        let (cluster, watcher) = setup(PodPhase::Failed);

        let err = settle(watcher.wait_for_phase(RuntimeKind::Pod, NS, "podName", PodPhase::Running))
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Pod 'podName' failed to start. No reason or logs are available."
        );
        assert_eq!(cluster.watches_opened(ResourceKind::Pod), 0);
    }

    #[tokio::test]
    async fn test_channel_close_is_infrastructure_error() {
        let (cluster, watcher) = setup(PodPhase::Pending);
        let future = watcher.wait_for_phase(RuntimeKind::Pod, NS, "podName", PodPhase::Running);

        until_watching(&cluster).await;
        cluster.disconnect_watches(ResourceKind::Pod);

        let err = settle(future).await.unwrap_err();
        assert!(matches!(err, WsError::Infrastructure(_)));
        assert_eq!(err.to_string(), "Waiting for pod 'podName' was interrupted");
        assert_eq!(cluster.watches_closed(), 1);
    }

    #[tokio::test]
    async fn test_events_after_resolution_are_ignored() {
        let (cluster, watcher) = setup(PodPhase::Pending);
        let future = watcher.wait_for_phase(RuntimeKind::Pod, NS, "podName", PodPhase::Running);

        until_watching(&cluster).await;
        cluster.emit(ResourceKind::Pod, WatchEvent::Modified(pod(PodPhase::Running)));
        assert!(settle(future).await.is_ok());

        cluster.emit(ResourceKind::Pod, WatchEvent::Modified(pod(PodPhase::Failed)));
        assert_eq!(cluster.open_watches(), 0);
        assert_eq!(cluster.watches_closed(), 1);
        assert_eq!(cluster.calls(MockVerb::Logs, ResourceKind::Pod), 0);
    }

    #[tokio::test]
    async fn test_released_slot_interrupts_wait() {
        let (cluster, watcher) = setup(PodPhase::Pending);
        let slot = WatchSlot::new();
        let future = watcher.wait_for_phase_in(
            RuntimeKind::Pod,
            NS,
            "podName",
            PodPhase::Running,
            slot.clone(),
        );

        until_watching(&cluster).await;
        slot.release();

        let err = settle(future).await.unwrap_err();
        assert_eq!(err.to_string(), "Waiting for pod 'podName' was interrupted");
        assert_eq!(cluster.watches_closed(), 1);
    }

    #[tokio::test]
    async fn test_dropping_future_closes_watch() {
        let (cluster, watcher) = setup(PodPhase::Pending);
        let future = watcher.wait_for_phase(RuntimeKind::Pod, NS, "podName", PodPhase::Running);

        until_watching(&cluster).await;
        drop(future);

        for _ in 0..100 {
            if cluster.open_watches() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cluster.open_watches(), 0);
        assert_eq!(cluster.watches_closed(), 1);
    }

    #[tokio::test]
    async fn test_missing_object_fails() {
        let cluster = MockCluster::new();
        let watcher = RuntimeObjectWatcher::new(Arc::new(cluster));

        let err = settle(watcher.wait_for_phase(RuntimeKind::Pod, NS, "ghost", PodPhase::Running))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Specified pod ghost doesn't exist");
    }

    #[tokio::test]
    async fn test_deployment_waits_for_available_condition() {
        let cluster = MockCluster::new();
        let deployment = ClusterObject::new(ResourceKind::Deployment, "ide").in_namespace(NS);
        cluster.insert(deployment.clone());
        let watcher = RuntimeObjectWatcher::new(Arc::new(cluster.clone()));

        let future = watcher.wait_for_phase(RuntimeKind::Deployment, NS, "ide", PodPhase::Running);
        until_watching(&cluster).await;
        cluster.emit(
            ResourceKind::Deployment,
            WatchEvent::Modified(deployment.with_status(json!({
                "conditions": [{"type": "Available", "status": "True"}]
            }))),
        );

        assert!(settle(future).await.is_ok());
    }
}
