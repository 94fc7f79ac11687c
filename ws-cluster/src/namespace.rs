//! Namespace resolution, preparation and cleanup.

use crate::error::ClusterError;
use crate::object::{ClusterObject, LabelSelector, PropagationPolicy, ResourceKind, WatchTarget};
use crate::registry::delete_labelled;
use crate::watch::WatchEvent;
use crate::ClusterClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use ws_core::{Result, WsError};

/// Placeholder substituted with the workspace id in namespace templates.
pub const WORKSPACE_ID_PLACEHOLDER: &str = "<workspaceid>";

pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// How long `prepare` waits for the default service account to appear.
pub const SERVICE_ACCOUNT_TIMEOUT: Duration = Duration::from_secs(60);

/// The namespace a workspace runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceNamespace {
    pub name: String,
    pub workspace_id: String,
    /// Configured by an administrator rather than generated per workspace.
    /// Predefined namespaces are never deleted by cleanup.
    pub predefined: bool,
}

/// Turns the configured namespace template into a concrete namespace.
#[derive(Debug, Clone, Default)]
pub struct NamespaceResolver {
    template: String,
}

impl NamespaceResolver {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into().trim().to_string(),
        }
    }

    pub fn resolve(&self, workspace_id: &str) -> WorkspaceNamespace {
        let (name, predefined) = if self.template.is_empty() {
            (workspace_id.to_string(), false)
        } else if self.template.contains(WORKSPACE_ID_PLACEHOLDER) {
            (
                self.template.replace(WORKSPACE_ID_PLACEHOLDER, workspace_id),
                false,
            )
        } else {
            (self.template.clone(), true)
        };
        WorkspaceNamespace {
            name,
            workspace_id: workspace_id.to_string(),
            predefined,
        }
    }
}

fn infrastructure(error: ClusterError) -> WsError {
    WsError::infrastructure(error.to_string())
}

pub struct NamespaceProvisioner {
    client: Arc<dyn ClusterClient>,
    service_account_timeout: Duration,
}

impl NamespaceProvisioner {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            client,
            service_account_timeout: SERVICE_ACCOUNT_TIMEOUT,
        }
    }

    pub fn with_service_account_timeout(mut self, timeout: Duration) -> Self {
        self.service_account_timeout = timeout;
        self
    }

    /// Make sure `name` exists and has a usable default service account.
    ///
    /// An existing namespace is left untouched. Every cluster failure is
    /// reported as [`WsError::Infrastructure`].
    #[instrument(skip(self))]
    pub async fn prepare(&self, name: &str) -> Result<()> {
        match self.client.get(ResourceKind::Namespace, None, name).await {
            Ok(Some(_)) => {
                debug!("Namespace '{}' already exists", name);
                return Ok(());
            }
            Ok(None) => {}
            // Users without cluster-wide read access get 403 for namespaces they may still create.
            Err(e) if e.is_not_found() || e.is_forbidden() => {
                debug!("Namespace '{}' lookup failed, creating it: {}", name, e)
            }
            Err(e) => return Err(infrastructure(e)),
        }

        match self
            .client
            .create(None, &ClusterObject::namespace(name))
            .await
        {
            Ok(_) => info!("Created namespace '{}'", name),
            Err(e) if e.is_already_exists() => {
                debug!("Namespace '{}' was created concurrently", name)
            }
            Err(e) => return Err(infrastructure(e)),
        }

        self.wait_default_service_account(name).await
    }

    async fn wait_default_service_account(&self, namespace: &str) -> Result<()> {
        let existing = self
            .client
            .get(ResourceKind::ServiceAccount, Some(namespace), DEFAULT_SERVICE_ACCOUNT)
            .await
            .map_err(infrastructure)?;
        if existing.is_some() {
            return Ok(());
        }

        let mut watch = self
            .client
            .watch(
                ResourceKind::ServiceAccount,
                Some(namespace),
                WatchTarget::Name(DEFAULT_SERVICE_ACCOUNT.to_string()),
            )
            .await
            .map_err(infrastructure)?;

        let added = async {
            loop {
                match watch.next().await {
                    Some(WatchEvent::Added(_)) => return Ok(()),
                    Some(WatchEvent::Error(message)) => {
                        return Err(WsError::infrastructure(format!(
                            "Waiting for service account '{}' failed: {}",
                            DEFAULT_SERVICE_ACCOUNT, message
                        )))
                    }
                    Some(_) => continue,
                    None => {
                        return Err(WsError::infrastructure(format!(
                            "Waiting for service account '{}' was interrupted",
                            DEFAULT_SERVICE_ACCOUNT
                        )))
                    }
                }
            }
        };
        let outcome = tokio::time::timeout(self.service_account_timeout, added).await;
        watch.close();

        outcome.unwrap_or_else(|_| {
            Err(WsError::infrastructure(format!(
                "Timeout reached while waiting for service account '{}' in namespace '{}'",
                DEFAULT_SERVICE_ACCOUNT, namespace
            )))
        })
    }

    /// Remove every workspace-labelled object from the namespace, then the
    /// namespace itself when it was generated for the workspace.
    ///
    /// All kinds are attempted even when earlier ones fail.
    #[instrument(skip(self), fields(namespace = %namespace.name, workspace_id = %namespace.workspace_id))]
    pub async fn cleanup(&self, namespace: &WorkspaceNamespace) -> Result<()> {
        let mut failures = delete_labelled(
            self.client.as_ref(),
            &namespace.name,
            &LabelSelector::workspace(&namespace.workspace_id),
            &ResourceKind::WORKSPACE_SCOPED,
        )
        .await;

        if !namespace.predefined {
            if let Err(e) = self
                .client
                .delete(
                    ResourceKind::Namespace,
                    None,
                    &namespace.name,
                    PropagationPolicy::Background,
                )
                .await
            {
                warn!("Failed to delete namespace '{}': {}", namespace.name, e);
                failures.push(e.to_string());
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(WsError::infrastructure(format!(
                "Error(s) occurs while cleaning up the namespace. {}",
                failures.join(" ")
            )))
        }
    }
}
