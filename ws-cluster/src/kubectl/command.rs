//! `kubectl` command builder.
//!
//! Centralises argument assembly (context, kubeconfig, namespace) and the
//! translation of `Error from server (...)` lines into typed errors.

use crate::error::{ClusterError, ClusterResult};
use tracing::debug;
use ws_core::command_stream::{run_command, spawn_reader};

/// Builder for a single `kubectl` invocation.
#[derive(Debug, Clone)]
pub struct KubectlCommand {
    binary: String,
    global_args: Vec<String>,
    args: Vec<String>,
    stdin: Option<Vec<u8>>,
}

impl KubectlCommand {
    pub fn new(binary: &str, global_args: &[String]) -> Self {
        Self {
            binary: binary.to_string(),
            global_args: global_args.to_vec(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add `-n <namespace>` when a namespace is given.
    pub fn namespace(self, namespace: Option<&str>) -> Self {
        match namespace {
            Some(ns) => self.arg("-n").arg(ns),
            None => self,
        }
    }

    pub fn stdin(mut self, bytes: Vec<u8>) -> Self {
        self.stdin = Some(bytes);
        self
    }

    pub fn build_args(&self) -> Vec<String> {
        self.global_args
            .iter()
            .chain(self.args.iter())
            .cloned()
            .collect()
    }

    /// Run to completion and return stdout, or the classified error.
    pub fn output(self) -> ClusterResult<String> {
        let args = self.build_args();
        let output = run_command(&self.binary, &args, self.stdin)
            .map_err(|e| ClusterError::Transport(e.to_string()))?;

        if output.success {
            Ok(output.stdout)
        } else {
            debug!(
                "kubectl {} failed with {:?}: {}",
                args.join(" "),
                output.code,
                output.stderr
            );
            Err(classify_error(&output.stderr))
        }
    }

    /// Start the command and return a reader over its stdout.
    pub fn stream(self) -> ClusterResult<duct::ReaderHandle> {
        let args = self.build_args();
        spawn_reader(&self.binary, &args).map_err(|e| ClusterError::Transport(e.to_string()))
    }
}

/// Map `kubectl` stderr to a [`ClusterError`].
pub fn classify_error(stderr: &str) -> ClusterError {
    let message = stderr.trim().to_string();
    if message.contains("(NotFound)") {
        ClusterError::NotFound(message)
    } else if message.contains("(Forbidden)") {
        ClusterError::Forbidden(message)
    } else if message.contains("(AlreadyExists)") {
        ClusterError::AlreadyExists(message)
    } else if message.contains("Error from server") {
        ClusterError::Api(message)
    } else if message.is_empty() {
        ClusterError::Transport("kubectl exited without output".to_string())
    } else {
        ClusterError::Transport(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args_prepends_global_args() {
        let global = vec!["--context".to_string(), "dev".to_string()];
        let command = KubectlCommand::new("kubectl", &global)
            .arg("get")
            .arg("pods")
            .namespace(Some("ns1"));

        assert_eq!(
            command.build_args(),
            vec!["--context", "dev", "get", "pods", "-n", "ns1"]
        );
    }

    #[test]
    fn test_namespace_none_adds_nothing() {
        let command = KubectlCommand::new("kubectl", &[]).arg("get").namespace(None);
        assert_eq!(command.build_args(), vec!["get"]);
    }

    #[test]
    fn test_classify_error() {
        assert!(classify_error(
            "Error from server (NotFound): pods \"podName\" not found"
        )
        .is_not_found());
        assert!(classify_error(
            "Error from server (Forbidden): namespaces \"testNamespace\" is forbidden"
        )
        .is_forbidden());
        assert!(classify_error(
            "Error from server (AlreadyExists): namespaces \"ns\" already exists"
        )
        .is_already_exists());
        assert!(matches!(
            classify_error("Error from server (InternalError): boom"),
            ClusterError::Api(_)
        ));
        assert!(matches!(
            classify_error("Unable to connect to the server: dial tcp"),
            ClusterError::Transport(_)
        ));
    }
}
