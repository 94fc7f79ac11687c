use serde::Deserialize;
use std::path::PathBuf;
use ws_activity::ExpirationPolicy;
use ws_cluster::KubectlConfig;

/// Where activity records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_store")]
    pub store: StoreBackend,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: i64,

    #[serde(default = "default_run_timeout")]
    pub run_timeout_ms: i64,

    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    #[serde(default = "default_check_initial_delay")]
    pub check_initial_delay_secs: u64,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    #[serde(default = "default_cleanup_initial_delay")]
    pub cleanup_initial_delay_secs: u64,

    #[serde(default = "default_expiration_grace")]
    pub expiration_grace_ms: i64,

    #[serde(default = "default_kubectl")]
    pub kubectl: String,

    #[serde(default = "default_kube_context")]
    pub kube_context: Option<String>,

    #[serde(default = "default_kubeconfig")]
    pub kubeconfig: Option<PathBuf>,

    #[serde(default = "default_namespace_template")]
    pub namespace_template: String,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn default_bind_addr() -> String {
    std::env::var("WS_API_BIND").unwrap_or_else(|_| "0.0.0.0:3121".to_string())
}

fn default_store() -> StoreBackend {
    match std::env::var("WS_API_STORE").as_deref() {
        Ok("memory") => StoreBackend::Memory,
        _ => StoreBackend::Sqlite,
    }
}

fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("WS_API_DB_PATH") {
        return PathBuf::from(path);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ws")
        .join("api")
        .join("activity.db")
}

fn default_idle_timeout() -> i64 {
    env_parse("WS_IDLE_TIMEOUT_MS", 1_800_000) // 30 minutes
}

fn default_run_timeout() -> i64 {
    env_parse("WS_RUN_TIMEOUT_MS", 0)
}

fn default_check_interval() -> u64 {
    env_parse("WS_ACTIVITY_CHECK_INTERVAL_SECS", 60)
}

fn default_check_initial_delay() -> u64 {
    env_parse("WS_ACTIVITY_CHECK_INITIAL_DELAY_SECS", 60)
}

fn default_cleanup_interval() -> u64 {
    env_parse("WS_ACTIVITY_CLEANUP_INTERVAL_SECS", 3600)
}

fn default_cleanup_initial_delay() -> u64 {
    env_parse("WS_ACTIVITY_CLEANUP_INITIAL_DELAY_SECS", 60)
}

fn default_expiration_grace() -> i64 {
    env_parse("WS_EXPIRATION_GRACE_MS", 1_000)
}

fn default_kubectl() -> String {
    std::env::var("WS_KUBECTL").unwrap_or_else(|_| "kubectl".to_string())
}

fn default_kube_context() -> Option<String> {
    env_opt("WS_KUBE_CONTEXT")
}

fn default_kubeconfig() -> Option<PathBuf> {
    env_opt("KUBECONFIG").map(PathBuf::from)
}

fn default_namespace_template() -> String {
    std::env::var("WS_NAMESPACE").unwrap_or_default()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            store: default_store(),
            db_path: default_db_path(),
            idle_timeout_ms: default_idle_timeout(),
            run_timeout_ms: default_run_timeout(),
            check_interval_secs: default_check_interval(),
            check_initial_delay_secs: default_check_initial_delay(),
            cleanup_interval_secs: default_cleanup_interval(),
            cleanup_initial_delay_secs: default_cleanup_initial_delay(),
            expiration_grace_ms: default_expiration_grace(),
            kubectl: default_kubectl(),
            kube_context: default_kube_context(),
            kubeconfig: default_kubeconfig(),
            namespace_template: default_namespace_template(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::new(self.idle_timeout_ms, self.run_timeout_ms)
    }

    pub fn kubectl_config(&self) -> KubectlConfig {
        KubectlConfig {
            binary: self.kubectl.clone(),
            context: self.kube_context.clone(),
            kubeconfig: self.kubeconfig.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{"store": "memory", "idle_timeout_ms": 0}"#).unwrap();
        assert_eq!(config.store, StoreBackend::Memory);
        assert!(!config.policy().idle_enabled());
        assert!(config.cleanup_interval_secs > 0);
    }

    #[test]
    fn test_kubectl_config_carries_context() {
        let config = Config {
            kubectl: "/usr/local/bin/kubectl".into(),
            kube_context: Some("dev".into()),
            ..Config::default()
        };
        let kubectl = config.kubectl_config();
        assert_eq!(kubectl.binary, "/usr/local/bin/kubectl");
        assert_eq!(kubectl.context.as_deref(), Some("dev"));
    }
}
