//! Tracing initialization for the service
//!
//! `RUST_LOG` overrides the default filter; `RUST_LOG_FORMAT` picks the
//! output format (`json`, `compact`, or `pretty` by default).

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use ws_core::{Result, WsError};

pub const DEFAULT_FILTER: &str = "ws_api=debug,ws_activity=info,ws_cluster=info,tower_http=info";

pub fn init() -> Result<()> {
    init_with_defaults(DEFAULT_FILTER)
}

pub fn init_with_defaults(default_filter: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format.as_str() {
        "json" => registry.with(fmt::layer().with_ansi(false).json()).try_init(),
        "compact" => registry.with(fmt::layer().compact()).try_init(),
        _ => registry.with(fmt::layer().pretty()).try_init(),
    };

    result.map_err(|e| WsError::Internal(format!("Failed to initialize tracing: {}", e)))
}
