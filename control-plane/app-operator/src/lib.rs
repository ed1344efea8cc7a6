pub mod config;
pub mod controller;
pub mod crd;
pub mod diff;
pub mod runtime;
pub mod store;
pub mod templates;
pub mod web;

use tracing_subscriber::EnvFilter;

/// `RUST_LOG` when set; otherwise `level` for everything except the kube
/// watcher and HTTP stack, which stay at warn.
pub fn log_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(format!("{level},kube_runtime=warn,hyper=warn,tower=warn"))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

pub fn init_tracing(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(level))
        .with_target(true)
        .try_init();
}
