use std::time::Duration;

use envconfig::Envconfig;

use crate::controller::retry::RetryPolicy;
use crate::diff::MergePolicy;

#[derive(Envconfig, Clone, Debug)]
pub struct OperatorConfig {
    /// mutate | annotation
    /// Env: APP_OPERATOR_MERGE_POLICY
    #[envconfig(from = "APP_OPERATOR_MERGE_POLICY", default = "mutate")]
    pub merge_policy: String,

    /// Restrict all watches to one namespace; unset watches the whole cluster.
    #[envconfig(from = "APP_OPERATOR_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    #[envconfig(from = "APP_OPERATOR_SERVICE_TYPE", default = "NodePort")]
    pub service_type: String,

    #[envconfig(from = "APP_OPERATOR_RESYNC_SECS", default = "300")]
    pub resync_secs: u64,

    #[envconfig(from = "APP_OPERATOR_ERROR_REQUEUE_SECS", default = "30")]
    pub error_requeue_secs: u64,

    #[envconfig(from = "APP_OPERATOR_EVENTS", default = "true")]
    pub events: bool,

    #[envconfig(from = "APP_OPERATOR_MIRROR_STATUS", default = "true")]
    pub mirror_status: bool,

    #[envconfig(from = "HTTP_PORT", default = "8081")]
    pub http_port: u16,

    #[envconfig(nested)]
    pub retry: RetryConfig,
}

#[derive(Envconfig, Clone, Debug)]
pub struct RetryConfig {
    /// Total write attempts per object before a conflict is surfaced.
    #[envconfig(from = "APP_OPERATOR_CONFLICT_MAX_ATTEMPTS", default = "5")]
    pub max_attempts: u32,
    #[envconfig(from = "APP_OPERATOR_CONFLICT_BASE_DELAY_MS", default = "10")]
    pub base_delay_ms: u64,
    #[envconfig(from = "APP_OPERATOR_CONFLICT_MAX_DELAY_MS", default = "1000")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 10,
            max_delay_ms: 1000,
        }
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            merge_policy: "mutate".into(),
            watch_namespace: None,
            service_type: "NodePort".into(),
            resync_secs: 300,
            error_requeue_secs: 30,
            events: true,
            mirror_status: true,
            http_port: 8081,
            retry: RetryConfig::default(),
        }
    }
}

impl OperatorConfig {
    pub fn policy(&self) -> MergePolicy {
        MergePolicy::from_str(&self.merge_policy)
    }

    /// Empty strings from the environment mean "not set".
    pub fn watch_namespace(&self) -> Option<&str> {
        self.watch_namespace
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(
                self.retry.max_delay_ms.max(self.retry.base_delay_ms),
            ),
        }
    }
}
