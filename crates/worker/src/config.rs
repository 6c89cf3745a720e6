use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use plangen_core::billing::BillingRates;
use plangen_core::cancellation::CancellationConfig;
use plangen_core::retry::RetryPolicy;
use plangen_core::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    /// Identifies this process in `worker_heartbeats` and `tasks.claimed_by`.
    pub worker_id: String,
    /// Parent of the per-task working directories.
    pub run_dir: PathBuf,
    /// Sleep after processing a task.
    pub poll_busy: Duration,
    /// Sleep when the queue is empty or a claim failed.
    pub poll_idle: Duration,
    pub heartbeat_interval: Duration,
    pub cancellation: CancellationConfig,
    pub progress_retry: RetryPolicy,
    pub billing: BillingRates,
    pub pipeline_command: String,
    pub pipeline_args: Vec<String>,
    pub notify_webhook_url: Option<String>,
    /// Where a finished report can be fetched; `{task_id}` is substituted.
    pub report_url_template: String,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                      |
    /// |----------------------------|------------------------------|
    /// | `DATABASE_URL`             | required                     |
    /// | `DB_MAX_CONNECTIONS`       | `5`                          |
    /// | `WORKER_ID`                | `<hostname>-<uuid v7>`       |
    /// | `RUN_DIR`                  | `./run`                      |
    /// | `POLL_BUSY_SECS`           | `1`                          |
    /// | `POLL_IDLE_SECS`           | `5`                          |
    /// | `HEARTBEAT_INTERVAL_SECS`  | `60`                         |
    /// | `INACTIVITY_TIMEOUT_SECS`  | `80`                         |
    /// | `INACTIVITY_ABORT_ENABLED` | `true`                       |
    /// | `PROGRESS_RETRY_ATTEMPTS`  | `3`                          |
    /// | `PROGRESS_RETRY_DELAY_MS`  | `1000`                       |
    /// | `CREDIT_PRICE_USD`         | `0.10`                       |
    /// | `SUCCESS_FEE_USD`          | `1.00`                       |
    /// | `PIPELINE_COMMAND`         | required                     |
    /// | `PIPELINE_ARGS`            | empty (whitespace separated) |
    /// | `NOTIFY_WEBHOOK_URL`       | unset                        |
    /// | `REPORT_URL_TEMPLATE`      | `/tasks/{task_id}/report`    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let database_url = env.required("DATABASE_URL")?;
        let db_max_connections = env.parse_or("DB_MAX_CONNECTIONS", 5u32)?;

        let worker_id = env.get("WORKER_ID").unwrap_or_else(default_worker_id);
        let run_dir = PathBuf::from(env.get("RUN_DIR").unwrap_or_else(|| "./run".into()));

        let poll_busy = Duration::from_secs(env.parse_or("POLL_BUSY_SECS", 1u64)?);
        let poll_idle = Duration::from_secs(env.parse_or("POLL_IDLE_SECS", 5u64)?);
        let heartbeat_interval =
            Duration::from_secs(env.parse_or("HEARTBEAT_INTERVAL_SECS", 60u64)?);

        let cancellation = CancellationConfig {
            inactivity_timeout: Duration::from_secs(env.parse_or("INACTIVITY_TIMEOUT_SECS", 80u64)?),
            inactivity_abort_enabled: env.parse_or("INACTIVITY_ABORT_ENABLED", true)?,
        };

        let progress_retry = RetryPolicy {
            max_attempts: env.parse_or("PROGRESS_RETRY_ATTEMPTS", 3u32)?,
            delay: Duration::from_millis(env.parse_or("PROGRESS_RETRY_DELAY_MS", 1000u64)?),
        };

        let credit_price = env.parse_or("CREDIT_PRICE_USD", 0.10f64)?;
        let success_fee = env.parse_or("SUCCESS_FEE_USD", 1.00f64)?;
        let billing = BillingRates::from_usd(credit_price, success_fee).map_err(|e| {
            let (var, value) = if BillingRates::from_usd(credit_price, 0.0).is_ok() {
                ("SUCCESS_FEE_USD", success_fee)
            } else {
                ("CREDIT_PRICE_USD", credit_price)
            };
            ConfigError::Invalid {
                var,
                value: value.to_string(),
                reason: e.to_string(),
            }
        })?;

        let pipeline_command = env.required("PIPELINE_COMMAND")?;
        let pipeline_args = env
            .get("PIPELINE_ARGS")
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let notify_webhook_url = env.get("NOTIFY_WEBHOOK_URL").filter(|s| !s.trim().is_empty());
        let report_url_template = env
            .get("REPORT_URL_TEMPLATE")
            .unwrap_or_else(|| "/tasks/{task_id}/report".into());

        Ok(Self {
            database_url,
            db_max_connections,
            worker_id,
            run_dir,
            poll_busy,
            poll_idle,
            heartbeat_interval,
            cancellation,
            progress_retry,
            billing,
            pipeline_command,
            pipeline_args,
            notify_webhook_url,
            report_url_template,
        })
    }
}

/// The report location announced to a task's owner.
pub fn render_report_url(template: &str, task_id: DbId) -> String {
    template.replace("{task_id}", &task_id.to_string())
}

fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".into());
    format!("{host}-{}", uuid::Uuid::now_v7())
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(key))
    }

    fn parse_or<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var: key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }
}
