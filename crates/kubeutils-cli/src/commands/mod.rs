//! CLI commands

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, ValueEnum};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use kubeutils::{
    KubeUtils, LogFilter, PodHandle, PodLifecycleWaiter, PodQuery, ProcessEnvironment,
    DEFAULT_ALLOCATION_TIMEOUT, DEFAULT_LOG_TIMEOUT, DEFAULT_PENDING_TIMEOUT,
};

use crate::Result;

pub mod pod;
pub mod secrets;
pub mod spark;

/// Shared state for every command
#[derive(Debug, Clone)]
pub struct Context {
    kubeconfig: Option<PathBuf>,
    cancel: CancellationToken,
}

impl Context {
    /// Create a context
    pub fn new(kubeconfig: Option<PathBuf>, cancel: CancellationToken) -> Self {
        Self { kubeconfig, cancel }
    }

    /// Connect to the cluster. Fetched secrets are published into this
    /// process's environment.
    pub async fn connect(&self) -> Result<KubeUtils> {
        let utils =
            KubeUtils::connect_with(self.kubeconfig.as_deref(), Arc::new(ProcessEnvironment))
                .await?;
        Ok(utils.with_cancellation(self.cancel.clone()))
    }
}

/// Output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Columnar table (default)
    #[default]
    Table,
    /// JSON
    Json,
}

/// Timeouts and log filtering for following a pod to completion
#[derive(Args, Debug, Clone)]
pub struct WaitArgs {
    /// Seconds to wait for the pod to be allocated
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_ALLOCATION_TIMEOUT.as_secs())]
    pub allocation_timeout: u64,

    /// Seconds the pod may stay out of Running
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_PENDING_TIMEOUT.as_secs())]
    pub pending_timeout: u64,

    /// Seconds the log stream may stay open
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_LOG_TIMEOUT.as_secs())]
    pub log_timeout: u64,

    /// Only print log lines containing one of these markers
    #[arg(long, value_delimiter = ',', default_values_t = ["WARNING".to_string(), "ERROR".to_string()])]
    pub levels: Vec<String>,

    /// Print every log line
    #[arg(long, conflicts_with = "levels")]
    pub all_levels: bool,
}

impl WaitArgs {
    /// Log filter selected by the flags
    pub fn filter(&self) -> LogFilter {
        if self.all_levels {
            LogFilter::new(Vec::<String>::new())
        } else {
            LogFilter::new(self.levels.iter().cloned())
        }
    }
}

/// Resolve the pod for `query`, wait until it runs and pass every filtered
/// log line to `emit`. Returns the followed pod.
pub async fn follow_pod<F>(
    waiter: &PodLifecycleWaiter,
    query: &PodQuery,
    args: &WaitArgs,
    mut emit: F,
) -> Result<PodHandle>
where
    F: FnMut(&str),
{
    let pod = waiter
        .resolve_pod(query, Duration::from_secs(args.allocation_timeout))
        .await?;

    let logs = waiter
        .follow_running_logs(
            &pod,
            Duration::from_secs(args.pending_timeout),
            Duration::from_secs(args.log_timeout),
        )
        .await?;

    let Some(mut logs) = logs else {
        info!(pod = %pod, "pod already finished, no logs to follow");
        return Ok(pod);
    };

    let filter = args.filter();
    while let Some(line) = logs.next().await {
        let line = line?;
        if filter.matches(&line) {
            emit(&line);
        }
    }
    info!(pod = %pod, "log stream ended");
    Ok(pod)
}
