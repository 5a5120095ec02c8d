//! Pod lifecycle waiting
//!
//! Three independent waits, each bounded by its own [`WaitClock`]:
//!
//! - [`PodLifecycleWaiter::resolve_pod`] polls a label selector until a pod
//!   exists (`PodAllocationTimeout` otherwise)
//! - [`PodLifecycleWaiter::run_when_running`] polls the pod phase and runs an
//!   action once the pod is Running (`PodFailed` / `PendingTimeout`)
//! - [`PodLifecycleWaiter::stream_logs`] follows the pod log, failing with
//!   `LogStreamTimeout` once the stream has been open too long
//!
//! Waits are polling, not watching: transient phases between two polls may
//! never be observed. All sleeps race a [`CancellationToken`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{KubeApi, PodHandle, PodPhase};
use crate::clock::WaitClock;
use crate::{Error, DEFAULT_DISCOVERY_INTERVAL, DEFAULT_PHASE_INTERVAL};

/// Decoded log lines of a followed pod
pub type LogStream = BoxStream<'static, Result<String, Error>>;

/// Label selector of the driver pod the Spark operator creates per application
pub const SPARK_DRIVER_SELECTOR: &str = "spark-role=driver,sparkoperator.k8s.io/app-name";

/// Severity markers used when no filter is configured
pub const DEFAULT_LOG_LEVELS: &[&str] = &["WARNING", "ERROR"];

/// Namespace and label selector identifying one pod
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodQuery {
    /// Namespace to search
    pub namespace: String,
    /// Label selector to match
    pub label_selector: String,
}

impl PodQuery {
    /// Create a new query
    pub fn new(namespace: impl Into<String>, label_selector: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            label_selector: label_selector.into(),
        }
    }

    /// Query for the driver pod of a SparkApplication
    pub fn spark_driver(namespace: impl Into<String>, application_name: &str) -> Self {
        Self::new(
            namespace,
            format!("{}={}", SPARK_DRIVER_SELECTOR, application_name),
        )
    }
}

/// Sleep intervals between polls
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollIntervals {
    /// Between pod list calls while waiting for allocation
    pub discovery: Duration,
    /// Between phase reads while waiting for Running
    pub phase: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            discovery: DEFAULT_DISCOVERY_INTERVAL,
            phase: DEFAULT_PHASE_INTERVAL,
        }
    }
}

/// Polls pod discovery and phase through the API port
#[derive(Clone)]
pub struct PodLifecycleWaiter {
    api: Arc<dyn KubeApi>,
    intervals: PollIntervals,
    cancel: CancellationToken,
}

impl PodLifecycleWaiter {
    /// Create a waiter with default intervals
    pub fn new(api: Arc<dyn KubeApi>) -> Self {
        Self {
            api,
            intervals: PollIntervals::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Override the poll intervals
    pub fn with_intervals(mut self, intervals: PollIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that interrupts every sleep of this waiter
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Configured poll intervals
    pub fn intervals(&self) -> PollIntervals {
        self.intervals
    }

    async fn sleep(&self, interval: Duration, operation: &str) -> Result<(), Error> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::cancelled(operation)),
            _ = tokio::time::sleep(interval) => Ok(()),
        }
    }

    /// Poll until a pod matches `query`, returning the first match.
    pub async fn resolve_pod(&self, query: &PodQuery, timeout: Duration) -> Result<PodHandle, Error> {
        let clock = WaitClock::start(timeout);

        loop {
            let pods = self
                .api
                .list_pods(&query.namespace, &query.label_selector)
                .await?;

            if let Some(pod) = pods.into_iter().next() {
                info!(
                    pod = %pod.name,
                    namespace = %pod.namespace,
                    elapsed_secs = clock.elapsed().as_secs_f64(),
                    "pod was allocated"
                );
                return Ok(pod);
            }

            debug!(
                namespace = %query.namespace,
                selector = %query.label_selector,
                "no pod yet"
            );
            self.sleep(self.intervals.discovery, "pod allocation wait")
                .await?;

            if clock.is_expired() {
                return Err(Error::PodAllocationTimeout {
                    namespace: query.namespace.clone(),
                    label_selector: query.label_selector.clone(),
                    elapsed: clock.elapsed(),
                });
            }
        }
    }

    /// Read the pod's current phase
    pub async fn pod_phase(&self, pod: &PodHandle) -> Result<PodPhase, Error> {
        self.api.read_pod_phase(&pod.name, &pod.namespace).await
    }

    /// Wait for `pod` to reach Running, then run `action` once.
    ///
    /// Returns `Ok(None)` without running the action when the pod is found in
    /// a terminal non-failed phase (Succeeded, Unknown or anything else): the
    /// job is already done.
    pub async fn run_when_running<F, Fut, T>(
        &self,
        pod: &PodHandle,
        pending_timeout: Duration,
        action: F,
    ) -> Result<Option<T>, Error>
    where
        F: FnOnce(PodHandle) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let clock = WaitClock::start(pending_timeout);
        info!(pod = %pod.name, namespace = %pod.namespace, "waiting for pod to run");

        loop {
            // The interval runs before the first phase read, so a pod that is
            // already Running still waits one interval. Unclear whether that
            // was intended; kept as is.
            self.sleep(self.intervals.phase, "pod pending wait").await?;

            match self.pod_phase(pod).await? {
                PodPhase::Running => {
                    info!(pod = %pod.name, "pod is running...");
                    return action(pod.clone()).await.map(Some);
                }
                PodPhase::Failed => {
                    return Err(Error::pod_failed(&pod.namespace, &pod.name));
                }
                PodPhase::Pending => {
                    info!(pod = %pod.name, "pending...");
                }
                phase => {
                    info!(pod = %pod.name, phase = %phase, "job has done");
                    return Ok(None);
                }
            }

            if clock.is_expired() {
                return Err(Error::PendingTimeout {
                    namespace: pod.namespace.clone(),
                    pod: pod.name.clone(),
                    elapsed: clock.elapsed(),
                });
            }
        }
    }

    /// Follow the log of `pod` as a lazy stream of decoded lines.
    ///
    /// The elapsed time is checked on every pulled chunk; past `timeout` the
    /// stream yields `LogStreamTimeout` and ends, even if more data is
    /// available.
    pub async fn stream_logs(&self, pod: &PodHandle, timeout: Duration) -> Result<LogStream, Error> {
        let clock = WaitClock::start(timeout);
        let chunks = self.api.read_pod_log(&pod.name, &pod.namespace).await?;

        let stream = futures::stream::try_unfold(
            (chunks, clock, pod.clone()),
            |(mut chunks, clock, pod)| async move {
                let Some(chunk) = chunks.next().await else {
                    return Ok(None);
                };
                let chunk = chunk?;

                if clock.is_expired() {
                    return Err(Error::LogStreamTimeout {
                        namespace: pod.namespace.clone(),
                        pod: pod.name.clone(),
                        elapsed: clock.elapsed(),
                    });
                }

                let line = String::from_utf8(chunk)
                    .map_err(|e| Error::log_stream(&pod.namespace, &pod.name, e.to_string()))?;
                let line = line.trim_end_matches(['\r', '\n']).to_string();
                Ok(Some((line, (chunks, clock, pod))))
            },
        );
        Ok(stream.boxed())
    }

    /// Wait for Running and then follow the pod log.
    ///
    /// `Ok(None)` means the pod had already finished.
    pub async fn follow_running_logs(
        &self,
        pod: &PodHandle,
        pending_timeout: Duration,
        log_timeout: Duration,
    ) -> Result<Option<LogStream>, Error> {
        self.run_when_running(pod, pending_timeout, |pod| async move {
            self.stream_logs(&pod, log_timeout).await
        })
        .await
    }
}

/// Keeps log lines that carry one of the configured severity markers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogFilter {
    markers: Vec<String>,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_LEVELS.iter().copied())
    }
}

impl LogFilter {
    /// Filter on the given markers; an empty set keeps every line
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `line` should be shown
    pub fn matches(&self, line: &str) -> bool {
        self.markers.is_empty() || self.markers.iter().any(|m| line.contains(m.as_str()))
    }
}
