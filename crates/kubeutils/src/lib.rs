//! Kubernetes helpers for batch jobs: secret fetching, pod lifecycle
//! waiting and SparkApplication submission

#![deny(missing_docs)]

use std::time::Duration;

pub mod api;
pub mod application;
pub mod client;
pub mod clock;
pub mod env;
pub mod error;
#[cfg(any(test, feature = "fake"))]
pub mod fake;
pub mod kube_utils;
pub mod lifecycle;
pub mod naming;
pub mod secrets;

pub use api::{KubeApi, KubeApiClient, PodHandle, PodPhase, SecretPayload};
pub use application::SparkApplication;
pub use env::{EnvironmentSink, MemoryEnvironment, ProcessEnvironment};
pub use error::Error;
pub use kube_utils::KubeUtils;
pub use lifecycle::{LogFilter, LogStream, PodLifecycleWaiter, PodQuery, PollIntervals};
pub use secrets::{FetchMode, SecretFetcher, SecretMap, SecretRequest, SecretRequestSpace, SecretResult};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Logged when secrets are fetched without credentials loaded by `connect`
pub const CONFIG_WARN: &str =
    "config is not loaded using on-system default, build KubeUtils with connect()";

/// Namespace secrets are read from when none is given
pub const DEFAULT_SECRET_NAMESPACE: &str = "prefect";

/// Sleep between pod list calls while waiting for allocation
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(5);

/// Sleep before each phase read while waiting for Running
pub const DEFAULT_PHASE_INTERVAL: Duration = Duration::from_secs(30);

/// How long a pod may take to be allocated (3 hours)
pub const DEFAULT_ALLOCATION_TIMEOUT: Duration = Duration::from_secs(10_800);

/// How long a pod may stay out of Running (1 hour)
pub const DEFAULT_PENDING_TIMEOUT: Duration = Duration::from_secs(3_600);

/// How long a log stream may stay open (1 hour)
pub const DEFAULT_LOG_TIMEOUT: Duration = Duration::from_secs(3_600);
