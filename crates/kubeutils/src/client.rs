//! Kubernetes client construction
//!
//! In-cluster service account credentials are tried first, then the local
//! kubeconfig. An explicit kubeconfig path skips the in-cluster attempt.
//!
//! Followed pod logs can stay silent for longer than any sensible read
//! timeout, so [`create_api_client`] streams them over a second client
//! built from the same credentials with no read timeout.

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info};

use crate::api::KubeApiClient;
use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default read timeout for kube clients (not applied to followed logs)
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the client credentials came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    /// Service account of the pod we run in
    InCluster,
    /// Local kubeconfig (`KUBECONFIG` or `~/.kube/config`)
    Kubeconfig,
    /// Kubeconfig at an explicit path
    Path,
}

/// Create a kube client with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<(Client, ConfigSource), Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<(Client, ConfigSource), Error> {
    info!("download k8s config");
    let (config, source) = load_config(kubeconfig).await?;
    let client = build_client(with_timeouts(config, connect_timeout, read_timeout))?;
    Ok((client, source))
}

/// Create the API port: a request client with default timeouts and a log
/// client without a read timeout
pub async fn create_api_client(
    kubeconfig: Option<&Path>,
) -> Result<(KubeApiClient, ConfigSource), Error> {
    info!("download k8s config");
    let (config, source) = load_config(kubeconfig).await?;
    let config = with_timeouts(config, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT);
    let log_client = build_client(log_stream_config(config.clone()))?;
    let client = build_client(config)?;
    Ok((KubeApiClient::new(client).with_log_client(log_client), source))
}

fn with_timeouts(mut config: Config, connect_timeout: Duration, read_timeout: Duration) -> Config {
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    config
}

/// A followed log ends when the server closes it or the caller's log
/// timeout passes, never on a quiet period.
fn log_stream_config(mut config: Config) -> Config {
    config.read_timeout = None;
    config
}

fn build_client(config: Config) -> Result<Client, Error> {
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

async fn load_config(kubeconfig: Option<&Path>) -> Result<(Config, ConfigSource), Error> {
    if let Some(path) = kubeconfig {
        let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
            Error::internal_with_context(
                "create_client",
                format!("failed to read kubeconfig {}: {}", path.display(), e),
            )
        })?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to load kubeconfig: {}", e),
                )
            })?;
        return Ok((config, ConfigSource::Path));
    }

    info!("running incluster config");
    match Config::incluster() {
        Ok(config) => Ok((config, ConfigSource::InCluster)),
        Err(e) => {
            debug!(error = %e, "in-cluster config unavailable");
            info!("running outside of k8s cluster config");
            let config = Config::from_kubeconfig(&KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?;
            Ok((config, ConfigSource::Kubeconfig))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_kubeconfig_path_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist");

        let err = match create_client(Some(&path)).await {
            Ok(_) => panic!("missing kubeconfig must fail"),
            Err(e) => e,
        };
        let msg = err.to_string();
        assert!(msg.contains("[create_client]"));
        assert!(msg.contains("does-not-exist"));
    }

    #[tokio::test]
    async fn malformed_kubeconfig_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "clusters: [not, a, kubeconfig").unwrap();

        assert!(create_client(Some(&path)).await.is_err());
        assert!(create_api_client(Some(&path)).await.is_err());
    }

    #[test]
    fn log_client_config_has_no_read_timeout() {
        let base = Config::new("https://127.0.0.1:6443".parse().unwrap());
        let config = with_timeouts(base, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT);
        assert_eq!(config.read_timeout, Some(DEFAULT_READ_TIMEOUT));

        let logs = log_stream_config(config);
        assert_eq!(logs.read_timeout, None);
        assert_eq!(logs.connect_timeout, Some(DEFAULT_CONNECT_TIMEOUT));
    }
}
