//! Kubernetes API port
//!
//! Provides a trait-based abstraction over the handful of API calls the
//! secret fetcher and pod waiter need, allowing tests to mock Kubernetes
//! interactions while production code uses real API calls.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{AsyncBufReadExt, StreamExt};
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, LogParams, PostParams,
};
use kube::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::Error;

/// Raw byte chunks read from a followed pod log
pub type LogChunks = BoxStream<'static, Result<Vec<u8>, Error>>;

/// Secret payload as returned by the API server: key to base64 value
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SecretPayload {
    /// Base64-encoded values keyed by secret key
    pub data: BTreeMap<String, String>,
}

impl SecretPayload {
    /// Build a payload from already-encoded pairs
    pub fn from_encoded<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            data: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Identity of a resolved pod
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PodHandle {
    /// Pod name
    pub name: String,
    /// Pod namespace
    pub namespace: String,
}

impl PodHandle {
    /// Create a new handle
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for PodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Pod lifecycle phase as reported in `status.phase`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PodPhase {
    /// Accepted but not all containers are running yet
    Pending,
    /// Bound to a node with at least one container running
    Running,
    /// All containers terminated successfully
    Succeeded,
    /// All containers terminated, at least one in failure
    Failed,
    /// State could not be obtained
    Unknown,
    /// Any phase string the API server reports that is not listed above
    Other(String),
}

impl PodPhase {
    /// Parse the optional `status.phase` string of a pod
    pub fn from_status(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            Some("Unknown") | None => PodPhase::Unknown,
            Some(other) => PodPhase::Other(other.to_string()),
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PodPhase::Pending => f.write_str("Pending"),
            PodPhase::Running => f.write_str("Running"),
            PodPhase::Succeeded => f.write_str("Succeeded"),
            PodPhase::Failed => f.write_str("Failed"),
            PodPhase::Unknown => f.write_str("Unknown"),
            PodPhase::Other(s) => f.write_str(s),
        }
    }
}

/// Trait abstracting the Kubernetes API calls used by kubeutils
///
/// This trait allows mocking API operations in tests while using the
/// real Kubernetes client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeApi: Send + Sync {
    /// Read a secret, returning its base64-encoded data
    async fn read_secret(&self, name: &str, namespace: &str) -> Result<SecretPayload, Error>;

    /// List pods in a namespace matching a label selector
    async fn list_pods(&self, namespace: &str, label_selector: &str)
        -> Result<Vec<PodHandle>, Error>;

    /// List pods across all namespaces (empty selector matches everything)
    async fn list_pods_all_namespaces(&self, label_selector: &str) -> Result<Vec<PodHandle>, Error>;

    /// Read the current phase of a pod
    async fn read_pod_phase(&self, name: &str, namespace: &str) -> Result<PodPhase, Error>;

    /// Open a followed log stream for a pod
    async fn read_pod_log(&self, name: &str, namespace: &str) -> Result<LogChunks, Error>;

    /// Create a namespaced custom object and return the created object
    async fn create_custom_object(
        &self,
        group: &str,
        version: &str,
        namespace: &str,
        plural: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, Error>;

    /// Delete a pod
    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<(), Error>;
}

/// Real API implementation on top of a kube-rs client
#[derive(Clone)]
pub struct KubeApiClient {
    client: Client,
    log_client: Client,
}

impl KubeApiClient {
    /// Create a new KubeApiClient that also follows logs over `client`
    pub fn new(client: Client) -> Self {
        Self {
            log_client: client.clone(),
            client,
        }
    }

    /// Follow pod logs over a separate client
    pub fn with_log_client(mut self, log_client: Client) -> Self {
        self.log_client = log_client;
        self
    }

    /// Get the underlying kube Client
    pub fn kube_client(&self) -> Client {
        self.client.clone()
    }
}

fn pod_handles(pods: Vec<Pod>, fallback_namespace: &str) -> Vec<PodHandle> {
    pods.into_iter()
        .filter_map(|pod| {
            let name = pod.metadata.name?;
            let namespace = pod
                .metadata
                .namespace
                .unwrap_or_else(|| fallback_namespace.to_string());
            Some(PodHandle { name, namespace })
        })
        .collect()
}

fn selector_params(label_selector: &str) -> ListParams {
    if label_selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(label_selector)
    }
}

/// Build the ApiResource for a custom object from its group/version/plural.
///
/// Kind is taken from the body when present since the plural alone does not
/// carry it.
pub fn custom_object_resource(
    group: &str,
    version: &str,
    plural: &str,
    body: &serde_json::Value,
) -> ApiResource {
    let kind = body
        .get("kind")
        .and_then(|k| k.as_str())
        .unwrap_or_default()
        .to_string();
    ApiResource {
        group: group.to_string(),
        version: version.to_string(),
        api_version: format!("{}/{}", group, version),
        kind,
        plural: plural.to_string(),
    }
}

#[async_trait]
impl KubeApi for KubeApiClient {
    async fn read_secret(&self, name: &str, namespace: &str) -> Result<SecretPayload, Error> {
        // Read untyped so values stay base64 exactly as served.
        let ar = ApiResource::erase::<Secret>(&());
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        let obj = api.get(name).await?;

        let data = match obj.data.get("data") {
            Some(value) if !value.is_null() => serde_json::from_value(value.clone())?,
            _ => BTreeMap::new(),
        };
        debug!(secret = %name, namespace = %namespace, keys = data.len(), "Read secret");
        Ok(SecretPayload { data })
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<PodHandle>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&selector_params(label_selector)).await?;
        Ok(pod_handles(list.items, namespace))
    }

    async fn list_pods_all_namespaces(&self, label_selector: &str) -> Result<Vec<PodHandle>, Error> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let list = api.list(&selector_params(label_selector)).await?;
        Ok(pod_handles(list.items, ""))
    }

    async fn read_pod_phase(&self, name: &str, namespace: &str) -> Result<PodPhase, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = api.get(name).await?;
        let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
        Ok(PodPhase::from_status(phase))
    }

    async fn read_pod_log(&self, name: &str, namespace: &str) -> Result<LogChunks, Error> {
        let api: Api<Pod> = Api::namespaced(self.log_client.clone(), namespace);
        let params = LogParams {
            follow: true,
            pretty: true,
            ..Default::default()
        };
        let reader = Box::pin(api.log_stream(name, &params).await?);

        let pod = name.to_string();
        let ns = namespace.to_string();
        let chunks = futures::stream::unfold(Some(reader), move |state| {
            let pod = pod.clone();
            let ns = ns.clone();
            async move {
                let mut reader = state?;
                let mut buf = Vec::new();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => None,
                    Ok(_) => Some((Ok(buf), Some(reader))),
                    Err(e) => Some((Err(Error::log_stream(ns, pod, e.to_string())), None)),
                }
            }
        });
        Ok(chunks.boxed())
    }

    async fn create_custom_object(
        &self,
        group: &str,
        version: &str,
        namespace: &str,
        plural: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, Error> {
        let ar = custom_object_resource(group, version, plural, &body);
        let obj: DynamicObject = serde_json::from_value(body)?;
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        let created = api.create(&PostParams::default(), &obj).await?;

        info!(
            kind = %ar.kind,
            name = %created.metadata.name.as_deref().unwrap_or_default(),
            namespace = %namespace,
            "Created custom object"
        );
        Ok(serde_json::to_value(created)?)
    }

    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        info!(pod = %name, namespace = %namespace, "Deleted pod");
        Ok(())
    }
}
