//! In-memory [`KubeApi`] for tests
//!
//! Holds secrets (stored base64-encoded, as the API server serves them),
//! pods with labels, a scripted phase sequence and log lines, and records
//! created custom objects and deleted pods for later assertions.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use futures::StreamExt;

use crate::api::{KubeApi, LogChunks, PodHandle, PodPhase, SecretPayload};
use crate::Error;

/// A pod served by [`FakeKubeApi`]
#[derive(Clone, Debug)]
pub struct FakePod {
    handle: PodHandle,
    labels: BTreeMap<String, String>,
    phases: VecDeque<PodPhase>,
    logs: Vec<String>,
}

impl FakePod {
    /// A Running pod with no labels and no logs
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            handle: PodHandle::new(name, namespace),
            labels: BTreeMap::new(),
            phases: VecDeque::from([PodPhase::Running]),
            logs: Vec::new(),
        }
    }

    /// Add a label
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Phases returned by successive reads; the last one repeats
    pub fn phases(mut self, phases: impl IntoIterator<Item = PodPhase>) -> Self {
        self.phases = phases.into_iter().collect();
        if self.phases.is_empty() {
            self.phases.push_back(PodPhase::Unknown);
        }
        self
    }

    /// Lines served by the followed log
    pub fn logs<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.logs = lines.into_iter().map(Into::into).collect();
        self
    }

    fn matches(&self, label_selector: &str) -> bool {
        label_selector
            .split(',')
            .filter(|term| !term.is_empty())
            .all(|term| match term.split_once('=') {
                Some((key, value)) => self.labels.get(key).map(String::as_str) == Some(value),
                None => self.labels.contains_key(term),
            })
    }
}

/// A custom object recorded by [`FakeKubeApi::create_custom_object`]
#[derive(Clone, Debug, PartialEq)]
pub struct CreatedObject {
    /// API group
    pub group: String,
    /// API version
    pub version: String,
    /// Target namespace
    pub namespace: String,
    /// Resource plural
    pub plural: String,
    /// Submitted body
    pub body: serde_json::Value,
}

#[derive(Debug, Default)]
struct FakeState {
    secrets: BTreeMap<(String, String), BTreeMap<String, String>>,
    pods: Vec<FakePod>,
    created: Vec<CreatedObject>,
    deleted: Vec<PodHandle>,
}

/// In-memory Kubernetes API
#[derive(Debug, Default)]
pub struct FakeKubeApi {
    state: Mutex<FakeState>,
    log_delay: Duration,
}

impl FakeKubeApi {
    /// Create an empty fake
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve a secret whose values are given in plain text
    pub fn with_secret<K, V>(
        self,
        namespace: &str,
        name: &str,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: AsRef<[u8]>,
    {
        let data = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), STANDARD.encode(v)))
            .collect();
        self.lock()
            .secrets
            .insert((namespace.to_string(), name.to_string()), data);
        self
    }

    /// Serve a secret whose values are already base64-encoded
    pub fn with_raw_secret<K, V>(
        self,
        namespace: &str,
        name: &str,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let data = SecretPayload::from_encoded(pairs).data;
        self.lock()
            .secrets
            .insert((namespace.to_string(), name.to_string()), data);
        self
    }

    /// Serve a pod
    pub fn with_pod(self, pod: FakePod) -> Self {
        self.lock().pods.push(pod);
        self
    }

    /// Delay before each log line is delivered
    pub fn with_log_delay(mut self, delay: Duration) -> Self {
        self.log_delay = delay;
        self
    }

    /// Custom objects created so far
    pub fn created_objects(&self) -> Vec<CreatedObject> {
        self.lock().created.clone()
    }

    /// Pods deleted so far
    pub fn deleted_pods(&self) -> Vec<PodHandle> {
        self.lock().deleted.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn not_found(kind: &str, name: &str, namespace: &str) -> Error {
        Error::internal_with_context("fake", format!("{} {}/{} not found", kind, namespace, name))
    }
}

#[async_trait]
impl KubeApi for FakeKubeApi {
    async fn read_secret(&self, name: &str, namespace: &str) -> Result<SecretPayload, Error> {
        self.lock()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .map(|data| SecretPayload { data: data.clone() })
            .ok_or_else(|| Self::not_found("secret", name, namespace))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<PodHandle>, Error> {
        Ok(self
            .lock()
            .pods
            .iter()
            .filter(|p| p.handle.namespace == namespace && p.matches(label_selector))
            .map(|p| p.handle.clone())
            .collect())
    }

    async fn list_pods_all_namespaces(&self, label_selector: &str) -> Result<Vec<PodHandle>, Error> {
        Ok(self
            .lock()
            .pods
            .iter()
            .filter(|p| p.matches(label_selector))
            .map(|p| p.handle.clone())
            .collect())
    }

    async fn read_pod_phase(&self, name: &str, namespace: &str) -> Result<PodPhase, Error> {
        let mut state = self.lock();
        let pod = state
            .pods
            .iter_mut()
            .find(|p| p.handle.name == name && p.handle.namespace == namespace)
            .ok_or_else(|| Self::not_found("pod", name, namespace))?;

        let phase = if pod.phases.len() > 1 {
            pod.phases.pop_front()
        } else {
            pod.phases.front().cloned()
        };
        Ok(phase.unwrap_or(PodPhase::Unknown))
    }

    async fn read_pod_log(&self, name: &str, namespace: &str) -> Result<LogChunks, Error> {
        let lines: Vec<Vec<u8>> = self
            .lock()
            .pods
            .iter()
            .find(|p| p.handle.name == name && p.handle.namespace == namespace)
            .ok_or_else(|| Self::not_found("pod", name, namespace))?
            .logs
            .iter()
            .map(|line| format!("{}\n", line).into_bytes())
            .collect();

        let delay = self.log_delay;
        Ok(futures::stream::iter(lines)
            .then(move |line| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(line)
            })
            .boxed())
    }

    async fn create_custom_object(
        &self,
        group: &str,
        version: &str,
        namespace: &str,
        plural: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, Error> {
        self.lock().created.push(CreatedObject {
            group: group.to_string(),
            version: version.to_string(),
            namespace: namespace.to_string(),
            plural: plural.to_string(),
            body: body.clone(),
        });
        Ok(body)
    }

    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let mut state = self.lock();
        let index = state
            .pods
            .iter()
            .position(|p| p.handle.name == name && p.handle.namespace == namespace)
            .ok_or_else(|| Self::not_found("pod", name, namespace))?;
        let pod = state.pods.remove(index);
        state.deleted.push(pod.handle);
        Ok(())
    }
}
