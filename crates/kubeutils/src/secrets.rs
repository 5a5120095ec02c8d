//! Secret fetching
//!
//! Fetches (namespace, secret, key) triples through the [`KubeApi`] port,
//! decodes them from base64 and optionally publishes them into an
//! [`EnvironmentSink`].
//!
//! # Ordering
//!
//! [`FetchMode::Sequential`] preserves the flattened request order.
//! [`FetchMode::Concurrent`] spawns one task per triple and returns results
//! in completion order, which is not deterministic. Callers that want
//! concurrency and input order opt into [`FetchMode::Ordered`].

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use futures::future::join_all;
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::KubeApi;
use crate::env::EnvironmentSink;
use crate::{Error, CONFIG_WARN};

/// Nested secret mapping: namespace -> secret name -> keys, in insertion order
pub type SecretMap = IndexMap<String, IndexMap<String, Vec<String>>>;

/// One (namespace, secret, key) triple to fetch
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SecretRequest {
    /// Namespace of the secret
    pub namespace: String,
    /// Name of the secret
    pub secret_name: String,
    /// Key inside the secret
    pub secret_key: String,
}

impl SecretRequest {
    /// Create a new request
    pub fn new(
        namespace: impl Into<String>,
        secret_name: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            secret_name: secret_name.into(),
            secret_key: secret_key.into(),
        }
    }
}

/// Flattened, duplicate-free sequence of secret requests
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SecretRequestSpace {
    requests: Vec<SecretRequest>,
}

impl SecretRequestSpace {
    /// Create an empty space
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request, ignoring exact duplicates
    pub fn push(&mut self, request: SecretRequest) {
        if !self.requests.contains(&request) {
            self.requests.push(request);
        }
    }

    /// Iterate over the requests in order
    pub fn iter(&self) -> impl Iterator<Item = &SecretRequest> {
        self.requests.iter()
    }

    /// Number of requests
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether there is nothing to fetch
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl FromIterator<SecretRequest> for SecretRequestSpace {
    fn from_iter<I: IntoIterator<Item = SecretRequest>>(iter: I) -> Self {
        let mut space = SecretRequestSpace::new();
        for request in iter {
            space.push(request);
        }
        space
    }
}

impl From<&SecretMap> for SecretRequestSpace {
    fn from(map: &SecretMap) -> Self {
        map.iter()
            .flat_map(|(namespace, secrets)| {
                secrets.iter().flat_map(move |(name, keys)| {
                    keys.iter()
                        .map(move |key| SecretRequest::new(namespace, name, key))
                })
            })
            .collect()
    }
}

/// A fetched and decoded secret value
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SecretResult {
    /// Namespace the secret was read from
    pub namespace: String,
    /// Secret key (and environment variable name)
    pub key: String,
    /// Decoded value
    pub value: String,
}

/// How [`SecretFetcher::fetch_all`] schedules its fetches
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FetchMode {
    /// One task per triple, results in completion order
    #[default]
    Concurrent,
    /// One triple at a time, results in request order
    Sequential,
    /// One task per triple, results restored to request order
    Ordered,
}

/// Fetches secrets through the API port
#[derive(Clone)]
pub struct SecretFetcher {
    api: Arc<dyn KubeApi>,
    env: Arc<dyn EnvironmentSink>,
    config_loaded: bool,
}

impl SecretFetcher {
    /// Create a fetcher over an API port and environment sink
    pub fn new(api: Arc<dyn KubeApi>, env: Arc<dyn EnvironmentSink>) -> Self {
        Self {
            api,
            env,
            config_loaded: true,
        }
    }

    /// Record whether cluster credentials were loaded before this fetcher was built
    pub fn with_config_loaded(mut self, loaded: bool) -> Self {
        self.config_loaded = loaded;
        self
    }

    /// Fetch and decode a single secret key
    pub async fn fetch_one(&self, request: &SecretRequest, publish: bool) -> Result<String, Error> {
        info!(
            secret = %request.secret_name,
            key = %request.secret_key,
            namespace = %request.namespace,
            "download secret"
        );
        if !self.config_loaded {
            warn!("{}", CONFIG_WARN);
        }
        fetch_secret(self.api.as_ref(), self.env.as_ref(), request, publish).await
    }

    /// Fetch every request in `space`
    ///
    /// On failure all in-flight fetches are awaited before the first error
    /// (in request order) is returned. No partial results are returned.
    pub async fn fetch_all(
        &self,
        space: &SecretRequestSpace,
        publish: bool,
        mode: FetchMode,
    ) -> Result<Vec<SecretResult>, Error> {
        if space.is_empty() {
            return Ok(Vec::new());
        }

        info!(count = space.len(), mode = ?mode, "download secrets...");
        if !self.config_loaded {
            warn!("{}", CONFIG_WARN);
        }

        match mode {
            FetchMode::Sequential => self.fetch_sequential(space, publish).await,
            FetchMode::Concurrent => self.fetch_concurrent(space, publish).await,
            FetchMode::Ordered => self.fetch_ordered(space, publish).await,
        }
    }

    async fn fetch_sequential(
        &self,
        space: &SecretRequestSpace,
        publish: bool,
    ) -> Result<Vec<SecretResult>, Error> {
        let mut results = Vec::with_capacity(space.len());
        for request in space.iter() {
            let value = fetch_secret(self.api.as_ref(), self.env.as_ref(), request, publish).await?;
            results.push(to_result(request, value));
        }
        Ok(results)
    }

    async fn fetch_concurrent(
        &self,
        space: &SecretRequestSpace,
        publish: bool,
    ) -> Result<Vec<SecretResult>, Error> {
        let results = Arc::new(Mutex::new(Vec::with_capacity(space.len())));

        let handles: Vec<_> = space
            .iter()
            .cloned()
            .map(|request| {
                let api = Arc::clone(&self.api);
                let env = Arc::clone(&self.env);
                let results = Arc::clone(&results);
                tokio::spawn(async move {
                    let value = fetch_secret(api.as_ref(), env.as_ref(), &request, publish).await?;
                    // Lock only around the append so fetches never serialize.
                    results.lock().await.push(to_result(&request, value));
                    Ok::<(), Error>(())
                })
            })
            .collect();

        for outcome in join_all(handles).await {
            outcome.map_err(|e| Error::internal_with_context("fetch_all", e.to_string()))??;
        }

        let mut guard = results.lock().await;
        Ok(std::mem::take(&mut *guard))
    }

    async fn fetch_ordered(
        &self,
        space: &SecretRequestSpace,
        publish: bool,
    ) -> Result<Vec<SecretResult>, Error> {
        let handles: Vec<_> = space
            .iter()
            .cloned()
            .map(|request| {
                let api = Arc::clone(&self.api);
                let env = Arc::clone(&self.env);
                tokio::spawn(async move {
                    let value = fetch_secret(api.as_ref(), env.as_ref(), &request, publish).await?;
                    Ok::<_, Error>(to_result(&request, value))
                })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .map(|outcome| {
                outcome.map_err(|e| Error::internal_with_context("fetch_all", e.to_string()))?
            })
            .collect()
    }
}

fn to_result(request: &SecretRequest, value: String) -> SecretResult {
    SecretResult {
        namespace: request.namespace.clone(),
        key: request.secret_key.clone(),
        value,
    }
}

async fn fetch_secret(
    api: &dyn KubeApi,
    env: &dyn EnvironmentSink,
    request: &SecretRequest,
    publish: bool,
) -> Result<String, Error> {
    let payload = api
        .read_secret(&request.secret_name, &request.namespace)
        .await?;

    let encoded = payload.data.get(&request.secret_key).ok_or_else(|| {
        Error::secret_key_not_found(
            &request.namespace,
            &request.secret_name,
            &request.secret_key,
        )
    })?;

    let value = decode_secret_value(encoded).map_err(|message| {
        Error::secret_decode(
            &request.namespace,
            &request.secret_name,
            &request.secret_key,
            message,
        )
    })?;

    if publish {
        env.publish(&request.secret_key, &value);
    }
    debug!(
        secret = %request.secret_name,
        key = %request.secret_key,
        namespace = %request.namespace,
        published = publish,
        "Decoded secret"
    );
    Ok(value)
}

/// Decode a base64 secret value into UTF-8 text
pub fn decode_secret_value(encoded: &str) -> Result<String, String> {
    let bytes = STANDARD.decode(encoded).map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|e| e.to_string())
}
