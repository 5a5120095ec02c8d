//! KubeUtils facade
//!
//! Owns the optional [`KubeApi`] port, the environment sink secrets are
//! published to, and whether cluster credentials were loaded. Operations
//! on a facade built without a port fail with `ApiNotInitialized`.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::{KubeApi, PodHandle};
use crate::application::{SparkApplication, SPARK_GROUP, SPARK_PLURAL, SPARK_VERSION};
use crate::client::create_api_client;
use crate::env::EnvironmentSink;
use crate::lifecycle::{PodLifecycleWaiter, PollIntervals};
use crate::secrets::{FetchMode, SecretFetcher, SecretMap, SecretRequest, SecretRequestSpace, SecretResult};
use crate::Error;

/// Entry point bundling the API port with secret and pod helpers
#[derive(Clone)]
pub struct KubeUtils {
    api: Option<Arc<dyn KubeApi>>,
    env: Arc<dyn EnvironmentSink>,
    config_loaded: bool,
    intervals: PollIntervals,
    cancel: CancellationToken,
}

impl KubeUtils {
    /// Load cluster credentials (in-cluster first, then kubeconfig) and
    /// build a facade over the real API.
    pub async fn connect(env: Arc<dyn EnvironmentSink>) -> Result<Self, Error> {
        Self::connect_with(None, env).await
    }

    /// Like [`KubeUtils::connect`] with an optional explicit kubeconfig path
    pub async fn connect_with(
        kubeconfig: Option<&Path>,
        env: Arc<dyn EnvironmentSink>,
    ) -> Result<Self, Error> {
        let (api, source) = create_api_client(kubeconfig).await?;
        info!(source = ?source, "k8s config loaded");
        Ok(Self {
            api: Some(Arc::new(api)),
            env,
            config_loaded: true,
            intervals: PollIntervals::default(),
            cancel: CancellationToken::new(),
        })
    }

    /// Use an injected API port. No credentials are loaded, so secret
    /// operations log a warning.
    pub fn new(api: Arc<dyn KubeApi>, env: Arc<dyn EnvironmentSink>) -> Self {
        Self {
            api: Some(api),
            env,
            config_loaded: false,
            intervals: PollIntervals::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// A facade with no API port
    pub fn unconfigured(env: Arc<dyn EnvironmentSink>) -> Self {
        Self {
            api: None,
            env,
            config_loaded: false,
            intervals: PollIntervals::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Override the poll intervals of waiters built by this facade
    pub fn with_intervals(mut self, intervals: PollIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    /// Share a cancellation token with every waiter built by this facade
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Whether cluster credentials were loaded by [`KubeUtils::connect`]
    pub fn config_loaded(&self) -> bool {
        self.config_loaded
    }

    /// The API port, or `ApiNotInitialized`
    pub fn api(&self) -> Result<Arc<dyn KubeApi>, Error> {
        self.api.clone().ok_or(Error::ApiNotInitialized)
    }

    /// Secret fetcher over this facade's port and environment
    pub fn secret_fetcher(&self) -> Result<SecretFetcher, Error> {
        Ok(SecretFetcher::new(self.api()?, Arc::clone(&self.env)).with_config_loaded(self.config_loaded))
    }

    /// Fetch and decode one secret key, publishing it when `to_env` is set
    pub async fn download_secret(
        &self,
        secret_name: &str,
        secret_key: &str,
        namespace: &str,
        to_env: bool,
    ) -> Result<String, Error> {
        let request = SecretRequest::new(namespace, secret_name, secret_key);
        self.secret_fetcher()?.fetch_one(&request, to_env).await
    }

    /// Fetch every key of a namespace -> secret -> keys mapping
    pub async fn download_secrets(
        &self,
        secrets: &SecretMap,
        to_env: bool,
        mode: FetchMode,
    ) -> Result<Vec<SecretResult>, Error> {
        let space = SecretRequestSpace::from(secrets);
        self.secret_fetcher()?.fetch_all(&space, to_env, mode).await
    }

    /// Pod waiter sharing this facade's port, intervals and cancellation
    pub fn pod_waiter(&self) -> Result<PodLifecycleWaiter, Error> {
        Ok(PodLifecycleWaiter::new(self.api()?)
            .with_intervals(self.intervals)
            .with_cancellation(self.cancel.clone()))
    }

    /// Create a namespaced custom object
    pub async fn create_custom_object(
        &self,
        group: &str,
        version: &str,
        namespace: &str,
        plural: &str,
        body: Value,
    ) -> Result<Value, Error> {
        self.api()?
            .create_custom_object(group, version, namespace, plural, body)
            .await
    }

    /// Submit a SparkApplication into the namespace set in its manifest
    pub async fn submit_application(&self, application: &SparkApplication) -> Result<Value, Error> {
        let api = self.api()?;
        let body = application.body()?.clone();
        let namespace = application
            .namespace()
            .ok_or_else(|| Error::validation("SparkApplication has no metadata.namespace"))?
            .to_string();

        info!(
            application = application.name().unwrap_or_default(),
            namespace = %namespace,
            "submit spark application"
        );
        api.create_custom_object(SPARK_GROUP, SPARK_VERSION, &namespace, SPARK_PLURAL, body)
            .await
    }

    /// Every pod in the cluster
    pub async fn list_all_pods(&self) -> Result<Vec<PodHandle>, Error> {
        self.api()?.list_pods_all_namespaces("").await
    }

    /// Delete a pod
    pub async fn delete_pod(&self, name: &str, namespace: &str) -> Result<(), Error> {
        self.api()?.delete_pod(name, namespace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PodPhase;
    use crate::env::MemoryEnvironment;
    use crate::fake::{FakeKubeApi, FakePod};
    use crate::lifecycle::PodQuery;
    use futures::StreamExt;
    use std::time::Duration;

    fn facade(api: FakeKubeApi) -> (KubeUtils, Arc<FakeKubeApi>, Arc<MemoryEnvironment>) {
        let api = Arc::new(api);
        let env = Arc::new(MemoryEnvironment::new());
        (KubeUtils::new(api.clone(), env.clone()), api, env)
    }

    #[tokio::test]
    async fn unconfigured_facade_rejects_every_operation() {
        let utils = KubeUtils::unconfigured(Arc::new(MemoryEnvironment::new()));
        assert!(!utils.config_loaded());

        assert!(matches!(
            utils.download_secret("s3-secret", "S3_ACCESS_KEY", "prefect", false).await,
            Err(Error::ApiNotInitialized)
        ));
        assert!(matches!(
            utils.download_secrets(&SecretMap::new(), false, FetchMode::Concurrent).await,
            Err(Error::ApiNotInitialized)
        ));
        assert!(matches!(utils.pod_waiter(), Err(Error::ApiNotInitialized)));
        assert!(matches!(utils.list_all_pods().await, Err(Error::ApiNotInitialized)));
        assert!(matches!(
            utils.delete_pod("p", "ns").await,
            Err(Error::ApiNotInitialized)
        ));
        let app = SparkApplication::default_manifest().unwrap();
        assert!(matches!(
            utils.submit_application(&app).await,
            Err(Error::ApiNotInitialized)
        ));
    }

    #[tokio::test]
    async fn download_secret_publishes_when_asked() {
        let (utils, _, env) = facade(
            FakeKubeApi::new().with_secret("prefect", "s3-secret", [("S3_BUCKET_NAME", "bucket")]),
        );

        let value = utils
            .download_secret("s3-secret", "S3_BUCKET_NAME", "prefect", false)
            .await
            .unwrap();
        assert_eq!(value, "bucket");
        assert!(env.is_empty());

        utils
            .download_secret("s3-secret", "S3_BUCKET_NAME", "prefect", true)
            .await
            .unwrap();
        assert_eq!(env.get("S3_BUCKET_NAME").as_deref(), Some("bucket"));
    }

    #[tokio::test]
    async fn download_secrets_walks_the_whole_mapping() {
        let (utils, _, env) = facade(
            FakeKubeApi::new()
                .with_secret("prefect", "s3-secret", [("S3_ACCESS_KEY", "a"), ("S3_SECRET_KEY", "s")])
                .with_secret("spark", "oracle-secret", [("ORACLE_HOST", "db")]),
        );
        let mut secrets = SecretMap::new();
        secrets.entry("prefect".into()).or_default().insert(
            "s3-secret".into(),
            vec!["S3_ACCESS_KEY".into(), "S3_SECRET_KEY".into()],
        );
        secrets
            .entry("spark".into())
            .or_default()
            .insert("oracle-secret".into(), vec!["ORACLE_HOST".into()]);

        let results = utils
            .download_secrets(&secrets, true, FetchMode::Ordered)
            .await
            .unwrap();

        let keys: Vec<_> = results.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["S3_ACCESS_KEY", "S3_SECRET_KEY", "ORACLE_HOST"]);
        assert_eq!(env.len(), 3);
    }

    #[tokio::test]
    async fn submit_application_targets_the_spark_operator() {
        let (utils, api, _) = facade(FakeKubeApi::new());
        let mut app = SparkApplication::default_manifest().unwrap();
        app.define_app_name("etl-098f6b").unwrap();
        app.define_namespace("spark-jobs").unwrap();

        utils.submit_application(&app).await.unwrap();

        let created = api.created_objects();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].group, SPARK_GROUP);
        assert_eq!(created[0].version, SPARK_VERSION);
        assert_eq!(created[0].plural, SPARK_PLURAL);
        assert_eq!(created[0].namespace, "spark-jobs");
        assert_eq!(created[0].body["metadata"]["name"], "etl-098f6b");
    }

    #[tokio::test]
    async fn submit_without_namespace_is_rejected() {
        let (utils, api, _) = facade(FakeKubeApi::new());
        let app = SparkApplication::from_yaml("kind: SparkApplication\nspec: {}\n").unwrap();

        assert!(matches!(
            utils.submit_application(&app).await,
            Err(Error::Validation { .. })
        ));
        assert!(api.created_objects().is_empty());
    }

    #[tokio::test]
    async fn list_and_delete_pods() {
        let (utils, api, _) = facade(
            FakeKubeApi::new()
                .with_pod(FakePod::new("a", "prefect"))
                .with_pod(FakePod::new("b", "spark")),
        );

        assert_eq!(utils.list_all_pods().await.unwrap().len(), 2);
        utils.delete_pod("a", "prefect").await.unwrap();
        assert_eq!(utils.list_all_pods().await.unwrap(), vec![PodHandle::new("b", "spark")]);
        assert_eq!(api.deleted_pods(), vec![PodHandle::new("a", "prefect")]);
    }

    /// Story: a submitted job's driver is found by its operator labels, waited
    /// on until Running, and its log is followed to the end.
    #[tokio::test(start_paused = true)]
    async fn story_driver_pod_is_found_and_followed() {
        let (utils, _, _) = facade(
            FakeKubeApi::new()
                .with_pod(
                    FakePod::new("etl-driver", "spark")
                        .label("spark-role", "driver")
                        .label("sparkoperator.k8s.io/app-name", "etl")
                        .phases([PodPhase::Pending, PodPhase::Running])
                        .logs(["INFO starting", "WARNING slow stage", "ERROR boom"]),
                )
                .with_log_delay(Duration::from_secs(1)),
        );

        let waiter = utils.pod_waiter().unwrap();
        let pod = waiter
            .resolve_pod(&PodQuery::spark_driver("spark", "etl"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(pod, PodHandle::new("etl-driver", "spark"));

        let lines: Vec<String> = waiter
            .follow_running_logs(&pod, Duration::from_secs(3600), Duration::from_secs(3600))
            .await
            .unwrap()
            .expect("driver reached Running")
            .map(|line| line.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["INFO starting", "WARNING slow stage", "ERROR boom"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_the_facade_token_stops_waiters() {
        let cancel = CancellationToken::new();
        let (utils, _, _) = facade(FakeKubeApi::new());
        let utils = utils.with_cancellation(cancel.clone());
        let waiter = utils.pod_waiter().unwrap();

        cancel.cancel();
        let err = waiter
            .resolve_pod(&PodQuery::new("spark", "app=none"), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
    }
}
