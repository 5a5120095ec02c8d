//! SparkApplication manifest handling
//!
//! Loads a SparkApplication manifest from YAML, merges an application
//! manifest over a shared base manifest, and sets the fields a job run
//! needs (script path, env, hadoop conf, name, namespace) before the body
//! is submitted as a custom object.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::Error;

/// API group of the Spark operator
pub const SPARK_GROUP: &str = "sparkoperator.k8s.io";
/// API version of SparkApplication
pub const SPARK_VERSION: &str = "v1beta2";
/// Resource plural of SparkApplication
pub const SPARK_PLURAL: &str = "sparkapplications";

/// Manifest used when no application manifest is supplied
const DEFAULT_MANIFEST: &str = include_str!("../manifests/spark_v1.yaml");

/// Containers that receive env, envFrom and volume mounts
const CONTAINERS: [&str; 2] = ["driver", "executor"];

/// Dynamic allocation setting that bounds the executor count
const MAX_EXECUTORS_CONF: &str = "spark.dynamicAllocation.maxExecutors";

/// A SparkApplication custom object body
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SparkApplication {
    manifest: Option<Value>,
}

impl SparkApplication {
    /// An application with no manifest loaded
    pub fn new() -> Self {
        Self::default()
    }

    /// The bundled default manifest
    pub fn default_manifest() -> Result<Self, Error> {
        Self::from_yaml(DEFAULT_MANIFEST)
    }

    /// Parse a manifest from YAML text
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let manifest: Value = serde_yaml::from_str(yaml)
            .map_err(|e| Error::serialization(format!("invalid manifest YAML: {}", e)))?;
        Ok(Self {
            manifest: Some(manifest),
        })
    }

    /// Load a manifest from a YAML file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let mut app = Self::new();
        app.load(path)?;
        Ok(app)
    }

    /// Replace the current manifest with the one at `path`
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let manifest = read_manifest(path)?;
        debug!(path = %path.display(), "Loaded manifest");
        self.manifest = Some(manifest);
        Ok(())
    }

    /// Merge `app_path` over `base_path` and write the result back to `app_path`.
    ///
    /// Mappings merge recursively; on any other conflict the application
    /// manifest wins.
    pub fn merge_files(app_path: impl AsRef<Path>, base_path: impl AsRef<Path>) -> Result<(), Error> {
        let app_path = app_path.as_ref();
        let mut merged = read_manifest(base_path.as_ref())?;
        merge_values(&mut merged, read_manifest(app_path)?);

        let yaml = serde_yaml::to_string(&merged)
            .map_err(|e| Error::manifest(app_path.display().to_string(), e.to_string()))?;
        std::fs::write(app_path, yaml)
            .map_err(|e| Error::manifest(app_path.display().to_string(), e.to_string()))?;
        debug!(path = %app_path.display(), "Wrote merged manifest");
        Ok(())
    }

    /// Whether a manifest is loaded
    pub fn is_loaded(&self) -> bool {
        self.manifest.is_some()
    }

    /// Manifest body for submission
    pub fn body(&self) -> Result<&Value, Error> {
        self.manifest.as_ref().ok_or(Error::ManifestNotLoaded)
    }

    /// `metadata.name`, if set
    pub fn name(&self) -> Option<&str> {
        self.manifest
            .as_ref()?
            .pointer("/metadata/name")
            .and_then(Value::as_str)
    }

    /// `metadata.namespace`, if set
    pub fn namespace(&self) -> Option<&str> {
        self.manifest
            .as_ref()?
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
    }

    /// Upper bound on the number of executors the manifest allows.
    ///
    /// Dynamic allocation's `maxExecutors` wins over `executor.instances`.
    pub fn executor_num(&self) -> Result<String, Error> {
        let spec = self.body()?.get("spec");

        let candidates = [
            spec.and_then(|s| s.get("sparkConf"))
                .and_then(|c| c.get(MAX_EXECUTORS_CONF)),
            spec.and_then(|s| s.get("executor"))
                .and_then(|e| e.get("instances")),
        ];

        candidates
            .into_iter()
            .flatten()
            .find_map(scalar_text)
            .ok_or_else(|| Error::validation("config is invalid: executor count not specified"))
    }

    /// Set `env` on driver and executor
    pub fn define_container_env<T: Serialize>(&mut self, env: &[T]) -> Result<(), Error> {
        self.set_on_containers("env", serde_json::to_value(env)?)
    }

    /// Set `envFrom` on driver and executor
    pub fn define_container_env_from<T: Serialize>(&mut self, sources: &[T]) -> Result<(), Error> {
        self.set_on_containers("envFrom", serde_json::to_value(sources)?)
    }

    /// Set `spec.volumes`
    pub fn define_container_volumes<T: Serialize>(&mut self, volumes: &[T]) -> Result<(), Error> {
        let value = serde_json::to_value(volumes)?;
        self.object_at(&["spec"])?.insert("volumes".to_string(), value);
        Ok(())
    }

    /// Set `volumeMounts` on driver and executor
    pub fn define_container_volume_mounts<T: Serialize>(
        &mut self,
        mounts: &[T],
    ) -> Result<(), Error> {
        self.set_on_containers("volumeMounts", serde_json::to_value(mounts)?)
    }

    /// Set `spec.mainApplicationFile`
    pub fn define_script_path(&mut self, script_path: &str) -> Result<(), Error> {
        self.object_at(&["spec"])?.insert(
            "mainApplicationFile".to_string(),
            Value::String(script_path.to_string()),
        );
        Ok(())
    }

    /// Set `spec.hadoopConf`
    pub fn define_hadoop_conf(&mut self, conf: &BTreeMap<String, String>) -> Result<(), Error> {
        let value = serde_json::to_value(conf)?;
        self.object_at(&["spec"])?.insert("hadoopConf".to_string(), value);
        Ok(())
    }

    /// Set `metadata.name`
    pub fn define_app_name(&mut self, name: &str) -> Result<(), Error> {
        self.object_at(&["metadata"])?
            .insert("name".to_string(), Value::String(name.to_string()));
        Ok(())
    }

    /// Set `metadata.namespace`
    pub fn define_namespace(&mut self, namespace: &str) -> Result<(), Error> {
        self.object_at(&["metadata"])?
            .insert("namespace".to_string(), Value::String(namespace.to_string()));
        Ok(())
    }

    fn set_on_containers(&mut self, field: &str, value: Value) -> Result<(), Error> {
        for container in CONTAINERS {
            self.object_at(&["spec", container])?
                .insert(field.to_string(), value.clone());
        }
        Ok(())
    }

    /// Walk (creating as needed) to the object at `path`
    fn object_at(&mut self, path: &[&str]) -> Result<&mut Map<String, Value>, Error> {
        let mut current = self.manifest.as_mut().ok_or(Error::ManifestNotLoaded)?;
        for segment in path {
            let map = current.as_object_mut().ok_or_else(|| {
                Error::validation(format!("manifest field above '{}' is not a mapping", segment))
            })?;
            current = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        current
            .as_object_mut()
            .ok_or_else(|| Error::validation(format!("manifest field '{}' is not a mapping", path.join("."))))
    }
}

fn read_manifest(path: &Path) -> Result<Value, Error> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::manifest(path.display().to_string(), e.to_string()))?;
    serde_yaml::from_str(&text).map_err(|e| Error::manifest(path.display().to_string(), e.to_string()))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Recursively merge `overlay` into `base`; overlay wins on conflicts.
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{EnvFromSource, EnvVar, SecretEnvSource};
    use serde_json::json;

    fn app(value: Value) -> SparkApplication {
        SparkApplication {
            manifest: Some(value),
        }
    }

    #[test]
    fn default_manifest_is_a_spark_application() {
        let app = SparkApplication::default_manifest().unwrap();
        let body = app.body().unwrap();
        assert_eq!(body["kind"], "SparkApplication");
        assert_eq!(body["apiVersion"], format!("{}/{}", SPARK_GROUP, SPARK_VERSION));
        assert!(body.get("spec").is_some());
        assert!(body.get("metadata").is_some());
    }

    #[test]
    fn body_without_manifest_fails() {
        let app = SparkApplication::new();
        assert!(!app.is_loaded());
        assert!(matches!(app.body(), Err(Error::ManifestNotLoaded)));
    }

    #[test]
    fn setters_without_manifest_fail() {
        let mut app = SparkApplication::new();
        assert!(matches!(
            app.define_app_name("etl"),
            Err(Error::ManifestNotLoaded)
        ));
        assert!(matches!(
            app.define_script_path("s3a://spark/scripts/etl.py"),
            Err(Error::ManifestNotLoaded)
        ));
    }

    #[test]
    fn executor_num_rejects_manifest_without_executor_settings() {
        assert!(app(json!({"metadata": {}})).executor_num().is_err());
        assert!(app(json!({"spec": {"type": "Python"}})).executor_num().is_err());
    }

    #[test]
    fn executor_num_reads_instances() {
        let app = app(json!({"spec": {"executor": {"instances": 2}}}));
        assert_eq!(app.executor_num().unwrap(), "2");
    }

    #[test]
    fn executor_num_prefers_dynamic_allocation() {
        let app = app(json!({
            "spec": {
                "sparkConf": {
                    "spark.dynamicAllocation.enabled": "true",
                    "spark.dynamicAllocation.maxExecutors": "2",
                },
                "executor": {"instances": 3},
            }
        }));
        assert_eq!(app.executor_num().unwrap(), "2");
    }

    #[test]
    fn env_is_set_on_driver_and_executor() {
        let mut app = SparkApplication::default_manifest().unwrap();
        let env = vec![EnvVar {
            name: "NUM_EXECUTORS".to_string(),
            value: Some("2".to_string()),
            ..Default::default()
        }];
        app.define_container_env(&env).unwrap();

        let body = app.body().unwrap();
        let expected = json!([{"name": "NUM_EXECUTORS", "value": "2"}]);
        assert_eq!(body["spec"]["driver"]["env"], expected);
        assert_eq!(body["spec"]["executor"]["env"], expected);
    }

    #[test]
    fn env_from_is_set_on_driver_and_executor() {
        let mut app = SparkApplication::default_manifest().unwrap();
        let sources = vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: "s3-secret".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }];
        app.define_container_env_from(&sources).unwrap();

        let body = app.body().unwrap();
        assert_eq!(body["spec"]["driver"]["envFrom"][0]["secretRef"]["name"], "s3-secret");
        assert_eq!(body["spec"]["executor"]["envFrom"][0]["secretRef"]["name"], "s3-secret");
    }

    #[test]
    fn volumes_and_mounts_create_missing_sections() {
        let mut app = app(json!({"spec": {}}));
        app.define_container_volumes(&[json!({"name": "name1", "secret": {"secretName": "name2"}})])
            .unwrap();
        app.define_container_volume_mounts(&[json!({
            "name": "test-volume",
            "mountPath": "/mnt/test",
            "readOnly": true,
        })])
        .unwrap();

        let body = app.body().unwrap();
        assert_eq!(body["spec"]["volumes"][0]["secret"]["secretName"], "name2");
        assert_eq!(body["spec"]["driver"]["volumeMounts"][0]["mountPath"], "/mnt/test");
        assert_eq!(body["spec"]["executor"]["volumeMounts"][0]["readOnly"], true);
    }

    #[test]
    fn identity_and_paths_are_written() {
        let mut app = SparkApplication::default_manifest().unwrap();
        app.define_app_name("etl-1a2b3c").unwrap();
        app.define_namespace("spark-jobs").unwrap();
        app.define_script_path("s3a://spark/scripts/pool/etl/v1.py").unwrap();

        let mut conf = BTreeMap::new();
        conf.insert("fs.s3a.path.style.access".to_string(), "true".to_string());
        app.define_hadoop_conf(&conf).unwrap();

        assert_eq!(app.name(), Some("etl-1a2b3c"));
        assert_eq!(app.namespace(), Some("spark-jobs"));
        let body = app.body().unwrap();
        assert_eq!(body["spec"]["mainApplicationFile"], "s3a://spark/scripts/pool/etl/v1.py");
        assert_eq!(body["spec"]["hadoopConf"]["fs.s3a.path.style.access"], "true");
    }

    #[test]
    fn non_mapping_in_path_is_a_validation_error() {
        let mut app = app(json!({"spec": "oops"}));
        assert!(matches!(
            app.define_script_path("x"),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn merge_files_overlays_app_on_base() {
        let dir = tempfile::tempdir().unwrap();
        let app_path = dir.path().join("app_manifest.yaml");
        let base_path = dir.path().join("base_manifest.yaml");
        std::fs::write(&app_path, "spec:\n  driver:\n    ex: 3\n    mem: 5\n").unwrap();
        std::fs::write(&base_path, "spec:\n  driver:\n    ex: 1\n    name: a\n").unwrap();

        SparkApplication::merge_files(&app_path, &base_path).unwrap();

        let merged = SparkApplication::from_path(&app_path).unwrap();
        assert_eq!(
            merged.body().unwrap(),
            &json!({"spec": {"driver": {"ex": 3, "mem": 5, "name": "a"}}})
        );
    }

    #[test]
    fn merge_files_reports_missing_base() {
        let dir = tempfile::tempdir().unwrap();
        let app_path = dir.path().join("app.yaml");
        std::fs::write(&app_path, "spec: {}\n").unwrap();

        let err = SparkApplication::merge_files(&app_path, dir.path().join("missing.yaml"))
            .unwrap_err();
        assert!(matches!(err, Error::Manifest { .. }));
        assert!(err.to_string().contains("missing.yaml"));
    }

    #[test]
    fn merge_values_replaces_lists_and_scalars() {
        let mut base = json!({"a": [1, 2], "b": {"c": 1, "d": 2}, "e": "x"});
        merge_values(&mut base, json!({"a": [3], "b": {"c": 9}, "e": {"nested": true}}));
        assert_eq!(
            base,
            json!({"a": [3], "b": {"c": 9, "d": 2}, "e": {"nested": true}})
        );
    }
}
