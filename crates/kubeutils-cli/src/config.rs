//! CLI configuration inputs
//!
//! Secrets to fetch are described by a YAML mapping of
//! namespace -> secret name -> keys:
//!
//! ```yaml
//! prefect:
//!   s3-secret:
//!     - S3_ENDPOINT_URL
//!     - S3_ACCESS_KEY
//! ```
//!
//! Namespaces default from environment variables so the same invocation
//! works across deployments:
//! - `KUBEUTILS_NAMESPACE` for secrets and pods (fallback `prefect`)
//! - `KUBEUTILS_SECRETS_FILE` for the secrets mapping

use std::collections::BTreeMap;
use std::path::Path;

use kubeutils::SecretMap;

use crate::{Error, Result};

/// Environment variable holding the default namespace
pub const NAMESPACE_ENV: &str = "KUBEUTILS_NAMESPACE";

/// Environment variable holding the default secrets mapping path
pub const SECRETS_FILE_ENV: &str = "KUBEUTILS_SECRETS_FILE";

/// Load a secrets mapping from a YAML file
pub fn load_secret_map(path: &Path) -> Result<SecretMap> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| Error::secrets_file(path, format!("failed to read: {}", e)))?;
    parse_secret_map(&data).map_err(|message| Error::secrets_file(path, message))
}

/// Parse a secrets mapping, rejecting blank names
pub fn parse_secret_map(yaml: &str) -> std::result::Result<SecretMap, String> {
    if yaml.trim().is_empty() {
        return Ok(SecretMap::new());
    }
    let map: SecretMap = serde_yaml::from_str(yaml).map_err(|e| e.to_string())?;

    for (namespace, secrets) in &map {
        if namespace.trim().is_empty() {
            return Err("namespace must not be empty".to_string());
        }
        for (name, keys) in secrets {
            if name.trim().is_empty() {
                return Err(format!("secret name in namespace {} must not be empty", namespace));
            }
            if keys.iter().any(|k| k.trim().is_empty()) {
                return Err(format!("secret {}/{} lists an empty key", namespace, name));
            }
        }
    }
    Ok(map)
}

/// Parse a `KEY=VALUE` argument
pub fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

/// Collect `KEY=VALUE` pairs, later pairs overriding earlier ones
pub fn key_values_to_map(pairs: &[(String, String)]) -> BTreeMap<String, String> {
    pairs.iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn secrets_mapping_parses_nested_yaml() {
        let map = parse_secret_map(
            "prefect:\n  s3-secret:\n    - S3_ENDPOINT_URL\n    - S3_ACCESS_KEY\nspark:\n  oracle-secret: [ORACLE_HOST]\n",
        )
        .unwrap();
        assert_eq!(
            map["prefect"]["s3-secret"],
            vec!["S3_ENDPOINT_URL", "S3_ACCESS_KEY"]
        );
        assert_eq!(map["spark"]["oracle-secret"], vec!["ORACLE_HOST"]);
    }

    #[tokio::test]
    async fn sequential_fetch_follows_file_order() {
        use kubeutils::fake::FakeKubeApi;
        use kubeutils::{FetchMode, KubeUtils, MemoryEnvironment, SecretRequestSpace};
        use std::sync::Arc;

        let map = parse_secret_map(
            "zeta:\n  z-secret: [Z_KEY]\nalpha:\n  a-secret: [A_KEY, B_KEY]\n",
        )
        .unwrap();
        let flattened: Vec<_> = SecretRequestSpace::from(&map)
            .iter()
            .map(|r| r.secret_key.clone())
            .collect();
        assert_eq!(flattened, vec!["Z_KEY", "A_KEY", "B_KEY"]);

        let api = FakeKubeApi::new()
            .with_secret("zeta", "z-secret", [("Z_KEY", "z")])
            .with_secret("alpha", "a-secret", [("A_KEY", "a"), ("B_KEY", "b")]);
        let utils = KubeUtils::new(Arc::new(api), Arc::new(MemoryEnvironment::new()));
        let results = utils
            .download_secrets(&map, false, FetchMode::Sequential)
            .await
            .unwrap();
        let namespaces: Vec<_> = results.iter().map(|r| r.namespace.as_str()).collect();
        assert_eq!(namespaces, vec!["zeta", "alpha", "alpha"]);
    }

    #[test]
    fn empty_secrets_file_is_an_empty_mapping() {
        assert!(parse_secret_map("").unwrap().is_empty());
        assert!(parse_secret_map("  \n").unwrap().is_empty());
    }

    #[rstest]
    #[case("- just\n- a list\n")]
    #[case("prefect:\n  s3-secret: not-a-list\n")]
    #[case("prefect:\n  s3-secret: ['']\n")]
    #[case("'':\n  s3-secret: [KEY]\n")]
    fn malformed_secrets_mapping_is_rejected(#[case] yaml: &str) {
        assert!(parse_secret_map(yaml).is_err());
    }

    #[test]
    fn load_secret_map_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.yaml");
        std::fs::write(&path, "prefect: [oops]\n").unwrap();

        let err = load_secret_map(&path).unwrap_err();
        assert!(matches!(err, Error::SecretsFile { .. }));
        assert!(err.to_string().contains("secrets.yaml"));

        std::fs::write(&path, "prefect:\n  s3-secret: [S3_BUCKET_NAME]\n").unwrap();
        assert_eq!(load_secret_map(&path).unwrap().len(), 1);
    }

    #[rstest]
    #[case("FLOW_NAME=etl", ("FLOW_NAME", "etl"))]
    #[case("fs.s3a.endpoint=https://s3/bucket?x=1", ("fs.s3a.endpoint", "https://s3/bucket?x=1"))]
    #[case("EMPTY=", ("EMPTY", ""))]
    fn key_value_splits_on_first_equals(#[case] raw: &str, #[case] expected: (&str, &str)) {
        let (k, v) = parse_key_value(raw).unwrap();
        assert_eq!((k.as_str(), v.as_str()), expected);
    }

    #[rstest]
    #[case("NO_EQUALS")]
    #[case("=value")]
    fn key_value_rejects_malformed(#[case] raw: &str) {
        assert!(parse_key_value(raw).is_err());
    }

    #[test]
    fn later_pairs_override_earlier() {
        let pairs = vec![
            ("A".to_string(), "1".to_string()),
            ("A".to_string(), "2".to_string()),
        ];
        assert_eq!(key_values_to_map(&pairs)["A"], "2");
    }
}
