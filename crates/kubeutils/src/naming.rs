//! Kubernetes-compatible SparkApplication names
//!
//! Object names are capped at 63 characters and the Spark UI service adds
//! its own postfix, so generated names are truncated and made unique with a
//! short md5 hash of the run identity.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::Error;

/// Longest name the API server accepts for the generated services
pub const MAX_NAME_LENGTH: usize = 63;

/// Length reserved for the `-ui-svc` postfix of the Spark UI service
pub const UI_POSTFIX_LENGTH: usize = 7;

/// Hex digits of the md5 hash kept in the name
pub const HASH_LENGTH: usize = 6;

/// Build `{base}-{hash}[-{app_name}]` with the base truncated to fit.
///
/// When `app_name` alone exceeds the budget the base collapses to nothing;
/// the app name itself is never truncated.
pub fn compatible_application_name(
    base_name: &str,
    app_name: Option<&str>,
    name_to_hash: &str,
) -> String {
    let app_name = app_name.filter(|a| !a.is_empty());
    let digest = format!("{:x}", md5::compute(name_to_hash.as_bytes()));
    let hash: String = digest.chars().take(HASH_LENGTH).collect();

    let app_len = app_name.map_or(0, |a| a.chars().count() + 1);
    let budget = MAX_NAME_LENGTH
        .saturating_sub(UI_POSTFIX_LENGTH)
        .saturating_sub(hash.len() + 1)
        .saturating_sub(app_len);
    let base: String = base_name.chars().take(budget).collect();

    match app_name {
        Some(app) => format!("{}-{}-{}", base, hash, app),
        None => format!("{}-{}", base, hash),
    }
}

/// Fresh run identity for jobs submitted without one: the first
/// [`HASH_LENGTH`] hex digits of md5 over the wall clock and process id
pub fn new_run_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    run_id_from(&format!("{}-{}", nanos, std::process::id()))
}

fn run_id_from(seed: &str) -> String {
    format!("{:x}", md5::compute(seed.as_bytes()))
        .chars()
        .take(HASH_LENGTH)
        .collect()
}

/// Postfix of a script named `{body}[_{postfix}].{ext}`.
///
/// `Ok(None)` when the name is exactly the body. Names that do not start
/// with the body, or repeat it, are rejected.
pub fn script_postfix(script_name: &str, body_convention: &str) -> Result<Option<String>, Error> {
    if body_convention.is_empty() {
        return Err(Error::validation("script body convention must not be empty"));
    }

    let stem = script_name.split('.').next().unwrap_or_default();
    let parts: Vec<&str> = stem.split(body_convention).collect();
    let [prefix, rest] = parts.as_slice() else {
        return Err(Error::validation(format!(
            "script '{}' must contain '{}' exactly once",
            script_name, body_convention
        )));
    };

    if !prefix.is_empty() {
        return Err(Error::validation(format!(
            "script '{}' broke the name convention: expected it to start with '{}'",
            script_name, body_convention
        )));
    }

    let postfix: String = rest.chars().skip(1).collect();
    Ok((!rest.is_empty()).then_some(postfix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    // md5("test") = 098f6bcd4621d373cade4e832627b4f6
    const TEST_HASH: &str = "098f6b";

    #[test]
    fn run_id_is_a_short_md5_prefix() {
        assert_eq!(run_id_from("test"), TEST_HASH);
        let id = new_run_id();
        assert_eq!(id.len(), HASH_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn short_base_is_kept_whole() {
        assert_eq!(
            compatible_application_name("spark-etl", Some("daily"), "test"),
            format!("spark-etl-{}-daily", TEST_HASH)
        );
        assert_eq!(
            compatible_application_name("spark-etl", None, "test"),
            format!("spark-etl-{}", TEST_HASH)
        );
    }

    #[test]
    fn empty_app_name_is_treated_as_absent() {
        assert_eq!(
            compatible_application_name("spark-etl", Some(""), "test"),
            compatible_application_name("spark-etl", None, "test")
        );
    }

    #[test]
    fn long_base_leaves_room_for_ui_postfix() {
        let base = "a".repeat(100);
        let name = compatible_application_name(&base, None, "test");
        assert_eq!(name.len(), MAX_NAME_LENGTH - UI_POSTFIX_LENGTH);
        assert!(name.ends_with(&format!("-{}", TEST_HASH)));

        let name = compatible_application_name(&base, Some("report"), "test");
        assert_eq!(name.len(), MAX_NAME_LENGTH - UI_POSTFIX_LENGTH);
        assert!(name.ends_with(&format!("-{}-report", TEST_HASH)));
    }

    #[test]
    fn oversized_app_name_drops_the_base() {
        let app = "x".repeat(60);
        let name = compatible_application_name("spark-etl", Some(&app), "test");
        assert_eq!(name, format!("-{}-{}", TEST_HASH, app));
    }

    #[test]
    fn hash_separates_runs_with_same_base() {
        let a = compatible_application_name("spark-etl", None, "flow-run-1");
        let b = compatible_application_name("spark-etl", None, "flow-run-2");
        assert_ne!(a, b);
    }

    #[rstest]
    #[case("pool_etl.py", "pool_etl", None)]
    #[case("pool_etl_daily.py", "pool_etl", Some("daily"))]
    #[case("pool_etl_daily_v2.py", "pool_etl", Some("daily_v2"))]
    #[case("pool_etl", "pool_etl", None)]
    fn postfix_follows_the_body(
        #[case] script: &str,
        #[case] body: &str,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(
            script_postfix(script, body).unwrap().as_deref(),
            expected
        );
    }

    #[rstest]
    #[case("my_pool_etl.py", "pool_etl")]
    #[case("report.py", "pool_etl")]
    #[case("pool_etl_pool_etl.py", "pool_etl")]
    #[case("pool_etl.py", "")]
    fn broken_convention_is_rejected(#[case] script: &str, #[case] body: &str) {
        assert!(matches!(
            script_postfix(script, body),
            Err(Error::Validation { .. })
        ));
    }
}
