//! Secrets command - fetch secret keys
//!
//! Without a trailing command the decoded values are printed. With one,
//! they are published into this process's environment and the command is
//! run with it.

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use tracing::info;

use kubeutils::{FetchMode, KubeUtils, SecretMap, SecretResult, DEFAULT_SECRET_NAMESPACE};

use super::Context;
use crate::config::{load_secret_map, NAMESPACE_ENV, SECRETS_FILE_ENV};
use crate::{Error, Result};

/// Fetch secret keys
#[derive(Args, Debug)]
pub struct SecretsArgs {
    /// YAML mapping of namespace -> secret -> keys
    #[arg(short, long, env = SECRETS_FILE_ENV, conflicts_with_all = ["secret", "key"])]
    pub file: Option<PathBuf>,

    /// Single secret to read (with --key)
    #[arg(long, requires = "key")]
    pub secret: Option<String>,

    /// Key of the single secret
    #[arg(long, requires = "secret")]
    pub key: Option<String>,

    /// Namespace of the single secret
    #[arg(short, long, env = NAMESPACE_ENV, default_value = DEFAULT_SECRET_NAMESPACE)]
    pub namespace: String,

    /// How to schedule the fetches
    #[arg(long, value_enum, default_value = "concurrent")]
    pub mode: Mode,

    /// Output format when no command is given
    #[arg(short, long, value_enum, default_value = "env")]
    pub output: SecretsOutput,

    /// Command to run with the secrets in its environment
    #[arg(last = true)]
    pub command: Vec<String>,
}

/// Fetch scheduling
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// One task per key, completion order
    #[default]
    Concurrent,
    /// One key at a time, file order
    Sequential,
    /// One task per key, file order
    Ordered,
}

impl From<Mode> for FetchMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Concurrent => FetchMode::Concurrent,
            Mode::Sequential => FetchMode::Sequential,
            Mode::Ordered => FetchMode::Ordered,
        }
    }
}

/// Printed form of fetched secrets
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum SecretsOutput {
    /// KEY=value lines
    #[default]
    Env,
    /// JSON array of {namespace, key, value}
    Json,
}

impl SecretsArgs {
    /// The mapping to fetch, from the file or the single-secret flags
    pub fn secret_map(&self) -> Result<SecretMap> {
        if let Some(path) = &self.file {
            return load_secret_map(path);
        }
        match (&self.secret, &self.key) {
            (Some(secret), Some(key)) => {
                let mut map = SecretMap::new();
                map.entry(self.namespace.clone())
                    .or_default()
                    .insert(secret.clone(), vec![key.clone()]);
                Ok(map)
            }
            _ => Err(Error::validation(
                "either --file or --secret with --key is required",
            )),
        }
    }
}

/// Run the secrets command
pub async fn run(ctx: &Context, args: SecretsArgs) -> Result<()> {
    let secrets = args.secret_map()?;
    let utils = ctx.connect().await?;
    let publish = !args.command.is_empty();

    let results = fetch(&utils, &secrets, publish, args.mode).await?;

    if publish {
        return exec(&args.command).await;
    }
    println!("{}", render(&results, args.output)?);
    Ok(())
}

/// Fetch every key of `secrets`, publishing into the facade's environment
/// when `publish` is set
pub async fn fetch(
    utils: &KubeUtils,
    secrets: &SecretMap,
    publish: bool,
    mode: Mode,
) -> Result<Vec<SecretResult>> {
    let results = utils.download_secrets(secrets, publish, mode.into()).await?;
    info!(count = results.len(), "secrets downloaded");
    Ok(results)
}

/// Render fetched secrets
pub fn render(results: &[SecretResult], output: SecretsOutput) -> Result<String> {
    match output {
        SecretsOutput::Env => Ok(results
            .iter()
            .map(|r| format!("{}={}", r.key, r.value))
            .collect::<Vec<_>>()
            .join("\n")),
        SecretsOutput::Json => Ok(serde_json::to_string_pretty(results)?),
    }
}

async fn exec(command: &[String]) -> Result<()> {
    let Some((program, rest)) = command.split_first() else {
        return Err(Error::validation("no command given"));
    };

    info!(program = %program, "running command with secrets");
    let status = tokio::process::Command::new(program)
        .args(rest)
        .status()
        .await?;

    if status.success() {
        Ok(())
    } else {
        Err(Error::command_failed(format!("{} exited with {}", program, status)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use kubeutils::fake::FakeKubeApi;
    use kubeutils::MemoryEnvironment;
    use std::sync::Arc;

    #[derive(Parser, Debug)]
    struct Harness {
        #[command(flatten)]
        args: SecretsArgs,
    }

    fn parse(argv: &[&str]) -> std::result::Result<SecretsArgs, clap::Error> {
        let mut full = vec!["secrets"];
        full.extend_from_slice(argv);
        Harness::try_parse_from(full).map(|h| h.args)
    }

    #[test]
    fn single_secret_builds_one_entry_mapping() {
        let args = parse(&["--secret", "s3-secret", "--key", "S3_BUCKET_NAME", "-n", "spark"]).unwrap();
        let map = args.secret_map().unwrap();
        assert_eq!(map["spark"]["s3-secret"], vec!["S3_BUCKET_NAME"]);
    }

    #[test]
    fn secret_requires_key() {
        assert!(parse(&["--secret", "s3-secret"]).is_err());
    }

    #[test]
    fn file_conflicts_with_single_secret() {
        assert!(parse(&["--file", "s.yaml", "--secret", "a", "--key", "b"]).is_err());
    }

    #[test]
    fn trailing_command_is_captured() {
        let args = parse(&["--secret", "a", "--key", "b", "--", "python", "job.py", "--fast"]).unwrap();
        assert_eq!(args.command, vec!["python", "job.py", "--fast"]);
        assert_eq!(args.mode, Mode::Concurrent);
    }

    #[test]
    fn render_env_and_json() {
        let results = vec![SecretResult {
            namespace: "prefect".to_string(),
            key: "S3_BUCKET_NAME".to_string(),
            value: "bucket".to_string(),
        }];
        assert_eq!(render(&results, SecretsOutput::Env).unwrap(), "S3_BUCKET_NAME=bucket");

        let json: serde_json::Value =
            serde_json::from_str(&render(&results, SecretsOutput::Json).unwrap()).unwrap();
        assert_eq!(json[0]["namespace"], "prefect");
        assert_eq!(json[0]["value"], "bucket");
    }

    #[tokio::test]
    async fn fetch_publishes_only_when_asked() {
        let env = Arc::new(MemoryEnvironment::new());
        let api = FakeKubeApi::new().with_secret("prefect", "s3-secret", [("S3_BUCKET_NAME", "bucket")]);
        let utils = KubeUtils::new(Arc::new(api), env.clone());
        let map = parse(&["--secret", "s3-secret", "--key", "S3_BUCKET_NAME"])
            .unwrap()
            .secret_map()
            .unwrap();

        let results = fetch(&utils, &map, false, Mode::Sequential).await.unwrap();
        assert_eq!(results[0].value, "bucket");
        assert!(env.is_empty());

        fetch(&utils, &map, true, Mode::Ordered).await.unwrap();
        assert_eq!(env.get("S3_BUCKET_NAME").as_deref(), Some("bucket"));
    }
}
