//! Spark command - submit SparkApplications and follow their driver
//!
//! The manifest comes from `--manifest` (optionally merged over
//! `--base-manifest`, which rewrites the manifest file in place) or from the
//! bundled default. Script path, name, namespace, env and hadoop conf are
//! then set from flags.

use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use k8s_openapi::api::core::v1::{EnvFromSource, EnvVar, SecretEnvSource};
use tracing::{info, warn};

use kubeutils::naming::{compatible_application_name, new_run_id, script_postfix};
use kubeutils::{KubeUtils, PodQuery, SparkApplication, DEFAULT_SECRET_NAMESPACE};

use super::{follow_pod, Context, WaitArgs};
use crate::config::{key_values_to_map, parse_key_value, NAMESPACE_ENV};
use crate::Result;

/// Env var carrying the executor count into driver and executors
const NUM_EXECUTORS_ENV: &str = "NUM_EXECUTORS";

/// Submit Spark applications
#[derive(Args, Debug)]
pub struct SparkArgs {
    #[command(subcommand)]
    pub action: SparkAction,
}

/// Spark action
#[derive(Subcommand, Debug)]
pub enum SparkAction {
    /// Submit a SparkApplication, optionally following its driver log
    Submit(SubmitArgs),
}

/// Flags of `spark submit`
#[derive(Args, Debug, Clone)]
pub struct SubmitArgs {
    /// Application manifest (default: bundled manifest)
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Base manifest merged under --manifest; the merge is written back to --manifest
    #[arg(long, requires = "manifest")]
    pub base_manifest: Option<PathBuf>,

    /// Namespace to submit into
    #[arg(short, long, env = NAMESPACE_ENV, default_value = DEFAULT_SECRET_NAMESPACE)]
    pub namespace: String,

    /// Main application file, e.g. s3a://spark/scripts/etl.py
    #[arg(long)]
    pub script_path: String,

    /// Base of the generated application name
    #[arg(long)]
    pub name: String,

    /// Suffix appended to the generated name
    #[arg(long, conflicts_with = "script_body")]
    pub app_name: Option<String>,

    /// Derive the suffix from the script file name `{body}_{suffix}.py`
    #[arg(long)]
    pub script_body: Option<String>,

    /// Identity hashed into the name (default: generated per invocation)
    #[arg(long)]
    pub run_id: Option<String>,

    /// Env var for driver and executors (repeatable)
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Secret exposed as env to driver and executors (repeatable)
    #[arg(long = "env-from-secret", value_name = "SECRET")]
    pub env_from_secrets: Vec<String>,

    /// Hadoop configuration entry (repeatable)
    #[arg(long = "hadoop-conf", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub hadoop_conf: Vec<(String, String)>,

    /// Wait for the driver and follow its log
    #[arg(long)]
    pub follow: bool,

    #[command(flatten)]
    pub wait: WaitArgs,
}

/// Run the spark command
pub async fn run(ctx: &Context, args: SparkArgs) -> Result<()> {
    match args.action {
        SparkAction::Submit(args) => {
            let app = build_application(&args)?;
            let utils = ctx.connect().await?;
            let name = submit(&utils, &app, &args, |line| println!("{}", line)).await?;
            println!("{}", name);
            Ok(())
        }
    }
}

/// Kubernetes-compatible name for this submission
pub fn application_name(args: &SubmitArgs) -> Result<String> {
    let suffix = match (&args.app_name, &args.script_body) {
        (Some(app_name), _) => Some(app_name.clone()),
        (None, Some(body)) => {
            let script = Path::new(&args.script_path)
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_else(|| args.script_path.clone());
            script_postfix(&script, body)?
        }
        (None, None) => None,
    };
    let run_id = args.run_id.clone().unwrap_or_else(new_run_id);
    Ok(compatible_application_name(&args.name, suffix.as_deref(), &run_id))
}

/// Load the manifest and apply every flag to it
pub fn build_application(args: &SubmitArgs) -> Result<SparkApplication> {
    let mut app = match &args.manifest {
        Some(path) => {
            info!(manifest = %path.display(), "Use custom manifest.");
            if let Some(base) = &args.base_manifest {
                SparkApplication::merge_files(path, base)?;
            }
            SparkApplication::from_path(path)?
        }
        None => {
            info!("Use default manifest.");
            SparkApplication::default_manifest()?
        }
    };

    app.define_script_path(&args.script_path)?;
    if !args.hadoop_conf.is_empty() {
        app.define_hadoop_conf(&key_values_to_map(&args.hadoop_conf))?;
    }
    app.define_app_name(&application_name(args)?)?;
    app.define_namespace(&args.namespace)?;

    if !args.env_from_secrets.is_empty() {
        let sources: Vec<EnvFromSource> = args
            .env_from_secrets
            .iter()
            .map(|name| EnvFromSource {
                secret_ref: Some(SecretEnvSource {
                    name: name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect();
        app.define_container_env_from(&sources)?;
    }

    let mut env: Vec<EnvVar> = key_values_to_map(&args.env)
        .into_iter()
        .map(|(name, value)| EnvVar {
            name,
            value: Some(value),
            ..Default::default()
        })
        .collect();
    match app.executor_num() {
        Ok(num) => env.push(EnvVar {
            name: NUM_EXECUTORS_ENV.to_string(),
            value: Some(num),
            ..Default::default()
        }),
        Err(e) => warn!(error = %e, "{} not set", NUM_EXECUTORS_ENV),
    }
    if !env.is_empty() {
        app.define_container_env(&env)?;
    }

    Ok(app)
}

/// Submit `app`; with `--follow`, wait for its driver and pass filtered log
/// lines to `emit`. Returns the application name.
pub async fn submit<F>(
    utils: &KubeUtils,
    app: &SparkApplication,
    args: &SubmitArgs,
    emit: F,
) -> Result<String>
where
    F: FnMut(&str),
{
    utils.submit_application(app).await?;
    let name = app.name().unwrap_or_default().to_string();
    info!(application = %name, namespace = %args.namespace, "spark application created");

    if args.follow {
        let waiter = utils.pod_waiter()?;
        let query = PodQuery::spark_driver(args.namespace.as_str(), &name);
        follow_pod(&waiter, &query, &args.wait, emit).await?;
    }
    Ok(name)
}
