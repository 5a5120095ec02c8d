//! Pod command - wait on, list and delete pods

use clap::{Args, Subcommand};
use serde::Serialize;
use tracing::info;

use kubeutils::{KubeUtils, PodHandle, PodQuery, DEFAULT_SECRET_NAMESPACE};

use super::{follow_pod, Context, OutputFormat, WaitArgs};
use crate::config::NAMESPACE_ENV;
use crate::{Error, Result};

/// Wait on, list or delete pods
#[derive(Args, Debug)]
pub struct PodArgs {
    #[command(subcommand)]
    pub action: PodAction,
}

/// Pod action
#[derive(Subcommand, Debug)]
pub enum PodAction {
    /// Wait for a pod to run and follow its log
    Wait {
        /// Namespace to search
        #[arg(short, long, env = NAMESPACE_ENV, default_value = DEFAULT_SECRET_NAMESPACE)]
        namespace: String,

        /// Label selector of the pod
        #[arg(short = 'l', long, required_unless_present = "spark_app")]
        selector: Option<String>,

        /// Follow the driver of this SparkApplication
        #[arg(long, conflicts_with = "selector")]
        spark_app: Option<String>,

        #[command(flatten)]
        wait: WaitArgs,
    },
    /// List pods in all namespaces
    List {
        /// Label selector (default: every pod)
        #[arg(short = 'l', long, default_value = "")]
        selector: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        output: OutputFormat,
    },
    /// Delete a pod
    Delete {
        /// Pod name
        name: String,

        /// Namespace of the pod
        #[arg(short, long, env = NAMESPACE_ENV, default_value = DEFAULT_SECRET_NAMESPACE)]
        namespace: String,
    },
}

impl PodAction {
    /// Query selected by `wait` flags
    fn query(namespace: &str, selector: Option<&str>, spark_app: Option<&str>) -> Result<PodQuery> {
        match (selector, spark_app) {
            (_, Some(app)) => Ok(PodQuery::spark_driver(namespace, app)),
            (Some(selector), None) => Ok(PodQuery::new(namespace, selector)),
            (None, None) => Err(Error::validation("--selector or --spark-app is required")),
        }
    }
}

#[derive(Serialize)]
struct PodRow<'a> {
    namespace: &'a str,
    name: &'a str,
}

/// Run the pod command
pub async fn run(ctx: &Context, args: PodArgs) -> Result<()> {
    let utils = ctx.connect().await?;
    match args.action {
        PodAction::Wait {
            namespace,
            selector,
            spark_app,
            wait,
        } => {
            let query = PodAction::query(&namespace, selector.as_deref(), spark_app.as_deref())?;
            let waiter = utils.pod_waiter()?;
            follow_pod(&waiter, &query, &wait, |line| println!("{}", line)).await?;
            Ok(())
        }
        PodAction::List { selector, output } => {
            let pods = list(&utils, &selector).await?;
            println!("{}", render(&pods, output)?);
            Ok(())
        }
        PodAction::Delete { name, namespace } => {
            utils.delete_pod(&name, &namespace).await?;
            info!(pod = %name, namespace = %namespace, "pod deleted");
            Ok(())
        }
    }
}

/// Pods across all namespaces matching `selector`
pub async fn list(utils: &KubeUtils, selector: &str) -> Result<Vec<PodHandle>> {
    let mut pods = if selector.is_empty() {
        utils.list_all_pods().await?
    } else {
        utils.api()?.list_pods_all_namespaces(selector).await?
    };
    pods.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
    Ok(pods)
}

/// Render pods as an aligned table or JSON
pub fn render(pods: &[PodHandle], output: OutputFormat) -> Result<String> {
    match output {
        OutputFormat::Json => {
            let rows: Vec<PodRow<'_>> = pods
                .iter()
                .map(|p| PodRow {
                    namespace: &p.namespace,
                    name: &p.name,
                })
                .collect();
            Ok(serde_json::to_string_pretty(&rows)?)
        }
        OutputFormat::Table => {
            let width = pods
                .iter()
                .map(|p| p.namespace.len())
                .chain(std::iter::once("NAMESPACE".len()))
                .max()
                .unwrap_or_default();
            let mut lines = vec![format!("{:<width$}  NAME", "NAMESPACE", width = width)];
            lines.extend(
                pods.iter()
                    .map(|p| format!("{:<width$}  {}", p.namespace, p.name, width = width)),
            );
            Ok(lines.join("\n"))
        }
    }
}
