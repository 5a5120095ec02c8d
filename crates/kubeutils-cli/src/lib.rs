//! kubeutils CLI library

pub mod commands;
pub mod config;
pub mod error;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use commands::Context;

/// kubeutils - Kubernetes helpers for batch jobs
#[derive(Parser, Debug)]
#[command(name = "kubeutils")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to kubeconfig file (default: in-cluster, then $KUBECONFIG or ~/.kube/config)
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,
}

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable lines (default)
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch secret keys and print them or run a command with them in its environment
    Secrets(commands::secrets::SecretsArgs),
    /// Wait on, list or delete pods
    Pod(commands::pod::PodArgs),
    /// Submit Spark applications
    Spark(commands::spark::SparkArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, stopping waits");
                on_signal.cancel();
            }
        });

        let ctx = Context::new(self.kubeconfig, cancel);
        match self.command {
            Commands::Secrets(args) => commands::secrets::run(&ctx, args).await,
            Commands::Pod(args) => commands::pod::run(&ctx, args).await,
            Commands::Spark(args) => commands::spark::run(&ctx, args).await,
        }
    }
}
