//! CLI command definitions and execution
//!
//! Each command module exposes an `execute` entry point that reports through
//! a [`Formatter`] and returns an [`ExitCode`]. Commands that talk to the
//! service also expose a `run` function taking a [`TransportClient`], so the
//! same logic can be driven against any `ObjectService`.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use osc_core::{Config, ConfigManager, Error, RemotePath, Result, TransportClient, path};
use osc_s3::S3Client;

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

pub mod completions;
pub mod get;
pub mod ls;
pub mod mb;
pub mod mount;
pub mod put;
pub mod rb;
pub mod rm;
pub mod stat;

/// osc - object storage cache client
///
/// Transfers objects with transparent compression and mounts a bucket as a
/// directory tree.
#[derive(Parser, Debug)]
#[command(name = "osc")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format: human-readable or JSON
    #[arg(long, global = true, default_value = "false")]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true, default_value = "false")]
    pub no_color: bool,

    /// Disable spinners
    #[arg(long, global = true, default_value = "false")]
    pub no_progress: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true, default_value = "false")]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long, global = true, default_value = "false")]
    pub debug: bool,

    /// Default bucket; paths are then read as keys inside it
    #[arg(short, long, global = true, env = "OSC_BUCKET")]
    pub bucket: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mount a bucket as a directory tree
    Mount(mount::MountArgs),

    /// Upload a local file or stdin to an object
    Put(put::PutArgs),

    /// Download an object to a local file or stdout
    Get(get::GetArgs),

    /// List buckets or keys
    Ls(ls::LsArgs),

    /// Remove objects
    Rm(rm::RmArgs),

    /// Show object or bucket metadata
    Stat(stat::StatArgs),

    /// Create a bucket
    Mb(mb::MbArgs),

    /// Remove a bucket
    Rb(rb::RbArgs),

    /// Generate shell completion scripts
    Completions(completions::CompletionsArgs),
}

/// Settings shared by every command of one invocation
#[derive(Debug, Clone)]
pub struct Context {
    pub output: OutputConfig,
    pub bucket: Option<String>,
    pub cancel: CancellationToken,
}

/// Loaded configuration plus a client bound to it
pub struct Session {
    pub config: Config,
    pub client: TransportClient,
}

impl Context {
    pub fn new(output: OutputConfig, bucket: Option<String>) -> Self {
        Self {
            output,
            bucket,
            cancel: CancellationToken::new(),
        }
    }

    pub fn formatter(&self) -> Formatter {
        Formatter::new(self.output.clone())
    }

    /// Parse a command-line location, honoring `--bucket`
    pub fn remote(&self, location: &str) -> Result<RemotePath> {
        match &self.bucket {
            Some(bucket) => path::parse_remote(&path::join(bucket, location.trim_start_matches('/'))),
            None => path::parse_remote(location),
        }
    }

    /// Like [`Context::remote`] but the location must name an object
    pub fn object(&self, location: &str) -> Result<RemotePath> {
        let remote = self.remote(location)?;
        if remote.key.is_empty() {
            return Err(Error::InvalidPath(format!(
                "'{location}' is missing an object key. Use format: bucket/key"
            )));
        }
        Ok(remote)
    }

    /// Load the configuration and build a client for the configured endpoint
    pub async fn connect(&self) -> Result<Session> {
        let config = ConfigManager::new()?.load()?;
        let service = S3Client::new(&config.endpoint).await?;
        let client = TransportClient::from_config(Arc::new(service), &config)
            .with_cancellation(self.cancel.clone());
        Ok(Session { config, client })
    }
}

/// Print `err` with some context and pick the matching exit code
pub(crate) fn report(formatter: &Formatter, context: &str, err: &Error) -> ExitCode {
    formatter.error(&format!("{context}: {err}"));
    ExitCode::from_error(err)
}

/// Execute the CLI command and return an exit code
pub async fn execute(cli: Cli) -> ExitCode {
    let output = OutputConfig {
        json: cli.json,
        no_color: cli.no_color,
        no_progress: cli.no_progress,
        quiet: cli.quiet,
    };
    let ctx = Context::new(output, cli.bucket);

    let interrupt = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("interrupt received");
            interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Mount(args) => mount::execute(args, &ctx).await,
        Commands::Put(args) => put::execute(args, &ctx).await,
        Commands::Get(args) => get::execute(args, &ctx).await,
        Commands::Ls(args) => ls::execute(args, &ctx).await,
        Commands::Rm(args) => rm::execute(args, &ctx).await,
        Commands::Stat(args) => stat::execute(args, &ctx).await,
        Commands::Mb(args) => mb::execute(args, &ctx).await,
        Commands::Rb(args) => rb::execute(args, &ctx).await,
        Commands::Completions(args) => completions::execute(args),
    }
}
