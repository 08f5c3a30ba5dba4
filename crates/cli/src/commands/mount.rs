//! mount command - Serve a bucket as a directory tree
//!
//! Blocks until Ctrl+C, then unmounts. Returns early if the mount is removed
//! from outside, e.g. with `umount`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;

use osc_core::config::MountConfig;
use osc_core::{ExistenceCache, FilesystemAdapter};
use osc_fuse::{MountError, MountOptions};

use super::{Context, report};
use crate::exit_code::ExitCode;

/// Mount a bucket
#[derive(Args, Debug)]
pub struct MountArgs {
    /// Empty directory to mount on
    pub mountpoint: PathBuf,

    /// Allow other users to access the mount
    #[arg(long)]
    pub allow_other: bool,

    /// Mount read-only
    #[arg(long)]
    pub read_only: bool,

    /// Seconds a lookup verdict stays cached (config default: 60)
    #[arg(long)]
    pub cache_ttl: Option<u64>,

    /// Seconds the kernel may cache attributes
    #[arg(long, default_value_t = 1)]
    pub attr_ttl: u64,
}

impl MountArgs {
    /// Combine command-line flags with the `[mount]` configuration
    pub fn options(&self, config: &MountConfig) -> MountOptions {
        let mut options = MountOptions::from(config);
        options.allow_other |= self.allow_other;
        options.read_only = self.read_only;
        options.attr_ttl = Duration::from_secs(self.attr_ttl);
        options
    }

    pub fn cache_ttl(&self, config: &MountConfig) -> Duration {
        self.cache_ttl
            .map(Duration::from_secs)
            .unwrap_or_else(|| config.cache_ttl())
    }
}

fn mount_exit_code(err: &MountError) -> ExitCode {
    match err {
        MountError::PathNotFound(_) => ExitCode::NotFound,
        MountError::NotADirectory(_) => ExitCode::UsageError,
        MountError::Mount { .. } => ExitCode::GeneralError,
    }
}

/// Execute the mount command
pub async fn execute(args: MountArgs, ctx: &Context) -> ExitCode {
    let formatter = ctx.formatter();

    let Some(bucket) = ctx.bucket.clone() else {
        formatter.error("mount needs a bucket: pass --bucket or set OSC_BUCKET");
        return ExitCode::UsageError;
    };
    if let Err(e) = osc_fuse::mount::validate_mountpoint(&args.mountpoint) {
        formatter.error(&e.to_string());
        return mount_exit_code(&e);
    }

    let session = match ctx.connect().await {
        Ok(session) => session,
        Err(e) => return report(&formatter, "Failed to connect", &e),
    };
    if let Err(e) = session.client.head_bucket(&bucket).await {
        return report(&formatter, "Cannot mount bucket", &e);
    }

    let cache = Arc::new(ExistenceCache::new(args.cache_ttl(&session.config.mount)));
    let adapter = Arc::new(FilesystemAdapter::with_cache(
        session.client.clone(),
        bucket.clone(),
        cache,
    ));
    let options = args.options(&session.config.mount);

    formatter.success(&format!(
        "Mounting '{bucket}' on {} (Ctrl+C to unmount)",
        args.mountpoint.display()
    ));

    match osc_fuse::mount(adapter, &args.mountpoint, &options, ctx.cancel.clone()).await {
        Ok(()) => {
            formatter.success(&format!("Unmounted {}", args.mountpoint.display()));
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&e.to_string());
            mount_exit_code(&e)
        }
    }
}
