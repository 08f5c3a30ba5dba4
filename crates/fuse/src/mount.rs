//! Mount point management
//!
//! Validates the mount point, translates options for `fuser` and keeps the
//! background session alive until the caller cancels or the filesystem is
//! unmounted from outside.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use osc_core::FilesystemAdapter;
use osc_core::config::MountConfig;

use crate::bridge::OscFilesystem;

/// Options for one mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    /// Allow other users to access the mount
    pub allow_other: bool,
    /// Unmount when the session ends
    pub auto_unmount: bool,
    /// Reject writes at the kernel level
    pub read_only: bool,
    /// How long the kernel may cache attributes and entries
    pub attr_ttl: Duration,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            allow_other: false,
            auto_unmount: true,
            read_only: false,
            attr_ttl: Duration::from_secs(1),
        }
    }
}

impl From<&MountConfig> for MountOptions {
    fn from(config: &MountConfig) -> Self {
        Self {
            allow_other: config.allow_other,
            auto_unmount: config.auto_unmount,
            ..Default::default()
        }
    }
}

/// Errors that can occur during mount operations
#[derive(Debug, Error)]
pub enum MountError {
    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Failed to mount {path}: {source}")]
    Mount {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// How often the background session is checked for an external unmount
const SESSION_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Why serving stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountExit {
    /// The caller's token fired
    Cancelled,
    /// The session ended on its own, e.g. after `umount`
    Unmounted,
}

/// Wait until `cancel` fires or `finished` reports the session is over
async fn wait_for_exit(cancel: &CancellationToken, finished: impl Fn() -> bool) -> MountExit {
    let mut ticker = tokio::time::interval(SESSION_POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return MountExit::Cancelled,
            _ = ticker.tick() => {
                if finished() {
                    return MountExit::Unmounted;
                }
            }
        }
    }
}

/// Check that `path` exists and is a directory
pub fn validate_mountpoint(path: &Path) -> Result<(), MountError> {
    if !path.exists() {
        return Err(MountError::PathNotFound(path.display().to_string()));
    }
    if !path.is_dir() {
        return Err(MountError::NotADirectory(path.display().to_string()));
    }
    Ok(())
}

/// Convert options to `fuser` mount options
pub fn options_to_fuser(opts: &MountOptions, bucket: &str) -> Vec<fuser::MountOption> {
    let mut fuser_opts = vec![
        fuser::MountOption::FSName(format!("osc:{bucket}")),
        fuser::MountOption::Subtype("osc".to_string()),
        fuser::MountOption::NoAtime,
    ];

    if opts.allow_other {
        fuser_opts.push(fuser::MountOption::AllowOther);
    }
    if opts.auto_unmount {
        fuser_opts.push(fuser::MountOption::AutoUnmount);
    }
    fuser_opts.push(if opts.read_only {
        fuser::MountOption::RO
    } else {
        fuser::MountOption::RW
    });

    fuser_opts
}

/// Mount `adapter` at `mountpoint` and serve until `cancel` fires or the
/// mount goes away
///
/// The `fuser` session runs on its own thread; dropping it unmounts.
pub async fn mount(
    adapter: Arc<FilesystemAdapter>,
    mountpoint: &Path,
    options: &MountOptions,
    cancel: CancellationToken,
) -> Result<(), MountError> {
    validate_mountpoint(mountpoint)?;

    let bucket = adapter.bucket().to_string();
    let filesystem = OscFilesystem::new(adapter, options.attr_ttl);
    let fuser_options = options_to_fuser(options, &bucket);

    let session = fuser::spawn_mount2(filesystem, mountpoint, &fuser_options).map_err(|source| {
        MountError::Mount {
            path: mountpoint.display().to_string(),
            source,
        }
    })?;
    tracing::info!(bucket = %bucket, mountpoint = %mountpoint.display(), "mounted");

    match wait_for_exit(&cancel, || session.guard.is_finished()).await {
        MountExit::Cancelled => {
            drop(session);
            tracing::info!(mountpoint = %mountpoint.display(), "unmounted");
        }
        MountExit::Unmounted => {
            tracing::info!(
                mountpoint = %mountpoint.display(),
                "filesystem unmounted externally"
            );
            match session.guard.join() {
                Ok(Err(e)) => tracing::warn!(error = %e, "session ended with an error"),
                Err(_) => tracing::warn!("session thread panicked"),
                Ok(Ok(())) => {}
            }
        }
    }
    Ok(())
}
