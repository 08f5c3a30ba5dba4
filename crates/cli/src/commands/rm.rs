//! rm command - Remove objects

use clap::Args;
use serde::Serialize;

use osc_core::{Error, ListOptions, Result, TransportClient, path};

use super::{Context, report};
use crate::exit_code::ExitCode;

/// Keys per batched delete request
const DELETE_BATCH: usize = 1000;

/// Remove objects
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Objects to remove (bucket/key)
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Remove every key under the given prefix
    #[arg(short, long)]
    pub recursive: bool,

    /// Ignore objects that do not exist
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
struct RmOutput {
    deleted: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failed: Vec<String>,
}

/// Remove one object; a missing object is an error unless `force` is set
///
/// Returns the removed keys.
pub async fn run(client: &TransportClient, bucket: &str, key: &str, force: bool) -> Result<Vec<String>> {
    match client.head_object(bucket, key).await {
        Ok(_) => {}
        Err(e) if e.is_not_found() && force => return Ok(Vec::new()),
        Err(e) => return Err(e),
    }
    client.delete_object(bucket, key).await?;
    Ok(vec![key.to_string()])
}

/// Remove every key under `prefix`, including a directory marker
pub async fn run_recursive(client: &TransportClient, bucket: &str, prefix: &str) -> Result<Vec<String>> {
    let prefix = path::dir_prefix(prefix.trim_end_matches('/'));
    let keys = client
        .list_objects(bucket, ListOptions::with_prefix(&prefix))
        .await?;
    if keys.is_empty() {
        return Err(Error::not_found(format!("no objects under {bucket}/{prefix}")));
    }

    for batch in keys.chunks(DELETE_BATCH) {
        client.delete_objects(bucket, batch).await?;
    }
    tracing::debug!(bucket, prefix = %prefix, count = keys.len(), "removed prefix");
    Ok(keys)
}

/// Execute the rm command
pub async fn execute(args: RmArgs, ctx: &Context) -> ExitCode {
    let formatter = ctx.formatter();

    let mut targets = Vec::with_capacity(args.paths.len());
    for location in &args.paths {
        match ctx.object(location) {
            Ok(remote) => targets.push(remote),
            Err(e) => return report(&formatter, "Invalid path", &e),
        }
    }

    let session = match ctx.connect().await {
        Ok(session) => session,
        Err(e) => return report(&formatter, "Failed to connect", &e),
    };

    let mut deleted = Vec::new();
    let mut failed = Vec::new();
    let mut exit_code = ExitCode::Success;

    for target in &targets {
        let result = if args.recursive {
            run_recursive(&session.client, &target.bucket, &target.key).await
        } else {
            run(&session.client, &target.bucket, &target.key, args.force).await
        };

        match result {
            Ok(keys) => {
                for key in keys {
                    formatter.success(&format!("Removed {}/{key}", target.bucket));
                    deleted.push(format!("{}/{key}", target.bucket));
                }
            }
            Err(e) if e.is_not_found() && args.force => {}
            Err(e) => {
                exit_code = report(&formatter, &format!("Failed to remove {target}"), &e);
                failed.push(target.to_string());
                if matches!(e, Error::Cancelled) {
                    break;
                }
            }
        }
    }

    if formatter.is_json() {
        formatter.json(&RmOutput { deleted, failed });
    }
    exit_code
}
