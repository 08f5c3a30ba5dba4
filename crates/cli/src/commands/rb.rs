//! rb command - Remove bucket

use clap::Args;
use serde::Serialize;

use osc_core::{ListOptions, Result, TransportClient};

use super::{Context, report};
use crate::exit_code::ExitCode;

const DELETE_BATCH: usize = 1000;

/// Remove a bucket
#[derive(Args, Debug)]
pub struct RbArgs {
    /// Bucket name; defaults to `--bucket`
    pub bucket: Option<String>,

    /// Delete every object first
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
struct RbOutput {
    status: &'static str,
    bucket: String,
    objects_deleted: usize,
}

/// Remove `bucket`, emptying it first when `force` is set
///
/// Returns the number of objects deleted on the way.
pub async fn run(client: &TransportClient, bucket: &str, force: bool) -> Result<usize> {
    let mut deleted = 0;
    if force {
        let keys = client.list_objects(bucket, ListOptions::default()).await?;
        for batch in keys.chunks(DELETE_BATCH) {
            client.delete_objects(bucket, batch).await?;
            deleted += batch.len();
        }
    }
    client.delete_bucket(bucket).await?;
    Ok(deleted)
}

/// Execute the rb command
pub async fn execute(args: RbArgs, ctx: &Context) -> ExitCode {
    let formatter = ctx.formatter();

    let name = args.bucket.or_else(|| ctx.bucket.clone()).unwrap_or_default();
    let bucket = match osc_core::parse_remote(&name) {
        Ok(remote) if remote.key.is_empty() => remote.bucket,
        Ok(remote) => {
            formatter.error(&format!("'{remote}' is not a bucket name"));
            return ExitCode::UsageError;
        }
        Err(e) => return report(&formatter, "Invalid bucket", &e),
    };

    let session = match ctx.connect().await {
        Ok(session) => session,
        Err(e) => return report(&formatter, "Failed to connect", &e),
    };

    match run(&session.client, &bucket, args.force).await {
        Ok(objects_deleted) => {
            if formatter.is_json() {
                formatter.json(&RbOutput {
                    status: "success",
                    bucket,
                    objects_deleted,
                });
            } else {
                formatter.success(&format!("Bucket '{bucket}' removed."));
            }
            ExitCode::Success
        }
        Err(e) => report(&formatter, "Failed to remove bucket", &e),
    }
}
