//! mb command - Make bucket

use clap::Args;
use serde::Serialize;

use osc_core::{Code, Result, TransportClient};

use super::{Context, report};
use crate::exit_code::ExitCode;

/// Create a bucket
#[derive(Args, Debug)]
pub struct MbArgs {
    /// Bucket name; defaults to `--bucket`
    pub bucket: Option<String>,

    /// Succeed if the bucket already exists
    #[arg(short = 'p', long)]
    pub ignore_existing: bool,
}

#[derive(Debug, Serialize)]
struct MbOutput {
    status: &'static str,
    bucket: String,
    created: bool,
}

/// Create `bucket`; returns whether it was newly created
pub async fn run(client: &TransportClient, bucket: &str, ignore_existing: bool) -> Result<bool> {
    match client.create_bucket(bucket).await {
        Ok(()) => Ok(true),
        Err(e) if ignore_existing && e.code() == Code::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

/// Execute the mb command
pub async fn execute(args: MbArgs, ctx: &Context) -> ExitCode {
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

    match run(&session.client, &bucket, args.ignore_existing).await {
        Ok(created) => {
            if formatter.is_json() {
                formatter.json(&MbOutput {
                    status: "success",
                    bucket,
                    created,
                });
            } else if created {
                formatter.success(&format!("Bucket '{bucket}' created."));
            } else {
                formatter.success(&format!("Bucket '{bucket}' already exists."));
            }
            ExitCode::Success
        }
        Err(e) => report(&formatter, "Failed to create bucket", &e),
    }
}
