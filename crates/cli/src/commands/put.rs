//! put command - Upload a local file or stdin

use std::path::{Path, PathBuf};

use bytes::Bytes;
use clap::Args;
use serde::Serialize;
use tokio::io::AsyncReadExt;

use osc_core::{Error, RemotePath, Result, TransportClient};

use super::{Context, report};
use crate::exit_code::ExitCode;
use crate::output::Spinner;

/// Upload a file to an object
#[derive(Args, Debug)]
pub struct PutArgs {
    /// Local file, or `-` for stdin
    pub source: PathBuf,

    /// Destination (bucket/key, or bucket/prefix/ to keep the file name)
    pub target: String,
}

#[derive(Debug, Serialize)]
pub struct PutOutput {
    pub bucket: String,
    pub key: String,
    pub size_bytes: u64,
    pub size_human: String,
}

/// Key an upload of `source` lands on
///
/// A target naming a prefix (empty key or trailing `/`) keeps the source
/// file name.
pub fn target_key(source: &Path, target: &RemotePath) -> Result<String> {
    if !target.is_dir() {
        return Ok(target.key.clone());
    }

    let name = source
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| *name != "-")
        .ok_or_else(|| {
            Error::InvalidPath(format!(
                "cannot derive an object name from '{}'; give a full bucket/key target",
                source.display()
            ))
        })?;
    Ok(format!("{}{name}", target.key))
}

async fn read_source(source: &Path) -> Result<Bytes> {
    if source.as_os_str() == "-" {
        let mut buffer = Vec::new();
        tokio::io::stdin().read_to_end(&mut buffer).await?;
        return Ok(Bytes::from(buffer));
    }
    Ok(Bytes::from(tokio::fs::read(source).await?))
}

/// Upload `data` to `bucket/key`
pub async fn run(client: &TransportClient, bucket: &str, key: &str, data: Bytes) -> Result<PutOutput> {
    let size = data.len() as u64;
    client.put_object(bucket, key, data).await?;

    Ok(PutOutput {
        bucket: bucket.to_string(),
        key: key.to_string(),
        size_bytes: size,
        size_human: humansize::format_size(size, humansize::BINARY),
    })
}

/// Execute the put command
pub async fn execute(args: PutArgs, ctx: &Context) -> ExitCode {
    let formatter = ctx.formatter();

    let target = match ctx.remote(&args.target) {
        Ok(target) => target,
        Err(e) => return report(&formatter, "Invalid target", &e),
    };
    let key = match target_key(&args.source, &target) {
        Ok(key) => key,
        Err(e) => return report(&formatter, "Invalid target", &e),
    };

    let data = match read_source(&args.source).await {
        Ok(data) => data,
        Err(e) => {
            return report(
                &formatter,
                &format!("Failed to read '{}'", args.source.display()),
                &e,
            );
        }
    };

    let session = match ctx.connect().await {
        Ok(session) => session,
        Err(e) => return report(&formatter, "Failed to connect", &e),
    };

    let spinner = Spinner::new(formatter.config(), &format!("Uploading {}/{key}", target.bucket));
    let result = run(&session.client, &target.bucket, &key, data).await;
    spinner.finish_and_clear();

    match result {
        Ok(output) => {
            if formatter.is_json() {
                formatter.json(&output);
            } else {
                formatter.success(&format!(
                    "Uploaded {}/{} ({})",
                    output.bucket, output.key, output.size_human
                ));
            }
            ExitCode::Success
        }
        Err(e) => report(&formatter, &format!("Failed to upload {}/{key}", target.bucket), &e),
    }
}
