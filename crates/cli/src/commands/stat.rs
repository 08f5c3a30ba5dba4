//! stat command - Show object or bucket metadata

use clap::Args;
use serde::Serialize;

use osc_core::{ObjectMetadata, Result, TransportClient};

use super::{Context, report};
use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Show metadata
#[derive(Args, Debug)]
pub struct StatArgs {
    /// Object (bucket/key) or bucket
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct StatOutput {
    pub name: String,
    pub size_bytes: u64,
    pub size_human: String,
    pub compressed: bool,
    /// Decompressed size, present for compressed objects
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
}

impl StatOutput {
    fn new(name: String, metadata: ObjectMetadata) -> Self {
        let compressed = metadata.is_compressed();
        let original_size_bytes = compressed.then(|| metadata.logical_size()).flatten();
        Self {
            name,
            size_bytes: metadata.size,
            size_human: humansize::format_size(metadata.size, humansize::BINARY),
            compressed,
            original_size_bytes,
            last_modified: metadata.last_modified.map(|ts| ts.to_string()),
            etag: metadata.etag,
            content_type: metadata.content_type,
            content_encoding: metadata.content_encoding,
        }
    }
}

#[derive(Debug, Serialize)]
struct BucketStat {
    bucket: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<String>,
}

/// Metadata of one object
///
/// The reported size is the stored size; compressed objects also carry the
/// size a get returns when it was recorded at upload.
pub async fn run(client: &TransportClient, bucket: &str, key: &str) -> Result<StatOutput> {
    let metadata = client.head_object(bucket, key).await?;
    Ok(StatOutput::new(format!("{bucket}/{key}"), metadata))
}

fn print_object(formatter: &Formatter, output: &StatOutput) {
    formatter.println(&format!("Name      : {}", output.name));
    if let Some(modified) = &output.last_modified {
        formatter.println(&format!("Date      : {modified}"));
    }
    formatter.println(&format!(
        "Size      : {} ({} bytes stored)",
        output.size_human, output.size_bytes
    ));
    formatter.println(&format!(
        "Compressed: {}",
        if output.compressed { "yes" } else { "no" }
    ));
    if let Some(original) = output.original_size_bytes {
        formatter.println(&format!(
            "Original  : {} ({original} bytes)",
            humansize::format_size(original, humansize::BINARY)
        ));
    }
    if let Some(etag) = &output.etag {
        formatter.println(&format!("ETag      : {etag}"));
    }
    if let Some(content_type) = &output.content_type {
        formatter.println(&format!("Type      : {content_type}"));
    }
}

/// Execute the stat command
pub async fn execute(args: StatArgs, ctx: &Context) -> ExitCode {
    let formatter = ctx.formatter();

    let remote = match ctx.remote(&args.path) {
        Ok(remote) => remote,
        Err(e) => return report(&formatter, "Invalid path", &e),
    };

    let session = match ctx.connect().await {
        Ok(session) => session,
        Err(e) => return report(&formatter, "Failed to connect", &e),
    };

    if remote.key.is_empty() {
        return match session.client.head_bucket(&remote.bucket).await {
            Ok(info) => {
                let output = BucketStat {
                    bucket: info.name,
                    region: info.region,
                };
                if formatter.is_json() {
                    formatter.json(&output);
                } else {
                    formatter.println(&format!("Bucket    : {}", output.bucket));
                    if let Some(region) = &output.region {
                        formatter.println(&format!("Region    : {region}"));
                    }
                }
                ExitCode::Success
            }
            Err(e) => report(&formatter, "Failed to stat bucket", &e),
        };
    }

    match run(&session.client, &remote.bucket, &remote.key).await {
        Ok(output) => {
            if formatter.is_json() {
                formatter.json(&output);
            } else {
                print_object(&formatter, &output);
            }
            ExitCode::Success
        }
        Err(e) => report(&formatter, &format!("Failed to stat {remote}"), &e),
    }
}
