//! get command - Download an object

use std::path::PathBuf;

use bytes::Bytes;
use clap::Args;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use osc_core::{Error, Result, TransportClient, path};

use super::{Context, report};
use crate::exit_code::ExitCode;
use crate::output::Spinner;

/// Download an object
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Source object (bucket/key)
    pub source: String,

    /// Local destination; stdout when omitted or `-`
    pub target: Option<PathBuf>,

    /// HTTP byte range, e.g. `bytes=0-1023`
    ///
    /// Ranges address stored bytes and fail on objects uploaded compressed.
    #[arg(long)]
    pub range: Option<String>,
}

#[derive(Debug, Serialize)]
struct GetOutput {
    bucket: String,
    key: String,
    target: String,
    size_bytes: u64,
    size_human: String,
}

/// Fetch an object, or a byte range of it
pub async fn run(
    client: &TransportClient,
    bucket: &str,
    key: &str,
    range: Option<&str>,
) -> Result<Bytes> {
    match range {
        Some(range) => client.get_object_range(bucket, key, range).await,
        None => client.get_object(bucket, key).await,
    }
}

/// Resolve where a download is written; `None` means stdout
fn destination(target: Option<PathBuf>, key: &str) -> Option<PathBuf> {
    let target = target.filter(|t| t.as_os_str() != "-")?;
    if target.is_dir() {
        Some(target.join(path::file_name(key)))
    } else {
        Some(target)
    }
}

async fn write_to_stdout(data: &[u8]) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(data).await?;
    stdout.flush().await
}

/// Execute the get command
pub async fn execute(args: GetArgs, ctx: &Context) -> ExitCode {
    let formatter = ctx.formatter();

    let source = match ctx.object(&args.source) {
        Ok(source) => source,
        Err(e) => return report(&formatter, "Invalid source", &e),
    };

    let session = match ctx.connect().await {
        Ok(session) => session,
        Err(e) => return report(&formatter, "Failed to connect", &e),
    };

    let destination = destination(args.target, &source.key);

    let spinner = destination
        .as_ref()
        .map(|_| Spinner::new(formatter.config(), &format!("Downloading {source}")));
    let result = run(
        &session.client,
        &source.bucket,
        &source.key,
        args.range.as_deref(),
    )
    .await;
    drop(spinner);

    let data = match result {
        Ok(data) => data,
        Err(e) => return report(&formatter, &format!("Failed to download {source}"), &e),
    };

    let Some(destination) = destination else {
        return match write_to_stdout(&data).await {
            Ok(()) => ExitCode::Success,
            Err(e) => report(&formatter, "Failed to write to stdout", &Error::from(e)),
        };
    };

    if let Err(e) = tokio::fs::write(&destination, &data).await {
        return report(
            &formatter,
            &format!("Failed to write '{}'", destination.display()),
            &Error::from(e),
        );
    }

    let size = data.len() as u64;
    if formatter.is_json() {
        formatter.json(&GetOutput {
            bucket: source.bucket.clone(),
            key: source.key.clone(),
            target: destination.display().to_string(),
            size_bytes: size,
            size_human: humansize::format_size(size, humansize::BINARY),
        });
    } else {
        formatter.success(&format!(
            "Downloaded {source} to {} ({})",
            destination.display(),
            humansize::format_size(size, humansize::BINARY)
        ));
    }
    ExitCode::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_destination_stdout() {
        assert_eq!(destination(None, "a/b.txt"), None);
        assert_eq!(destination(Some(PathBuf::from("-")), "a/b.txt"), None);
    }

    #[test]
    fn test_destination_into_directory() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            destination(Some(dir.path().to_path_buf()), "a/b.txt"),
            Some(dir.path().join("b.txt"))
        );

        let file = dir.path().join("out.bin");
        assert_eq!(destination(Some(file.clone()), "a/b.txt"), Some(file));
    }
}
