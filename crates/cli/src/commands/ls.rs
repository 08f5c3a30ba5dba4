//! ls command - List buckets and keys
//!
//! Lists buckets when no location is given, otherwise the keys under a
//! prefix. Without `--recursive` keys below the next `/` are folded into one
//! prefix entry.

use clap::Args;
use serde::Serialize;

use osc_core::{ListOptions, Result, TransportClient};

use super::{Context, report};
use crate::exit_code::ExitCode;

/// List buckets or keys
#[derive(Args, Debug)]
pub struct LsArgs {
    /// Remote location (bucket[/prefix]); lists buckets when omitted
    pub path: Option<String>,

    /// List every key below the prefix
    #[arg(short, long)]
    pub recursive: bool,

    /// Stop after this many keys
    #[arg(long)]
    pub max_keys: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Bucket,
    Prefix,
    Object,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LsEntry {
    pub name: String,
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

impl LsEntry {
    fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
            created: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct LsOutput {
    items: Vec<LsEntry>,
}

/// Fold a sorted key listing into entries relative to `prefix`
///
/// The key equal to `prefix` (a directory marker) is skipped.
pub fn group_keys(prefix: &str, keys: &[String], recursive: bool) -> Vec<LsEntry> {
    let mut entries: Vec<LsEntry> = Vec::new();

    for key in keys {
        let Some(rest) = key.strip_prefix(prefix) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }

        let entry = match rest.find('/') {
            Some(idx) if !recursive => {
                LsEntry::new(&key[..prefix.len() + idx + 1], EntryKind::Prefix)
            }
            _ => LsEntry::new(key.as_str(), EntryKind::Object),
        };

        if entries.last() != Some(&entry) {
            entries.push(entry);
        }
    }

    entries
}

/// List buckets visible to the caller
pub async fn run_buckets(client: &TransportClient) -> Result<Vec<LsEntry>> {
    let buckets = client.list_buckets().await?;
    Ok(buckets
        .into_iter()
        .map(|bucket| LsEntry {
            created: bucket.creation_date.map(|ts| ts.to_string()),
            ..LsEntry::new(bucket.name, EntryKind::Bucket)
        })
        .collect())
}

/// List keys of `bucket` below `prefix`
pub async fn run(
    client: &TransportClient,
    bucket: &str,
    prefix: &str,
    recursive: bool,
    max_keys: Option<i32>,
) -> Result<Vec<LsEntry>> {
    let options = ListOptions {
        prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
        max_keys,
        ..Default::default()
    };
    let keys = client.list_objects(bucket, options).await?;
    Ok(group_keys(prefix, &keys, recursive))
}

/// Execute the ls command
pub async fn execute(args: LsArgs, ctx: &Context) -> ExitCode {
    let formatter = ctx.formatter();

    let location = match (&args.path, &ctx.bucket) {
        (None, None) => None,
        (path, _) => match ctx.remote(path.as_deref().unwrap_or_default()) {
            Ok(remote) => Some(remote),
            Err(e) => return report(&formatter, "Invalid path", &e),
        },
    };

    let session = match ctx.connect().await {
        Ok(session) => session,
        Err(e) => return report(&formatter, "Failed to connect", &e),
    };

    let result = match &location {
        None => run_buckets(&session.client).await,
        Some(remote) => {
            run(
                &session.client,
                &remote.bucket,
                &remote.key,
                args.recursive,
                args.max_keys,
            )
            .await
        }
    };

    let items = match result {
        Ok(items) => items,
        Err(e) => {
            let target = location.map_or_else(|| "buckets".to_string(), |r| r.to_string());
            return report(&formatter, &format!("Failed to list {target}"), &e);
        }
    };

    if formatter.is_json() {
        formatter.json(&LsOutput { items });
        return ExitCode::Success;
    }

    for item in &items {
        match (&item.kind, &item.created) {
            (EntryKind::Bucket, Some(created)) => {
                formatter.println(&format!("{created:<26} {}/", item.name));
            }
            (EntryKind::Bucket, None) => formatter.println(&format!("{}/", item.name)),
            (EntryKind::Prefix, _) => formatter.println(&format!("{:>6} {}", "PRE", item.name)),
            (EntryKind::Object, _) => formatter.println(&format!("{:>6} {}", "", item.name)),
        }
    }
    ExitCode::Success
}
