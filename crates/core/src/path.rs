//! Path handling
//!
//! Two kinds of paths live here. Logical paths are the filesystem view of a
//! bucket: `/`-separated, never with a leading slash, the empty string being
//! the root. Remote paths are what the CLI accepts: `bucket[/key]`.

use crate::error::{Error, Result};

/// Names the filesystem always reports as absent without asking the service
pub const RESERVED_NAMES: &[&str] = &[
    "Input",
    ".Trash",
    ".Trash-1000",
    ".xdg-volume-info",
    "autorun.inf",
];

/// Whether `name` is a desktop pseudo-entry that never exists in a bucket
pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

/// Join a child name onto a logical directory path
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Listing prefix for the children of a logical directory
pub fn dir_prefix(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!("{path}/")
    }
}

/// Key of the zero-length object that marks an explicit directory
pub fn marker_key(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}

/// Parent of a logical path; the root is its own parent
pub fn parent(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => &trimmed[..pos],
        None => "",
    }
}

/// Last component of a logical path
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => &trimmed[pos + 1..],
        None => trimmed,
    }
}

/// Check that a child name can be joined onto a logical path
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(Error::InvalidPath(format!("invalid entry name '{name}'")));
    }
    Ok(())
}

/// A parsed `bucket[/key]` location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    /// Bucket name
    pub bucket: String,
    /// Object key (empty for bucket root)
    pub key: String,
}

impl RemotePath {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Whether the key addresses a prefix rather than one object
    pub fn is_dir(&self) -> bool {
        self.key.is_empty() || self.key.ends_with('/')
    }
}

impl std::fmt::Display for RemotePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.key.is_empty() {
            write!(f, "{}", self.bucket)
        } else {
            write!(f, "{}/{}", self.bucket, self.key)
        }
    }
}

/// Parse `bucket[/key]`
pub fn parse_remote(path: &str) -> Result<RemotePath> {
    if path.is_empty() {
        return Err(Error::InvalidPath("Path cannot be empty".into()));
    }
    if path.starts_with('/') {
        return Err(Error::InvalidPath(format!(
            "'{path}' has a leading slash. Use format: bucket[/key]"
        )));
    }

    let (bucket, key) = match path.split_once('/') {
        Some((bucket, key)) => (bucket, key),
        None => (path, ""),
    };

    if !is_valid_bucket_name(bucket) {
        return Err(Error::InvalidPath(format!("Invalid bucket name '{bucket}'")));
    }

    Ok(RemotePath::new(bucket, key))
}

/// Parse `bucket/key` where the key must name an object
pub fn parse_object(path: &str) -> Result<RemotePath> {
    let remote = parse_remote(path)?;
    if remote.key.is_empty() {
        return Err(Error::InvalidPath(format!(
            "'{path}' is missing an object key. Use format: bucket/key"
        )));
    }
    Ok(remote)
}

fn is_valid_bucket_name(name: &str) -> bool {
    (3..=63).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_prefix() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a/b", "c"), "a/b/c");
        assert_eq!(dir_prefix(""), "");
        assert_eq!(dir_prefix("a/b"), "a/b/");
        assert_eq!(marker_key("a/b"), "a/b/");
        assert_eq!(marker_key("a/b/"), "a/b/");
    }

    #[test]
    fn test_parent_and_file_name() {
        assert_eq!(parent("a/b/c.txt"), "a/b");
        assert_eq!(parent("a/b/"), "a");
        assert_eq!(parent("a"), "");
        assert_eq!(parent(""), "");
        assert_eq!(file_name("a/b/c.txt"), "c.txt");
        assert_eq!(file_name("a/b/"), "b");
        assert_eq!(file_name("top"), "top");
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved(".Trash"));
        assert!(is_reserved("autorun.inf"));
        assert!(!is_reserved("notes.txt"));
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("file.txt").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
    }

    #[test]
    fn test_parse_remote() {
        let path = parse_remote("my-bucket/dir/file.txt").unwrap();
        assert_eq!(path.bucket, "my-bucket");
        assert_eq!(path.key, "dir/file.txt");
        assert!(!path.is_dir());

        let path = parse_remote("my-bucket").unwrap();
        assert_eq!(path.key, "");
        assert!(path.is_dir());

        let path = parse_remote("my-bucket/dir/").unwrap();
        assert!(path.is_dir());
        assert_eq!(path.to_string(), "my-bucket/dir/");
    }

    #[test]
    fn test_parse_remote_rejects_bad_input() {
        assert!(parse_remote("").is_err());
        assert!(parse_remote("/my-bucket/key").is_err());
        assert!(parse_remote("UPPER/key").is_err());
        assert!(parse_remote("ab/key").is_err());
    }

    #[test]
    fn test_parse_object_requires_key() {
        assert!(parse_object("my-bucket").is_err());
        assert!(parse_object("my-bucket/").is_err());
        assert_eq!(parse_object("my-bucket/k").unwrap().key, "k");
    }
}
