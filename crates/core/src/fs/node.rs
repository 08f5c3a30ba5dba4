//! Filesystem node and handle types

use std::time::SystemTime;

use crate::path;

/// Kind of a filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Directory,
    File,
}

/// A resolved filesystem entry; only the path identifies it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Directory {
        path: String,
    },
    File {
        path: String,
        /// Best-known size in bytes
        size: u64,
        /// Best-known modification time
        mtime: Option<SystemTime>,
    },
}

impl Node {
    /// The bucket root
    pub fn root() -> Self {
        Node::Directory {
            path: String::new(),
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Node::Directory { path: path.into() }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Node::File {
            path: path.into(),
            size: 0,
            mtime: None,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Node::Directory { path } | Node::File { path, .. } => path,
        }
    }

    pub fn name(&self) -> &str {
        path::file_name(self.path())
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Directory { .. } => NodeKind::Directory,
            Node::File { .. } => NodeKind::File,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == NodeKind::Directory
    }

    pub fn is_root(&self) -> bool {
        self.is_dir() && self.path().is_empty()
    }
}

/// Attributes reported for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAttr {
    pub kind: NodeKind,
    pub size: u64,
    pub mtime: SystemTime,
    /// Permission bits
    pub perm: u16,
}

impl NodeAttr {
    pub const DIR_PERM: u16 = 0o755;
    pub const FILE_PERM: u16 = 0o644;

    /// Synthesized attributes for a directory
    pub fn directory() -> Self {
        Self {
            kind: NodeKind::Directory,
            size: 0,
            mtime: SystemTime::now(),
            perm: Self::DIR_PERM,
        }
    }

    pub fn file(size: u64, mtime: SystemTime) -> Self {
        Self {
            kind: NodeKind::File,
            size,
            mtime,
            perm: Self::FILE_PERM,
        }
    }

    /// 512-byte blocks occupied
    pub fn blocks(&self) -> u64 {
        self.size.div_ceil(512)
    }
}

/// An open file
///
/// Every write is already durable remotely when it returns, so the handle
/// only tracks bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub path: String,
    pub size: u64,
    pub mtime: SystemTime,
}

impl FileHandle {
    pub fn new(path: impl Into<String>, size: u64, mtime: SystemTime) -> Self {
        Self {
            path: path.into(),
            size,
            mtime,
        }
    }

    pub fn node(&self) -> Node {
        Node::File {
            path: self.path.clone(),
            size: self.size,
            mtime: Some(self.mtime),
        }
    }
}

/// One directory listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: NodeKind,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_accessors() {
        let node = Node::file("a/b/c.txt");
        assert_eq!(node.path(), "a/b/c.txt");
        assert_eq!(node.name(), "c.txt");
        assert_eq!(node.kind(), NodeKind::File);
        assert!(!node.is_root());
        assert!(Node::root().is_root());
    }

    #[test]
    fn test_nodes_with_same_path_are_interchangeable() {
        assert_eq!(Node::directory("a"), Node::directory(String::from("a")));
    }

    #[test]
    fn test_blocks() {
        assert_eq!(NodeAttr::file(0, SystemTime::UNIX_EPOCH).blocks(), 0);
        assert_eq!(NodeAttr::file(1, SystemTime::UNIX_EPOCH).blocks(), 1);
        assert_eq!(NodeAttr::file(513, SystemTime::UNIX_EPOCH).blocks(), 2);
    }
}
