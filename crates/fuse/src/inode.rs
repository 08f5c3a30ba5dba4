//! Inode number ↔ logical path table

use std::collections::HashMap;

use osc_core::fs::Node;

pub type InodeId = u64;

/// Inode of the bucket root
pub const ROOT_INODE: InodeId = fuser::FUSE_ROOT_ID;

/// Assigns stable inode numbers to the paths the kernel has seen
#[derive(Debug)]
pub struct InodeTable {
    nodes: HashMap<InodeId, Node>,
    by_path: HashMap<String, InodeId>,
    next_ino: InodeId,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let mut table = Self {
            nodes: HashMap::new(),
            by_path: HashMap::new(),
            next_ino: ROOT_INODE + 1,
        };
        table.nodes.insert(ROOT_INODE, Node::root());
        table.by_path.insert(String::new(), ROOT_INODE);
        table
    }

    pub fn get(&self, ino: InodeId) -> Option<&Node> {
        self.nodes.get(&ino)
    }

    pub fn ino_of(&self, path: &str) -> Option<InodeId> {
        self.by_path.get(path).copied()
    }

    /// Inode for `node`, reusing the number already given to its path
    pub fn insert(&mut self, node: Node) -> InodeId {
        if let Some(&ino) = self.by_path.get(node.path()) {
            self.nodes.insert(ino, node);
            return ino;
        }

        let ino = self.next_ino;
        self.next_ino += 1;
        self.by_path.insert(node.path().to_string(), ino);
        self.nodes.insert(ino, node);
        ino
    }

    /// Forget `path` and everything below it; the root is never forgotten
    pub fn remove_tree(&mut self, path: &str) {
        if path.is_empty() {
            return;
        }
        let prefix = format!("{path}/");
        let doomed: Vec<InodeId> = self
            .by_path
            .iter()
            .filter(|(p, _)| p.as_str() == path || p.starts_with(&prefix))
            .map(|(_, ino)| *ino)
            .collect();

        for ino in doomed {
            if let Some(node) = self.nodes.remove(&ino) {
                self.by_path.remove(node.path());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
