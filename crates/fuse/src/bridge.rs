//! `fuser::Filesystem` implementation
//!
//! Runs on the session thread owned by `fuser`. Each request is resolved to
//! a [`Node`] through the inode table and forwarded to the adapter; the
//! adapter future is driven to completion with the runtime handle captured
//! at construction.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::raw::c_int;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use tokio::runtime::Handle;
use tracing::debug;

use osc_core::fs::{DirEntry, FileHandle, Node, NodeAttr, NodeKind};
use osc_core::{FilesystemAdapter, path};

use crate::inode::{InodeId, InodeTable, ROOT_INODE};

/// One row of a directory snapshot: inode, type, name
type Listing = Vec<(InodeId, FileType, String)>;

pub struct OscFilesystem {
    adapter: Arc<FilesystemAdapter>,
    runtime: Handle,
    inodes: InodeTable,
    handles: HashMap<u64, FileHandle>,
    listings: HashMap<u64, Listing>,
    next_fh: u64,
    ttl: Duration,
    uid: u32,
    gid: u32,
}

impl OscFilesystem {
    /// Must be called from within a tokio runtime
    pub fn new(adapter: Arc<FilesystemAdapter>, ttl: Duration) -> Self {
        Self::with_handle(adapter, Handle::current(), ttl)
    }

    pub fn with_handle(adapter: Arc<FilesystemAdapter>, runtime: Handle, ttl: Duration) -> Self {
        // SAFETY: getuid/getgid cannot fail
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            adapter,
            runtime,
            inodes: InodeTable::new(),
            handles: HashMap::new(),
            listings: HashMap::new(),
            next_fh: 1,
            ttl,
            uid,
            gid,
        }
    }

    fn node(&self, ino: InodeId) -> Result<Node, c_int> {
        self.inodes.get(ino).cloned().ok_or(libc::ENOENT)
    }

    fn alloc_fh(&mut self) -> u64 {
        let fh = self.next_fh;
        self.next_fh += 1;
        fh
    }

    fn attr(&self, ino: InodeId, attr: &NodeAttr) -> FileAttr {
        to_file_attr(ino, attr, self.uid, self.gid)
    }

    fn getattr_of(&self, node: &Node) -> Result<NodeAttr, c_int> {
        self.runtime
            .block_on(self.adapter.getattr(node))
            .map_err(|e| errno(&e, "getattr", node.path()))
    }

    fn lookup_entry(&mut self, parent: InodeId, name: &str) -> Result<(InodeId, NodeAttr), c_int> {
        let parent = self.node(parent)?;
        let node = self
            .runtime
            .block_on(self.adapter.lookup(&parent, name))
            .map_err(|e| errno(&e, "lookup", &path::join(parent.path(), name)))?;
        let attr = self.getattr_of(&node)?;
        Ok((self.inodes.insert(node), attr))
    }

    fn snapshot(&mut self, ino: InodeId) -> Result<Listing, c_int> {
        let dir = self.node(ino)?;
        let entries = self
            .runtime
            .block_on(self.adapter.readdir(&dir))
            .map_err(|e| errno(&e, "readdir", dir.path()))?;

        let parent_ino = self
            .inodes
            .ino_of(path::parent(dir.path()))
            .unwrap_or(ROOT_INODE);
        Ok(build_listing(
            &mut self.inodes,
            dir.path(),
            ino,
            parent_ino,
            &entries,
        ))
    }
}

fn errno(err: &osc_core::Error, op: &str, path: &str) -> c_int {
    let code = err.errno();
    if code == libc::ENOENT {
        debug!(op, path, "not found");
    } else {
        tracing::warn!(op, path, error = %err, "filesystem request failed");
    }
    code
}

fn file_type(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::Directory => FileType::Directory,
        NodeKind::File => FileType::RegularFile,
    }
}

/// Kernel attributes for a node
pub fn to_file_attr(ino: InodeId, attr: &NodeAttr, uid: u32, gid: u32) -> FileAttr {
    FileAttr {
        ino,
        size: attr.size,
        blocks: attr.blocks(),
        atime: attr.mtime,
        mtime: attr.mtime,
        ctime: attr.mtime,
        crtime: attr.mtime,
        kind: file_type(attr.kind),
        perm: attr.perm,
        nlink: if attr.kind == NodeKind::Directory { 2 } else { 1 },
        uid,
        gid,
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

/// Turn adapter entries into a listing with `..` after `.`, assigning
/// inodes to children as they are seen
fn build_listing(
    inodes: &mut InodeTable,
    dir_path: &str,
    dir_ino: InodeId,
    parent_ino: InodeId,
    entries: &[DirEntry],
) -> Listing {
    let mut listing = Vec::with_capacity(entries.len() + 1);
    for entry in entries {
        if entry.name == "." {
            listing.push((dir_ino, FileType::Directory, ".".to_string()));
            listing.push((parent_ino, FileType::Directory, "..".to_string()));
            continue;
        }
        let child = path::join(dir_path, &entry.name);
        let node = match entry.kind {
            NodeKind::Directory => Node::directory(child),
            NodeKind::File => match inodes.ino_of(&child).and_then(|ino| inodes.get(ino)) {
                Some(known @ Node::File { .. }) => known.clone(),
                _ => Node::file(child),
            },
        };
        let ino = inodes.insert(node);
        listing.push((ino, file_type(entry.kind), entry.name.clone()));
    }
    listing
}

fn utf8(name: &OsStr) -> Result<&str, c_int> {
    name.to_str().ok_or(libc::EINVAL)
}

impl Filesystem for OscFilesystem {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        tracing::info!(bucket = self.adapter.bucket(), "filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        tracing::info!(bucket = self.adapter.bucket(), "filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let result = utf8(name).and_then(|name| self.lookup_entry(parent, name));
        match result {
            Ok((ino, attr)) => reply.entry(&self.ttl, &self.attr(ino, &attr), 0),
            Err(code) => reply.error(code),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.node(ino).and_then(|node| self.getattr_of(&node)) {
            Ok(attr) => reply.attr(&self.ttl, &self.attr(ino, &attr)),
            Err(code) => reply.error(code),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let node = match self.node(ino) {
            Ok(node) => node,
            Err(code) => return reply.error(code),
        };

        let result = match size {
            Some(size) => self
                .runtime
                .block_on(self.adapter.truncate(&node, size))
                .map_err(|e| errno(&e, "truncate", node.path())),
            None => self.getattr_of(&node),
        };

        match result {
            Ok(attr) => {
                if let Some(handle) = fh.and_then(|fh| self.handles.get_mut(&fh)) {
                    handle.size = attr.size;
                    handle.mtime = attr.mtime;
                }
                reply.attr(&self.ttl, &self.attr(ino, &attr));
            }
            Err(code) => reply.error(code),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let result = utf8(name).and_then(|name| {
            let parent = self.node(parent)?;
            self.runtime
                .block_on(self.adapter.mkdir(&parent, name))
                .map_err(|e| errno(&e, "mkdir", &path::join(parent.path(), name)))
        });

        match result {
            Ok(node) => {
                let ino = self.inodes.insert(node);
                reply.entry(&self.ttl, &self.attr(ino, &NodeAttr::directory()), 0);
            }
            Err(code) => reply.error(code),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        self.remove(parent, name, false, reply);
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        self.remove(parent, name, true, reply);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let result = (|| -> Result<(), c_int> {
            let (name, newname) = (utf8(name)?, utf8(newname)?);
            let (from, to) = (self.node(parent)?, self.node(newparent)?);
            let old_path = path::join(from.path(), name);
            let new_path = path::join(to.path(), newname);

            let outcome = self
                .runtime
                .block_on(self.adapter.rename(&from, name, &to, newname))
                .map_err(|e| errno(&e, "rename", &old_path));
            self.inodes.remove_tree(&old_path);
            self.inodes.remove_tree(&new_path);
            outcome
        })();

        match result {
            Ok(()) => reply.ok(),
            Err(code) => reply.error(code),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let result = self.node(ino).and_then(|node| {
            self.runtime
                .block_on(self.adapter.open(&node))
                .map_err(|e| errno(&e, "open", node.path()))
        });

        match result {
            Ok(handle) => {
                let fh = self.alloc_fh();
                self.handles.insert(fh, handle);
                reply.opened(fh, 0);
            }
            Err(code) => reply.error(code),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let result = utf8(name).and_then(|name| {
            let parent = self.node(parent)?;
            self.runtime
                .block_on(self.adapter.create(&parent, name))
                .map_err(|e| errno(&e, "create", &path::join(parent.path(), name)))
        });

        match result {
            Ok((node, handle)) => {
                let attr = NodeAttr::file(0, handle.mtime);
                let ino = self.inodes.insert(node);
                let fh = self.alloc_fh();
                self.handles.insert(fh, handle);
                reply.created(&self.ttl, &self.attr(ino, &attr), 0, fh, 0);
            }
            Err(code) => reply.error(code),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(handle) = self.handles.get(&fh) else {
            return reply.error(libc::EBADF);
        };
        let offset = u64::try_from(offset).unwrap_or(0);

        match self.runtime.block_on(self.adapter.read(handle, offset, size)) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(errno(&e, "read", &handle.path)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(handle) = self.handles.get_mut(&fh) else {
            return reply.error(libc::EBADF);
        };
        let offset = u64::try_from(offset).unwrap_or(0);

        match self
            .runtime
            .block_on(self.adapter.write(handle, offset, data))
        {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(errno(&e, "write", &handle.path)),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let Some(handle) = self.handles.get(&fh) else {
            return reply.error(libc::EBADF);
        };
        match self.runtime.block_on(self.adapter.flush(handle)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno(&e, "flush", &handle.path)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let Some(handle) = self.handles.remove(&fh) else {
            return reply.ok();
        };
        let path = handle.path.clone();
        match self.runtime.block_on(self.adapter.release(handle)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno(&e, "release", &path)),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.snapshot(ino) {
            Ok(listing) => {
                let fh = self.alloc_fh();
                self.listings.insert(fh, listing);
                reply.opened(fh, 0);
            }
            Err(code) => reply.error(code),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        if !self.listings.contains_key(&fh) {
            match self.snapshot(ino) {
                Ok(listing) => {
                    self.listings.insert(fh, listing);
                }
                Err(code) => return reply.error(code),
            }
        }
        let Some(listing) = self.listings.get(&fh) else {
            return reply.error(libc::EBADF);
        };

        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, (entry_ino, kind, name)) in listing.iter().enumerate().skip(skip) {
            if reply.add(*entry_ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        self.listings.remove(&fh);
        reply.ok();
    }
}

impl OscFilesystem {
    fn remove(&mut self, parent: u64, name: &OsStr, is_dir: bool, reply: ReplyEmpty) {
        let result = utf8(name).and_then(|name| {
            let parent = self.node(parent)?;
            let full_path = path::join(parent.path(), name);
            self.runtime
                .block_on(self.adapter.remove(&parent, name, is_dir))
                .map_err(|e| errno(&e, if is_dir { "rmdir" } else { "unlink" }, &full_path))?;
            Ok(full_path)
        });

        match result {
            Ok(full_path) => {
                self.inodes.remove_tree(&full_path);
                reply.ok();
            }
            Err(code) => reply.error(code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_attr() {
        let attr = to_file_attr(7, &NodeAttr::directory(), 1000, 1000);
        assert_eq!(attr.ino, 7);
        assert_eq!(attr.kind, FileType::Directory);
        assert_eq!(attr.perm, 0o755);
        assert_eq!(attr.nlink, 2);
        assert_eq!(attr.size, 0);
    }

    #[test]
    fn test_file_attr() {
        let attr = to_file_attr(9, &NodeAttr::file(1025, SystemTime::UNIX_EPOCH), 1, 2);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.size, 1025);
        assert_eq!(attr.blocks, 3);
        assert_eq!((attr.uid, attr.gid), (1, 2));
    }

    #[test]
    fn test_build_listing_inserts_parent_and_children() {
        let mut inodes = InodeTable::new();
        let dir_ino = inodes.insert(Node::directory("a"));
        let entries = vec![
            DirEntry::new(".", NodeKind::Directory),
            DirEntry::new("b", NodeKind::File),
            DirEntry::new("c", NodeKind::Directory),
        ];

        let listing = build_listing(&mut inodes, "a", dir_ino, ROOT_INODE, &entries);
        let names: Vec<&str> = listing.iter().map(|(_, _, n)| n.as_str()).collect();
        assert_eq!(names, vec![".", "..", "b", "c"]);
        assert_eq!(listing[0].0, dir_ino);
        assert_eq!(listing[1].0, ROOT_INODE);
        assert_eq!(inodes.ino_of("a/b"), Some(listing[2].0));
        assert_eq!(listing[3].1, FileType::Directory);
    }

    #[test]
    fn test_build_listing_reuses_known_inodes() {
        let mut inodes = InodeTable::new();
        let known = inodes.insert(Node::file("f"));
        let entries = vec![
            DirEntry::new(".", NodeKind::Directory),
            DirEntry::new("f", NodeKind::File),
        ];
        let listing = build_listing(&mut inodes, "", ROOT_INODE, ROOT_INODE, &entries);
        assert_eq!(listing[2].0, known);
    }
}
