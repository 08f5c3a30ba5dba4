//! osc-fuse: FUSE bridge for osc
//!
//! Exposes a [`osc_core::FilesystemAdapter`] to the kernel through `fuser`.
//! Kernel inode numbers are mapped to logical paths here; everything else is
//! forwarded to the adapter.

pub mod bridge;
pub mod inode;
pub mod mount;

pub use bridge::OscFilesystem;
pub use mount::{MountError, MountOptions, mount};
