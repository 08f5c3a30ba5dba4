//! osc-core: Core library for the osc object storage client
//!
//! This crate provides the core functionality for osc, including:
//! - The `ObjectService` trait every backend implements
//! - A streaming transport client with retry, chunking and compression
//! - A filesystem adapter that presents a bucket as a directory tree
//! - Configuration management and path parsing
//!
//! This crate is designed to be independent of any specific S3 SDK,
//! allowing for easy testing with the in-memory service.

pub mod chunk;
pub mod client;
pub mod compression;
pub mod config;
pub mod error;
pub mod fs;
pub mod memory;
pub mod path;
pub mod retry;
pub mod traits;

pub use client::TransportClient;
pub use compression::CompressionEstimator;
pub use config::{Config, ConfigManager};
pub use error::{Code, Error, Result};
pub use fs::{ExistenceCache, FilesystemAdapter, Node, NodeKind};
pub use memory::MemoryService;
pub use path::{RemotePath, parse_object, parse_remote};
pub use retry::{BackoffExecutor, RetryPolicy};
pub use traits::{
    BucketInfo, GetFrame, GetRequest, ListOptions, ObjectMetadata, ObjectService, PutFrame,
    PutParameters,
};
