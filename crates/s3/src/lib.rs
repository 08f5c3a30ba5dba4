//! osc-s3: S3 SDK backend for osc
//!
//! This crate implements the `ObjectService` trait from osc-core on top of
//! aws-sdk-s3. It is the only crate that directly depends on the AWS SDK.

pub mod client;
pub mod error;

pub use client::S3Client;
