//! Adaptive payload compression
//!
//! Large uploads are gzip-compressed when it pays off. Whether it pays off
//! is decided from three small samples of the payload (head, middle, tail)
//! rather than from compressing everything up front.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::{Error, Result};

/// Payloads below this size are never compressed: 100 MiB
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 100 * 1024 * 1024;

/// Estimated ratio (compressed / original) below which compression is applied
pub const DEFAULT_BENEFIT_RATIO: f64 = 0.9;

/// Smallest sample taken from each region: 64 KiB
pub const MIN_SAMPLE_SIZE: usize = 64 * 1024;

/// Largest sample taken from each region: 4 MiB
pub const MAX_SAMPLE_SIZE: usize = 4 * 1024 * 1024;

/// Predicts and applies compression for uploads
#[derive(Debug, Clone, Copy)]
pub struct CompressionEstimator {
    threshold: usize,
    benefit_ratio: f64,
}

impl Default for CompressionEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_THRESHOLD, DEFAULT_BENEFIT_RATIO)
    }
}

impl CompressionEstimator {
    pub fn new(threshold: usize, benefit_ratio: f64) -> Self {
        Self {
            threshold,
            benefit_ratio,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Whether a payload of `len` bytes is considered for compression at all
    pub fn is_eligible(&self, len: usize) -> bool {
        len >= self.threshold
    }

    /// Size of each of the three samples for a payload of `len` bytes
    pub fn sample_size(len: usize) -> usize {
        (len / 100).clamp(MIN_SAMPLE_SIZE, MAX_SAMPLE_SIZE).min(len)
    }

    /// Estimated compressed/original ratio from head, middle and tail samples
    pub fn estimate(&self, data: &[u8]) -> Result<f64> {
        let len = data.len();
        if len == 0 {
            return Ok(1.0);
        }

        let sample = Self::sample_size(len);
        let middle = (len / 2).saturating_sub(sample / 2);
        let regions = [
            &data[..sample],
            &data[middle..middle + sample],
            &data[len - sample..],
        ];

        let mut sampled = 0usize;
        let mut compressed = 0usize;
        for region in regions {
            sampled += region.len();
            compressed += compress(region)?.len();
        }

        Ok(compressed as f64 / sampled as f64)
    }

    /// Compress `data` when the estimate and the real result both say it
    /// helps. The returned flag is true only if the returned bytes are gzip.
    ///
    /// A failed estimate is logged and treated as "not worth it".
    pub fn compress_if_beneficial(&self, data: Bytes) -> Result<(Bytes, bool)> {
        if !self.is_eligible(data.len()) {
            return Ok((data, false));
        }

        let ratio = match self.estimate(&data) {
            Ok(ratio) => ratio,
            Err(e) => {
                tracing::warn!(error = %e, "compression estimate failed, sending uncompressed");
                return Ok((data, false));
            }
        };

        if ratio >= self.benefit_ratio {
            tracing::debug!(ratio, size = data.len(), "payload not compressible enough");
            return Ok((data, false));
        }

        let compressed = compress(&data)?;
        if compressed.len() >= data.len() {
            tracing::debug!(
                estimated = ratio,
                original = data.len(),
                compressed = compressed.len(),
                "compression did not shrink payload"
            );
            return Ok((data, false));
        }

        tracing::debug!(
            original = data.len(),
            compressed = compressed.len(),
            "payload compressed"
        );
        Ok((Bytes::from(compressed), true))
    }
}

/// Gzip `data` with the fastest setting
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::fast());
    encoder
        .write_all(data)
        .map_err(|e| Error::Compression(format!("failed to compress data: {e}")))?;
    encoder
        .finish()
        .map_err(|e| Error::Compression(format!("failed to finish gzip stream: {e}")))
}

/// Inflate a gzip payload produced by [`compress`]
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len().saturating_mul(2));
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::Compression(format!("failed to decompress data: {e}")))?;
    Ok(out)
}
