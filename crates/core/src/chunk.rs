//! Chunk sizing for streamed transfers
//!
//! Bigger payloads are split into bigger chunk frames: small chunks keep
//! streams responsive, large chunks cut per-message overhead.

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

/// Chunk size for payloads under 1 MiB: 64 KiB
pub const SMALL_CHUNK_SIZE: usize = 64 * KIB;

/// Chunk size for payloads under 10 MiB: 256 KiB
pub const MEDIUM_CHUNK_SIZE: usize = 256 * KIB;

/// Chunk size for payloads under 100 MiB: 1 MiB
pub const LARGE_CHUNK_SIZE: usize = MIB;

/// Chunk size for everything else: 4 MiB
pub const MAX_CHUNK_SIZE: usize = 4 * MIB;

/// Chunk size for a payload of `total_len` bytes
pub const fn plan_chunk_size(total_len: usize) -> usize {
    if total_len < MIB {
        SMALL_CHUNK_SIZE
    } else if total_len < 10 * MIB {
        MEDIUM_CHUNK_SIZE
    } else if total_len < 100 * MIB {
        LARGE_CHUNK_SIZE
    } else {
        MAX_CHUNK_SIZE
    }
}
