//! On-disk constants for the `.mv2` container format.

/// File magic at offset 0.
pub const MAGIC: [u8; 4] = *b"MV2\0";

/// Magic prefix of password-encrypted capsules. Never opened by this crate.
pub const ENCRYPTED_MAGIC: [u8; 4] = *b"MV2E";

/// Container format version (major.minor packed as 0xMMmm).
pub const SPEC_VERSION: u16 = 0x0300;

/// Byte offset of the embedded WAL region. The header and its padding live below.
pub const WAL_OFFSET: u64 = 4096;

/// Initial size of the embedded WAL ring buffer.
pub const WAL_SIZE_DEFAULT: u64 = 256 * 1024;

/// WAL occupancy ratio that forces a checkpoint on the next mutation.
pub const WAL_CHECKPOINT_THRESHOLD: f64 = 0.6;

/// Appends since last checkpoint that force a checkpoint on the next mutation.
pub const WAL_CHECKPOINT_PERIOD: u64 = 1024;

/// Payloads larger than this are split into chunk frames at put time.
pub const CHUNK_THRESHOLD: usize = 64 * 1024;

/// Hard ceiling for a single frame payload (before chunking is applied the
/// whole put is bounded by `CHUNK_THRESHOLD * MAX_CHUNK_COUNT`).
pub const MAX_FRAME_BYTES: u64 = 256 * 1024 * 1024;

/// Maximum number of chunk frames a single put may produce.
pub const MAX_CHUNK_COUNT: u32 = 16_384;

/// Safety limit when reading embedded index segments and the TOC region.
pub const MAX_INDEX_BYTES: u64 = 512 * 1024 * 1024;

/// Characters kept in timeline previews.
pub const TIMELINE_PREVIEW_CHARS: usize = 120;

/// Characters of canonical text considered for lexical indexing per frame.
pub const SEARCH_TEXT_LIMIT: usize = 32_768;

/// Default snippet width for search hits.
pub const SNIPPET_CHARS: usize = 160;

/// Capacity granted without a ticket (free tier).
pub const FREE_TIER_CAPACITY_BYTES: u64 = 1024 * 1024 * 1024;
