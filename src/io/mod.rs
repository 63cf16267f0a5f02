//! Low-level container I/O: header codec, embedded WAL, time index track.

pub mod header;
pub mod time_index;
pub mod wal;

pub use header::{HEADER_SIZE, HeaderCodec};
pub use time_index::{TimeIndexEntry, decode_track, encode_track};
pub use wal::{EmbeddedWal, WalRecord, WalStats};
