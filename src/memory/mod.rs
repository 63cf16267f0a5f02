//! The `Memory` handle: one open `.mv2` container.
//!
//! Everything in a memory lives in the single file: header, embedded WAL,
//! payload region, index segments, TOC, and commit footer. Mutations are
//! buffered in the WAL and stay invisible to every read path until
//! [`Memory::commit`] folds them into the frame table and indexes; crash
//! recovery replays the same records on reopen.

mod ask;
mod doctor;
mod frame;
mod lifecycle;
mod mutation;
mod search;
mod timeline;

use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;

pub use doctor::{doctor, verify};
pub use mutation::WalEntry;

use crate::error::{Mv2Error, Result};
use crate::io::{EmbeddedWal, TimeIndexEntry};
use crate::lex::LexIndex;
use crate::lock::FileLock;
use crate::types::{FrameId, Header, Toc};

pub struct Memory {
    pub(crate) file: File,
    pub(crate) path: PathBuf,
    pub(crate) lock: FileLock,
    pub(crate) read_only: bool,
    pub(crate) closed: bool,
    pub(crate) header: Header,
    pub(crate) toc: Toc,
    pub(crate) wal: EmbeddedWal,
    pub(crate) lex_index: LexIndex,
    /// Mutations appended to the WAL but not yet applied to the frame table.
    /// Invisible to reads; drained in sequence order at commit.
    pub(crate) pending: Vec<WalEntry>,
    /// Stored payload bytes for frames applied to the frame table but not yet
    /// materialized into the payload region (crash-replayed inserts and
    /// freshly committed batches mid-commit). Keyed by frame id.
    pub(crate) pending_payloads: BTreeMap<FrameId, Vec<u8>>,
    /// Live `(timestamp, frame_id)` pairs, sorted; serialized as the time
    /// index track at commit.
    pub(crate) time_entries: Vec<TimeIndexEntry>,
    /// First byte past the last materialized payload.
    pub(crate) data_end: u64,
    pub(crate) dirty: bool,
}

impl Memory {
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Mv2Error::InvalidHandle);
        }
        Ok(())
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.read_only {
            return Err(Mv2Error::ReadOnly {
                reason: "memory opened read-only".into(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Uncommitted mutations exist that a crash would push through WAL replay.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("path", &self.path)
            .field("read_only", &self.read_only)
            .field("closed", &self.closed)
            .field("frames", &self.toc.frames.len())
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}
