//! Container lifecycle: create, open, crash recovery, close.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::constants::{
    ENCRYPTED_MAGIC, MAGIC, MAX_INDEX_BYTES, SPEC_VERSION, WAL_OFFSET, WAL_SIZE_DEFAULT,
};
use crate::error::{Mv2Error, Result};
use crate::footer::{CommitFooter, FOOTER_SIZE, find_last_valid_footer};
use crate::io::{EmbeddedWal, HeaderCodec, TimeIndexEntry, decode_track};
use crate::lex::LexIndex;
use crate::lock::{FileLock, LockMode};
use crate::types::{FrameStatus, Header, TicketRef, Toc};

use super::Memory;

/// Sidecar suffixes that mean some other tool smeared state next to the
/// container. The single-file contract refuses to open in that case.
const SIDECAR_SUFFIXES: &[&str] = &[".wal", ".idx", ".lock", "-wal", "-shm", "-journal"];

impl Memory {
    /// Create a new empty memory at `path`. Fails if the file already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        ensure_single_file(&path)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        let lock = FileLock::acquire_with_mode(&file, LockMode::Exclusive).map_err(|err| {
            match err {
                Mv2Error::Lock(_) => Mv2Error::Locked { path: path.clone() },
                other => other,
            }
        })?;
        file.set_len(WAL_OFFSET + WAL_SIZE_DEFAULT)?;

        let mut toc = Toc {
            toc_version: 0,
            frames: Vec::new(),
            lex_index: None,
            time_index: None,
            ticket_ref: TicketRef::default(),
            toc_checksum: [0u8; 32],
        };
        let toc_bytes = seal_toc(&mut toc)?;
        let toc_offset = WAL_OFFSET + WAL_SIZE_DEFAULT;
        let footer_offset = toc_offset + toc_bytes.len() as u64;
        let footer = CommitFooter::new(0, &toc_bytes);

        file.seek(SeekFrom::Start(toc_offset))?;
        file.write_all(&toc_bytes)?;
        file.write_all(&footer.encode())?;
        file.sync_all()?;

        let header = Header {
            magic: MAGIC,
            version: SPEC_VERSION,
            footer_offset,
            wal_offset: WAL_OFFSET,
            wal_size: WAL_SIZE_DEFAULT,
            wal_checkpoint_pos: 0,
            wal_sequence: 0,
            toc_checksum: blake3::hash(&toc_bytes).into(),
        };
        HeaderCodec::write(&mut file, &header)?;
        file.sync_all()?;

        let wal = EmbeddedWal::open(&file, &header)?;
        tracing::info!(path = %path.display(), "created memory");
        Ok(Self {
            file,
            path,
            lock,
            read_only: false,
            closed: false,
            header,
            toc,
            wal,
            lex_index: LexIndex::new(),
            pending: Vec::new(),
            pending_payloads: Default::default(),
            time_entries: Vec::new(),
            data_end: WAL_OFFSET + WAL_SIZE_DEFAULT,
            dirty: false,
        })
    }

    /// Open an existing memory for reading and writing, replaying any WAL
    /// records left behind by a crash.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_internal(path.as_ref(), false)
    }

    /// Open without the exclusive lock; mutating calls fail with `ReadOnly`.
    /// WAL effects are still replayed in memory so reads are current.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_internal(path.as_ref(), true)
    }

    fn open_internal(path: &Path, read_only: bool) -> Result<Self> {
        let path = path.to_path_buf();
        ensure_single_file(&path)?;
        reject_encrypted(&path)?;

        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(&path)?;
        let mode = if read_only {
            LockMode::Shared
        } else {
            LockMode::Exclusive
        };
        let lock = FileLock::acquire_with_mode(&file, mode).map_err(|err| match err {
            Mv2Error::Lock(_) => Mv2Error::Locked { path: path.clone() },
            other => other,
        })?;

        let mut file = file;
        let (header, toc, recovered) = load_committed_state(&mut file)?;
        log::debug!("loaded {} frames from {}", toc.frames.len(), path.display());
        if recovered {
            tracing::warn!(path = %path.display(), "header was stale; recovered toc via footer scan");
        }

        let wal = if read_only {
            EmbeddedWal::open_read_only(&file, &header)?
        } else {
            EmbeddedWal::open(&file, &header)?
        };

        let lex_index = load_lex_index(&mut file, &toc)?;
        let time_entries = load_time_entries(&mut file, &toc)?;
        let data_end = compute_data_end(&header, &toc);

        let mut memory = Self {
            file,
            path,
            lock,
            read_only,
            closed: false,
            header,
            toc,
            wal,
            lex_index,
            pending: Vec::new(),
            pending_payloads: Default::default(),
            time_entries,
            data_end,
            dirty: false,
        };
        memory.replay_wal()?;
        Ok(memory)
    }

    /// Flush pending mutations and release the lock. Idempotent; the handle
    /// rejects further calls with `InvalidHandle`.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.dirty && !self.read_only {
            self.commit()?;
        }
        self.lock.release()?;
        self.closed = true;
        tracing::debug!(path = %self.path.display(), "closed memory");
        Ok(())
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        // No implicit commit: a dropped-but-dirty handle is exactly the crash
        // case WAL replay exists for. The lock releases via its own Drop.
        if !self.closed && self.dirty {
            tracing::debug!(
                path = %self.path.display(),
                "memory dropped with uncommitted mutations; wal replay will recover them"
            );
        }
    }
}

/// Refuse paths that carry sidecar state next to the container.
pub(crate) fn ensure_single_file(path: &Path) -> Result<()> {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(());
    };
    for suffix in SIDECAR_SUFFIXES {
        let sidecar: PathBuf = path.with_file_name(format!("{name}{suffix}"));
        if sidecar.exists() {
            return Err(Mv2Error::AuxiliaryFileDetected { path: sidecar });
        }
    }
    Ok(())
}

fn reject_encrypted(path: &Path) -> Result<()> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_ok() && magic == ENCRYPTED_MAGIC {
        return Err(Mv2Error::EncryptedFile {
            path: path.to_path_buf(),
            hint: "decrypt the capsule with its issuing tool first".into(),
        });
    }
    Ok(())
}

/// Load the committed header and TOC, falling back to a backwards footer scan
/// when the fast path fails. Returns `(header, toc, recovered_via_scan)`.
fn load_committed_state(file: &mut File) -> Result<(Header, Toc, bool)> {
    match try_fast_path(file) {
        Ok(state) => Ok((state.0, state.1, false)),
        Err(fast_err) => {
            tracing::warn!(error = %fast_err, "fast-path toc load failed; scanning for footer");
            let (header, toc) = recover_via_scan(file, fast_err)?;
            Ok((header, toc, true))
        }
    }
}

fn try_fast_path(file: &mut File) -> Result<(Header, Toc)> {
    let header = HeaderCodec::read(file)?;
    let file_len = file.metadata()?.len();
    if header.footer_offset + FOOTER_SIZE as u64 > file_len {
        return Err(Mv2Error::InvalidFooter {
            reason: "footer offset past end of file".into(),
        });
    }

    let mut footer_buf = [0u8; FOOTER_SIZE];
    file.seek(SeekFrom::Start(header.footer_offset))?;
    file.read_exact(&mut footer_buf)?;
    let footer = CommitFooter::decode(&footer_buf).ok_or_else(|| Mv2Error::InvalidFooter {
        reason: "footer at header offset failed validation".into(),
    })?;

    if footer.toc_len > MAX_INDEX_BYTES || footer.toc_len > header.footer_offset {
        return Err(Mv2Error::InvalidFooter {
            reason: "footer toc length out of range".into(),
        });
    }
    let toc_offset = header.footer_offset - footer.toc_len;
    let mut toc_bytes = vec![0u8; footer.toc_len as usize];
    file.seek(SeekFrom::Start(toc_offset))?;
    file.read_exact(&mut toc_bytes)?;
    footer.require_hash(&toc_bytes)?;
    if header.toc_checksum != *blake3::hash(&toc_bytes).as_bytes() {
        return Err(Mv2Error::ChecksumMismatch { region: "toc" });
    }

    let toc = Toc::decode(&toc_bytes)?;
    toc.verify_checksum()?;
    Ok((header, toc))
}

fn recover_via_scan(file: &mut File, fast_err: Mv2Error) -> Result<(Header, Toc)> {
    // The header itself may be torn, so rebuild it from what the scan finds.
    let map = unsafe { Mmap::map(&*file)? };
    let slice = find_last_valid_footer(&map).ok_or(fast_err)?;
    let toc = Toc::decode(slice.toc_bytes)?;
    toc.verify_checksum()?;

    let header = match HeaderCodec::read(file) {
        Ok(mut header) => {
            header.footer_offset = slice.footer_offset as u64;
            header.toc_checksum = blake3::hash(slice.toc_bytes).into();
            header
        }
        Err(_) => Header {
            magic: MAGIC,
            version: SPEC_VERSION,
            footer_offset: slice.footer_offset as u64,
            wal_offset: WAL_OFFSET,
            wal_size: WAL_SIZE_DEFAULT,
            wal_checkpoint_pos: 0,
            wal_sequence: 0,
            toc_checksum: blake3::hash(slice.toc_bytes).into(),
        },
    };
    Ok((header, toc))
}

pub(crate) fn read_segment(
    file: &mut File,
    offset: u64,
    length: u64,
    checksum: &[u8; 32],
    region: &'static str,
) -> Result<Vec<u8>> {
    if length > MAX_INDEX_BYTES {
        return Err(Mv2Error::InvalidToc {
            reason: format!("{region} segment length {length} exceeds limit"),
        });
    }
    let mut bytes = vec![0u8; length as usize];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut bytes)?;
    if blake3::hash(&bytes).as_bytes() != checksum {
        return Err(Mv2Error::ChecksumMismatch { region });
    }
    Ok(bytes)
}

fn load_lex_index(file: &mut File, toc: &Toc) -> Result<LexIndex> {
    if let Some(manifest) = &toc.lex_index {
        match read_segment(
            file,
            manifest.bytes_offset,
            manifest.bytes_length,
            &manifest.checksum,
            "lex_index",
        )
        .and_then(|bytes| LexIndex::decode(&bytes))
        {
            Ok(index) => return Ok(index),
            Err(err) => {
                tracing::warn!(error = %err, "lex artifact unreadable; rebuilding from frames");
            }
        }
    }
    Ok(rebuild_lex_from_frames(file, toc))
}

pub(crate) fn rebuild_lex_from_frames(file: &mut File, toc: &Toc) -> LexIndex {
    let mut index = LexIndex::new();
    for frame in &toc.frames {
        if frame.status != FrameStatus::Active || frame.is_chunk_continuation() {
            continue;
        }
        if let Some(text) = super::frame::committed_frame_text(file, toc, frame) {
            index.add_document(frame.id, &text);
        }
    }
    index
}

fn load_time_entries(file: &mut File, toc: &Toc) -> Result<Vec<TimeIndexEntry>> {
    if let Some(manifest) = &toc.time_index {
        match read_segment(
            file,
            manifest.bytes_offset,
            manifest.bytes_length,
            &manifest.checksum,
            "time_index",
        )
        .and_then(|bytes| decode_track(&bytes))
        {
            Ok(entries) => return Ok(entries),
            Err(err) => {
                tracing::warn!(error = %err, "time track unreadable; rebuilding from frames");
            }
        }
    }
    Ok(rebuild_time_entries(toc))
}

pub(crate) fn rebuild_time_entries(toc: &Toc) -> Vec<TimeIndexEntry> {
    let mut entries: Vec<TimeIndexEntry> = toc
        .frames
        .iter()
        .filter(|frame| frame.status == FrameStatus::Active && !frame.is_chunk_continuation())
        .map(|frame| TimeIndexEntry {
            timestamp: frame.timestamp,
            frame_id: frame.id,
        })
        .collect();
    entries.sort_unstable();
    entries
}

pub(crate) fn compute_data_end(header: &Header, toc: &Toc) -> u64 {
    let floor = header.wal_offset + header.wal_size;
    toc.frames
        .iter()
        .filter(|frame| frame.payload_offset > 0)
        .map(|frame| frame.payload_offset + frame.payload_length)
        .fold(floor, u64::max)
}

/// Compute and embed the TOC self-checksum, returning the final encoding.
pub(crate) fn seal_toc(toc: &mut Toc) -> Result<Vec<u8>> {
    toc.toc_checksum = [0u8; 32];
    let zeroed = toc.encode()?;
    toc.toc_checksum = Toc::calculate_checksum(&zeroed);
    toc.encode()
}
