//! Static integrity verification and bounded repair.
//!
//! Both entry points work on a path, not an open handle, so they can probe
//! files the engine refuses to open. `verify` never errors on structural
//! invalidity: a torn header or bad checksum is a failed check in the report,
//! and only an unreadable path surfaces as an error.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use memmap2::Mmap;

use crate::constants::{ENCRYPTED_MAGIC, MAGIC, MAX_INDEX_BYTES};
use crate::error::Result;
use crate::footer::{CommitFooter, FOOTER_SIZE, find_last_valid_footer};
use crate::io::{EmbeddedWal, HeaderCodec, decode_track};
use crate::lex::LexIndex;
use crate::types::{
    DoctorActionKind, DoctorActionReport, DoctorActionStatus, DoctorFinding, DoctorOptions,
    DoctorReport, DoctorSeverity, DoctorStatus, FrameStatus, Header, Toc, VerificationCheck,
    VerificationReport, VerificationStatus,
};

use super::Memory;
use super::lifecycle::{read_segment, rebuild_lex_from_frames, rebuild_time_entries};
use super::mutation::decode_payload;

impl Memory {
    /// See [`verify`].
    pub fn verify<P: AsRef<Path>>(path: P, deep: bool) -> Result<VerificationReport> {
        verify(path, deep)
    }

    /// See [`doctor`].
    pub fn doctor<P: AsRef<Path>>(path: P, options: &DoctorOptions) -> Result<DoctorReport> {
        doctor(path, options)
    }
}

struct Checks {
    list: Vec<VerificationCheck>,
}

impl Checks {
    fn new() -> Self {
        Self { list: Vec::new() }
    }

    fn pass(&mut self, name: &str) {
        self.push(name, VerificationStatus::Passed, None);
    }

    fn fail(&mut self, name: &str, details: String) {
        self.push(name, VerificationStatus::Failed, Some(details));
    }

    fn skip(&mut self, name: &str, details: &str) {
        self.push(name, VerificationStatus::Skipped, Some(details.into()));
    }

    fn push(&mut self, name: &str, status: VerificationStatus, details: Option<String>) {
        self.list.push(VerificationCheck {
            name: name.into(),
            status,
            details,
        });
    }
}

/// Verify a container without opening a handle on it. `deep` additionally
/// decodes the index artifacts and re-hashes every stored payload.
pub fn verify<P: AsRef<Path>>(path: P, deep: bool) -> Result<VerificationReport> {
    let path = path.as_ref();
    let mut file = File::open(path)?;
    let mut checks = Checks::new();

    let magic_ok = check_magic(&mut file, &mut checks)?;
    let header = if magic_ok {
        check_header(&mut file, &mut checks)
    } else {
        checks.skip("header", "magic check failed");
        None
    };
    let toc = match &header {
        Some(header) => check_footer_and_toc(&mut file, header, &mut checks),
        None => {
            checks.skip("footer", "header unavailable");
            checks.skip("toc", "header unavailable");
            None
        }
    };
    match &header {
        Some(header) => check_wal(&file, header, &mut checks),
        None => checks.skip("wal", "header unavailable"),
    }

    if deep {
        match &toc {
            Some(toc) => {
                check_time_index(&mut file, toc, &mut checks);
                check_lex_index(&mut file, toc, &mut checks);
                check_payloads(&mut file, toc, &mut checks);
            }
            None => {
                checks.skip("time_index", "toc unavailable");
                checks.skip("lex_index", "toc unavailable");
                checks.skip("payload_integrity", "toc unavailable");
            }
        }
    } else {
        checks.skip("time_index", "shallow verify");
        checks.skip("lex_index", "shallow verify");
        checks.skip("payload_integrity", "shallow verify");
    }

    let overall_status = if checks
        .list
        .iter()
        .any(|check| check.status == VerificationStatus::Failed)
    {
        VerificationStatus::Failed
    } else {
        VerificationStatus::Passed
    };
    Ok(VerificationReport {
        file_path: path.to_path_buf(),
        overall_status,
        checks: checks.list,
    })
}

fn check_magic(file: &mut File, checks: &mut Checks) -> Result<bool> {
    let mut magic = [0u8; 4];
    file.seek(SeekFrom::Start(0))?;
    if file.read_exact(&mut magic).is_err() {
        checks.fail("magic", "file too small".into());
        return Ok(false);
    }
    if magic == ENCRYPTED_MAGIC {
        checks.fail("magic", "encrypted capsule (MV2E)".into());
        return Ok(false);
    }
    if magic != MAGIC {
        checks.fail("magic", format!("unexpected magic {magic:02x?}"));
        return Ok(false);
    }
    checks.pass("magic");
    Ok(true)
}

fn check_header(file: &mut File, checks: &mut Checks) -> Option<Header> {
    match HeaderCodec::read(file) {
        Ok(header) => {
            checks.pass("header");
            Some(header)
        }
        Err(err) => {
            checks.fail("header", err.to_string());
            None
        }
    }
}

fn check_footer_and_toc(file: &mut File, header: &Header, checks: &mut Checks) -> Option<Toc> {
    let file_len = match file.metadata() {
        Ok(metadata) => metadata.len(),
        Err(err) => {
            checks.fail("footer", format!("metadata read failed: {err}"));
            checks.skip("toc", "footer unavailable");
            return None;
        }
    };
    if header.footer_offset + FOOTER_SIZE as u64 > file_len {
        checks.fail("footer", "footer offset past end of file".into());
        checks.skip("toc", "footer unavailable");
        return None;
    }
    let mut footer_buf = [0u8; FOOTER_SIZE];
    if file
        .seek(SeekFrom::Start(header.footer_offset))
        .and_then(|_| file.read_exact(&mut footer_buf))
        .is_err()
    {
        checks.fail("footer", "footer read failed".into());
        checks.skip("toc", "footer unavailable");
        return None;
    }
    let Some(footer) = CommitFooter::decode(&footer_buf) else {
        checks.fail("footer", "footer failed validation".into());
        checks.skip("toc", "footer unavailable");
        return None;
    };
    checks.pass("footer");

    if footer.toc_len > header.footer_offset || footer.toc_len > MAX_INDEX_BYTES {
        checks.fail("toc", "footer toc length out of range".into());
        return None;
    }
    let toc_offset = header.footer_offset - footer.toc_len;
    let mut toc_bytes = vec![0u8; footer.toc_len as usize];
    if file
        .seek(SeekFrom::Start(toc_offset))
        .and_then(|_| file.read_exact(&mut toc_bytes))
        .is_err()
    {
        checks.fail("toc", "toc read failed".into());
        return None;
    }
    if !footer.hash_matches(&toc_bytes) {
        checks.fail("toc", "footer hash does not cover toc bytes".into());
        return None;
    }
    if header.toc_checksum != *blake3::hash(&toc_bytes).as_bytes() {
        checks.fail("toc", "header toc checksum mismatch".into());
        return None;
    }
    match Toc::decode(&toc_bytes).and_then(|toc| {
        toc.verify_checksum()?;
        Ok(toc)
    }) {
        Ok(toc) => {
            checks.pass("toc");
            Some(toc)
        }
        Err(err) => {
            checks.fail("toc", err.to_string());
            None
        }
    }
}

fn check_wal(file: &File, header: &Header, checks: &mut Checks) {
    match EmbeddedWal::open_read_only(file, header) {
        Ok(_) => checks.pass("wal"),
        Err(err) => checks.fail("wal", err.to_string()),
    }
}

fn check_time_index(file: &mut File, toc: &Toc, checks: &mut Checks) {
    let Some(manifest) = &toc.time_index else {
        checks.skip("time_index", "no time index committed");
        return;
    };
    let result = read_segment(
        file,
        manifest.bytes_offset,
        manifest.bytes_length,
        &manifest.checksum,
        "time_index",
    )
    .and_then(|bytes| decode_track(&bytes));
    match result {
        Ok(entries) if entries.len() as u64 == manifest.entry_count => checks.pass("time_index"),
        Ok(entries) => checks.fail(
            "time_index",
            format!(
                "manifest claims {} entries, track holds {}",
                manifest.entry_count,
                entries.len()
            ),
        ),
        Err(err) => checks.fail("time_index", err.to_string()),
    }
}

fn check_lex_index(file: &mut File, toc: &Toc, checks: &mut Checks) {
    let Some(manifest) = &toc.lex_index else {
        checks.skip("lex_index", "no lex index committed");
        return;
    };
    let result = read_segment(
        file,
        manifest.bytes_offset,
        manifest.bytes_length,
        &manifest.checksum,
        "lex_index",
    )
    .and_then(|bytes| LexIndex::decode(&bytes));
    match result {
        Ok(index) if index.doc_count() == manifest.doc_count => checks.pass("lex_index"),
        Ok(index) => checks.fail(
            "lex_index",
            format!(
                "manifest claims {} documents, artifact holds {}",
                manifest.doc_count,
                index.doc_count()
            ),
        ),
        Err(err) => checks.fail("lex_index", err.to_string()),
    }
}

fn check_payloads(file: &mut File, toc: &Toc, checks: &mut Checks) {
    let mut corrupt = 0usize;
    let mut checked = 0usize;
    for frame in &toc.frames {
        if frame.status != FrameStatus::Active
            || frame.payload_offset == 0
            || frame.payload_length == 0
        {
            continue;
        }
        checked += 1;
        let mut stored = vec![0u8; frame.payload_length as usize];
        let read = file
            .seek(SeekFrom::Start(frame.payload_offset))
            .and_then(|_| file.read_exact(&mut stored));
        let valid = read.is_ok()
            && decode_payload(&stored, frame.encoding)
                .map(|canonical| blake3::hash(&canonical).as_bytes() == &frame.content_checksum)
                .unwrap_or(false);
        if !valid {
            corrupt += 1;
            tracing::warn!(frame_id = frame.id, "payload failed integrity check");
        }
    }
    if corrupt == 0 {
        checks.pass("payload_integrity");
    } else {
        checks.fail(
            "payload_integrity",
            format!("{corrupt} of {checked} payloads failed verification"),
        );
    }
}

/// Probe the container and attempt bounded repairs. Never invents data:
/// structural recovery falls back to the newest intact commit, a WAL reset
/// drops uncommitted entries, and index rebuilds re-derive artifacts from
/// the frame table.
pub fn doctor<P: AsRef<Path>>(path: P, options: &DoctorOptions) -> Result<DoctorReport> {
    let path = path.as_ref();
    let before = verify(path, true)?;
    let mut findings: Vec<DoctorFinding> = before
        .checks
        .iter()
        .filter(|check| check.status == VerificationStatus::Failed)
        .map(|check| DoctorFinding {
            severity: DoctorSeverity::Error,
            message: format!(
                "{}: {}",
                check.name,
                check.details.as_deref().unwrap_or("failed")
            ),
        })
        .collect();

    let failed = |name: &str| {
        before
            .check(name)
            .is_some_and(|check| check.status == VerificationStatus::Failed)
    };
    let structural_damage = failed("header") || failed("footer") || failed("toc");
    let mut plan: Vec<DoctorActionKind> = Vec::new();
    if structural_damage {
        plan.push(DoctorActionKind::RecoverToc);
    }
    if failed("wal") {
        plan.push(DoctorActionKind::ResetWal);
    }
    if failed("time_index") || options.rebuild_time_index {
        plan.push(DoctorActionKind::RebuildTimeIndex);
    }
    if failed("lex_index") || options.rebuild_lex_index {
        plan.push(DoctorActionKind::RebuildLexIndex);
    }

    if plan.is_empty() {
        findings.push(DoctorFinding {
            severity: DoctorSeverity::Info,
            message: "no repairs needed".into(),
        });
        return Ok(DoctorReport {
            status: DoctorStatus::Clean,
            findings,
            actions: Vec::new(),
            verification: Some(before),
        });
    }

    if options.dry_run {
        let actions = plan
            .into_iter()
            .map(|kind| DoctorActionReport {
                kind,
                status: DoctorActionStatus::Skipped,
                details: Some("dry run".into()),
            })
            .collect();
        return Ok(DoctorReport {
            status: DoctorStatus::PlanOnly,
            findings,
            actions,
            verification: Some(before),
        });
    }

    let mut actions = Vec::new();
    for kind in plan {
        let action = match kind {
            DoctorActionKind::RecoverToc => recover_toc(path),
            DoctorActionKind::ResetWal => {
                if options.reset_wal {
                    reset_wal(path)
                } else {
                    DoctorActionReport {
                        kind,
                        status: DoctorActionStatus::Skipped,
                        details: Some("reset_wal not permitted by options".into()),
                    }
                }
            }
            DoctorActionKind::RebuildTimeIndex => rebuild_index(path, kind),
            DoctorActionKind::RebuildLexIndex => rebuild_index(path, kind),
        };
        tracing::info!(?kind, status = ?action.status, "doctor action");
        actions.push(action);
    }

    let after = verify(path, true)?;
    let status = if after.overall_status == VerificationStatus::Passed {
        DoctorStatus::Healed
    } else {
        DoctorStatus::Failed
    };
    Ok(DoctorReport {
        status,
        findings,
        actions,
        verification: Some(after),
    })
}

/// Point the header back at the newest commit whose footer still validates.
fn recover_toc(path: &Path) -> DoctorActionReport {
    let kind = DoctorActionKind::RecoverToc;
    let result = (|| -> Result<String> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let map = unsafe { Mmap::map(&file)? };
        let slice = find_last_valid_footer(&map).ok_or(crate::error::Mv2Error::InvalidFooter {
            reason: "no valid commit footer found".into(),
        })?;
        let generation = slice.footer.generation;
        let toc_checksum: [u8; 32] = blake3::hash(slice.toc_bytes).into();
        let footer_offset = slice.footer_offset as u64;
        drop(map);

        let mut header = HeaderCodec::read(&mut file).unwrap_or_else(|_| Header {
            magic: MAGIC,
            version: crate::constants::SPEC_VERSION,
            footer_offset,
            wal_offset: crate::constants::WAL_OFFSET,
            wal_size: crate::constants::WAL_SIZE_DEFAULT,
            wal_checkpoint_pos: 0,
            wal_sequence: 0,
            toc_checksum,
        });
        header.footer_offset = footer_offset;
        header.toc_checksum = toc_checksum;
        HeaderCodec::write(&mut file, &header)?;
        file.sync_all()?;
        Ok(format!("recovered commit generation {generation}"))
    })();
    action_report(kind, result)
}

/// Zero the WAL region. Uncommitted entries are dropped, which is the
/// explicit trade the `reset_wal` option opts into.
fn reset_wal(path: &Path) -> DoctorActionReport {
    let kind = DoctorActionKind::ResetWal;
    let result = (|| -> Result<String> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut header = HeaderCodec::read(&mut file)?;
        let zeros = vec![0u8; header.wal_size as usize];
        file.seek(SeekFrom::Start(header.wal_offset))?;
        file.write_all(&zeros)?;
        header.wal_checkpoint_pos = 0;
        HeaderCodec::write(&mut file, &header)?;
        file.sync_all()?;
        Ok(format!("zeroed {} wal bytes", header.wal_size))
    })();
    action_report(kind, result)
}

fn rebuild_index(path: &Path, kind: DoctorActionKind) -> DoctorActionReport {
    let result = (|| -> Result<String> {
        let mut memory = Memory::open(path)?;
        match kind {
            DoctorActionKind::RebuildLexIndex => {
                memory.lex_index = rebuild_lex_from_frames(&mut memory.file, &memory.toc);
            }
            _ => {
                memory.time_entries = rebuild_time_entries(&memory.toc);
            }
        }
        memory.dirty = true;
        memory.commit()?;
        memory.close()?;
        Ok("rebuilt from frame table".into())
    })();
    action_report(kind, result)
}

fn action_report(kind: DoctorActionKind, result: Result<String>) -> DoctorActionReport {
    match result {
        Ok(details) => DoctorActionReport {
            kind,
            status: DoctorActionStatus::Applied,
            details: Some(details),
        },
        Err(err) => DoctorActionReport {
            kind,
            status: DoctorActionStatus::Failed,
            details: Some(err.to_string()),
        },
    }
}
