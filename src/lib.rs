#![deny(clippy::all, clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![allow(clippy::module_name_repetitions)]
//
// Strategic lint exceptions - these are allowed project-wide for pragmatic reasons:
//
// Documentation lints: Many internal/self-documenting functions don't need extensive docs.
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
//
// Cast safety: casts in this codebase are bounded by real-world constraints
// (file sizes, frame counts) checked before the cast happens.
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
//
// Style/complexity: storage-engine operations naturally run long.
#![allow(clippy::too_many_lines)]
#![allow(clippy::similar_names)]
// e.g., frame_id, parent_id, group_root are intentionally similar
#![allow(clippy::struct_excessive_bools)] // Option structs naturally carry many flags
#![allow(clippy::return_self_not_must_use)] // Builder patterns don't need must_use everywhere
#![allow(clippy::unreadable_literal)] // Magic numbers in binary formats are clearer as hex

/// The mv2-core crate version (matches `Cargo.toml`).
pub const MV2_CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod constants;
pub mod error;
pub mod footer;
pub mod io;
pub mod lex;
mod lock;
mod memory;
pub mod text;
pub mod types;

pub use constants::*;
pub use error::{Mv2Error, Result};
pub use footer::{CommitFooter, find_last_valid_footer};
pub use io::time_index::{TimeIndexEntry, decode_track, encode_track};
pub use io::wal::{EmbeddedWal, WalRecord, WalStats};
pub use lex::{LexIndex, ScoredFrame};
pub use lock::{FileLock, LockMode};
pub use memory::{Memory, WalEntry, doctor, verify};
pub use text::{normalize_whitespace, tokenize, truncate_at_grapheme_boundary};
pub use types::{
    AskCitation, AskMode, AskRequest, AskResponse, AskStats, CanonicalEncoding, DoctorActionKind,
    DoctorActionReport, DoctorActionStatus, DoctorFinding, DoctorOptions, DoctorReport,
    DoctorSeverity, DoctorStatus, Frame, FrameId, FrameStatus, Header, LexIndexManifest,
    PutOptions, PutOptionsBuilder, SearchHit, SearchMode, SearchRequest, SearchResponse, Stats,
    Ticket, TicketRef, TimeIndexManifest, TimelineEntry, TimelineQuery, TimelineQueryBuilder,
    TimelineResponse, Toc, VerificationCheck, VerificationReport, VerificationStatus,
};

#[cfg(test)]
use once_cell::sync::Lazy;
#[cfg(test)]
use std::sync::Mutex;

use bincode::config::{self, Config};

/// Canonical bincode configuration for everything serialized into the
/// container. Fixed-int little-endian keeps encodings byte-stable across
/// releases.
pub(crate) fn disk_config() -> impl Config {
    config::standard()
        .with_fixed_int_encoding()
        .with_little_endian()
}

#[cfg(test)]
#[allow(clippy::non_std_lazy_statics)]
static SERIAL_TEST_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[cfg(test)]
pub(crate) fn run_serial_test<T>(f: impl FnOnce() -> T) -> T {
    let _guard = SERIAL_TEST_MUTEX
        .lock()
        .expect("mv2-core serial test mutex poisoned");
    f()
}
