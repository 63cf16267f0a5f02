//! Error taxonomy for the `.mv2` engine.
//!
//! Every variant carries a stable numeric code via [`Mv2Error::code`] so
//! bindings can map failures without parsing messages. Codes are append-only;
//! a reimplementation must preserve them at its external boundary.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::FrameId;

pub type Result<T> = std::result::Result<T, Mv2Error>;

#[derive(Debug, Error)]
pub enum Mv2Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {reason}")]
    Encode { reason: String },

    #[error("decode error: {reason}")]
    Decode { reason: String },

    #[error("lock error: {0}")]
    Lock(String),

    #[error("memory is locked by another handle: {path}")]
    Locked { path: PathBuf },

    #[error("checksum mismatch in {region}")]
    ChecksumMismatch { region: &'static str },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid table of contents: {reason}")]
    InvalidToc { reason: String },

    #[error("invalid commit footer: {reason}")]
    InvalidFooter { reason: String },

    #[error("lexical index not enabled for this memory")]
    LexNotEnabled,

    #[error("vector index not enabled for this memory")]
    VecNotEnabled,

    #[error("clip index not enabled for this memory")]
    ClipNotEnabled,

    #[error("time index missing from this memory")]
    TimeIndexMissing,

    #[error("capacity exceeded: needed {needed} bytes, capacity {capacity}")]
    CapacityExceeded { needed: u64, capacity: u64 },

    #[error("ticket sequence must increase: current {current}, offered {offered}")]
    TicketSequence { current: u64, offered: u64 },

    #[error("file is an encrypted capsule: {path} ({hint})")]
    EncryptedFile { path: PathBuf, hint: String },

    #[error("auxiliary sidecar file detected: {path}")]
    AuxiliaryFileDetected { path: PathBuf },

    #[error("memory is read-only: {reason}")]
    ReadOnly { reason: String },

    #[error("handle is closed")]
    InvalidHandle,

    #[error("frame {frame_id} not found")]
    FrameNotFound { frame_id: FrameId },

    #[error("no frame found for uri {uri}")]
    FrameNotFoundByUri { uri: String },

    #[error("invalid frame {frame_id}: {reason}")]
    InvalidFrame {
        frame_id: FrameId,
        reason: &'static str,
    },

    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("extraction failed: {reason}")]
    Extraction { reason: String },

    #[error("wal corruption at offset {offset}: {reason}")]
    WalCorruption { offset: u64, reason: String },

    #[error("checkpoint failed: {reason}")]
    CheckpointFailed { reason: String },

    #[error("doctor failed: {reason}")]
    Doctor { reason: String },

    #[error("invalid time index: {reason}")]
    InvalidTimeIndex { reason: String },
}

impl Mv2Error {
    /// Stable numeric code for this error. Append-only; never renumbered.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::Io(_) => 1,
            Self::Encode { .. } => 2,
            Self::Decode { .. } => 3,
            Self::Lock(_) => 4,
            Self::Locked { .. } => 5,
            Self::ChecksumMismatch { .. } => 6,
            Self::InvalidHeader { .. } => 7,
            Self::InvalidToc { .. } => 8,
            Self::InvalidFooter { .. } => 9,
            Self::LexNotEnabled => 11,
            Self::VecNotEnabled => 12,
            Self::ClipNotEnabled => 13,
            Self::TimeIndexMissing => 14,
            Self::CapacityExceeded { .. } => 21,
            Self::TicketSequence { .. } => 22,
            Self::EncryptedFile { .. } => 31,
            Self::AuxiliaryFileDetected { .. } => 32,
            Self::ReadOnly { .. } => 33,
            Self::InvalidHandle => 34,
            Self::FrameNotFound { .. } => 41,
            Self::FrameNotFoundByUri { .. } => 42,
            Self::InvalidFrame { .. } => 43,
            Self::InvalidQuery { .. } => 44,
            Self::Extraction { .. } => 61,
            Self::WalCorruption { .. } => 71,
            Self::CheckpointFailed { .. } => 72,
            Self::Doctor { .. } => 73,
            Self::InvalidTimeIndex { .. } => 74,
        }
    }
}

impl From<bincode::error::EncodeError> for Mv2Error {
    fn from(err: bincode::error::EncodeError) -> Self {
        Self::Encode {
            reason: err.to_string(),
        }
    }
}

impl From<bincode::error::DecodeError> for Mv2Error {
    fn from(err: bincode::error::DecodeError) -> Self {
        Self::Decode {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Mv2Error::LexNotEnabled.code(), 11);
        assert_eq!(
            Mv2Error::CapacityExceeded {
                needed: 1,
                capacity: 0
            }
            .code(),
            21
        );
        assert_eq!(Mv2Error::FrameNotFound { frame_id: 7 }.code(), 41);
        assert_eq!(
            Mv2Error::WalCorruption {
                offset: 0,
                reason: String::new()
            }
            .code(),
            71
        );
    }
}
