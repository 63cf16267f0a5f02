//! Small shared types used across the engine.

use serde::{Deserialize, Serialize};

/// Dense, monotonically increasing frame identifier. Never reused.
pub type FrameId = u64;

/// Soft-delete status of a frame. Deleted frames keep their slot and metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FrameStatus {
    #[default]
    Active,
    Deleted,
}

/// How a frame payload is stored in the data region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalEncoding {
    #[default]
    Plain,
    Zstd,
}
