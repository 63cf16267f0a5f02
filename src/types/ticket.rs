//! Capacity tickets: grants that raise the per-file size cap.

use serde::{Deserialize, Serialize};

use crate::constants::FREE_TIER_CAPACITY_BYTES;

/// A capacity grant offered to [`crate::Memory::apply_ticket`]. Sequence
/// numbers must strictly increase per memory so a stale grant cannot shrink
/// an already-applied capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub issuer: String,
    pub seq_no: u64,
    pub capacity_bytes: u64,
}

impl Ticket {
    #[must_use]
    pub fn new<S: Into<String>>(issuer: S, seq_no: u64) -> Self {
        Self {
            issuer: issuer.into(),
            seq_no,
            capacity_bytes: FREE_TIER_CAPACITY_BYTES,
        }
    }

    #[must_use]
    pub fn capacity_bytes(mut self, capacity_bytes: u64) -> Self {
        self.capacity_bytes = capacity_bytes;
        self
    }
}
