//! Public types exposed by the `mv2-core` crate.

pub mod ask;
pub mod common;
pub mod frame;
pub mod manifest;
pub mod options;
pub mod search;
pub mod ticket;
pub mod verification;

pub use ask::{AskCitation, AskMode, AskRequest, AskResponse, AskStats};
pub use common::{CanonicalEncoding, FrameId, FrameStatus};
pub use frame::{
    Frame, Stats, TimelineEntry, TimelineQuery, TimelineQueryBuilder, TimelineResponse,
};
pub use manifest::{Header, LexIndexManifest, TicketRef, TimeIndexManifest, Toc};
pub use options::{PutOptions, PutOptionsBuilder};
pub use search::{SearchHit, SearchMode, SearchRequest, SearchResponse};
pub use ticket::Ticket;
pub use verification::{
    DoctorActionKind, DoctorActionReport, DoctorActionStatus, DoctorFinding, DoctorOptions,
    DoctorReport, DoctorSeverity, DoctorStatus, VerificationCheck, VerificationReport,
    VerificationStatus,
};
