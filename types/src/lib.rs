//! Domain types for the ingestion worker.
//!
//! This crate contains pure domain types and the Wire-Message Codec (C1):
//! no IO, no async, no database or network dependency. Everything here can
//! be used from any layer of the worker, and from tests without a broker
//! or a database in the loop.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod conversation;
pub mod dlq;
pub mod error_code;
pub mod ids;
pub mod job;
pub mod notification;
pub mod payload;

pub use conversation::{mean_confidence, Conversation, ConversationTurn, ConversationType};
pub use dlq::{DlqContext, DlqEntry, DlqError, DlqMetadata, DlqRemediation};
pub use error_code::{classify_error_text, ErrorCode};
pub use ids::{Checksum, ChecksumFormatError, StableEventId, StableEventIdError};
pub use job::{is_transition_allowed, IngestionJob, IngestionStatus, UnknownStatus};
pub use notification::{
    decode, peek_trace_id, should_retry, DropNotification, PackageUri, Priority, Producer,
    RawFields, SchemaVersion, WireDecodeError, DEFAULT_FRESHNESS_THRESHOLD, MAX_WIRE_RETRY_COUNT,
};
pub use payload::{
    Annotations, ConversationPayload, Entity, EntityType, Location, MeetingMetadata, Participant,
    QualityFlags, Segment, Sentiment, SentimentLabel,
};
