//! Shared model for the quarry streaming query client: branded ids, the
//! session message model, wire frames and the client error taxonomy.

pub mod errors;
pub mod ids;
pub mod messages;
pub mod protocol;

pub use errors::{ClientError, ErrorClass};
pub use ids::{CollectionId, QueryId, ThreadId};
pub use messages::{Batch, BoundingBox, Citation, CitationScope, Message, MessageKind, SourceInfo, ThoughtStep};
pub use protocol::{InboundFrame, OutboundFrame, QueryPayload};
